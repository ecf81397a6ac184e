pub mod app;
pub mod config;
pub mod reconcile;
pub mod signal;
pub mod store;
pub mod targets;
pub mod trace;
pub mod watcher;
