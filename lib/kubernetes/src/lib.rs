mod client;
pub mod config;
mod resource;
mod version;
mod watch;

pub use client::{Client, Error, ErrorResponse, ListParams, VersionMatch, WatchEvent, WatchParams};
pub use resource::config_map::ConfigMap;
pub use resource::metadata::{ListMeta, ObjectMeta};
pub use resource::pod::{Pod, PodStatus};
pub use resource::workload_entry::{WorkloadEntry, WorkloadEntrySpec};
pub use resource::{ObjectList, Resource};
pub use version::Version;
pub use watch::{Config as WatchConfig, Event, InitialListStrategy, watcher};
