use std::pin::pin;

use exitcode::ExitCode;
use futures::StreamExt;
use kubernetes::{
    Client, InitialListStrategy, ListParams, Pod, Version, WatchConfig, WorkloadEntry, watcher,
};
use tracing::{info, warn};
use tripwire::Tripwire;

use crate::config::Config;
use crate::reconcile::Reconciler;
use crate::signal::{self, SignalTo};
use crate::store::KubernetesStore;
use crate::watcher::{self as workload_watcher, RESUBSCRIBE_DELAY};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("build kubernetes client failed, {0}")]
    Client(#[source] kubernetes::Error),

    #[error("list pods matching {selector:?} failed, {source}")]
    Discovery {
        selector: String,
        source: kubernetes::Error,
    },

    #[error("no pod matches {0:?}, the namespace has to be set explicitly")]
    NoPodFound(String),

    #[error("install signal handlers failed, {0}")]
    Signal(#[source] std::io::Error),

    #[error("worker task failed, {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Client(_) => exitcode::CONFIG,
            Error::Discovery { .. } | Error::NoPodFound(_) => exitcode::UNAVAILABLE,
            Error::Signal(_) => exitcode::OSERR,
            Error::Worker(_) => exitcode::SOFTWARE,
        }
    }
}

/// Pick the namespace of the first running pod, or of the first pod if none
/// of them is running yet.
fn pick_namespace(pods: &[Pod]) -> Option<&str> {
    pods.iter()
        .filter(|pod| !pod.metadata.namespace.is_empty())
        .min_by_key(|pod| !pod.is_running())
        .map(|pod| pod.metadata.namespace.as_str())
}

/// Locate the namespace Prometheus runs in, by listing pods matching
/// `selector` across all namespaces.
pub async fn discover_namespace(client: &Client, selector: &str) -> Result<String, Error> {
    let mut client = client.clone();
    client.set_namespace(None);

    let params = ListParams {
        label_selector: Some(selector.to_string()),
        ..Default::default()
    };
    let pods = client
        .list::<Pod>(&params)
        .await
        .map_err(|source| Error::Discovery {
            selector: selector.to_string(),
            source,
        })?;

    let namespace = pick_namespace(&pods.items)
        .ok_or_else(|| Error::NoPodFound(selector.to_string()))?
        .to_string();

    info!(
        message = "namespace discovered",
        %namespace,
        selector,
        pods = pods.items.len(),
    );

    Ok(namespace)
}

/// Streaming the initial list is enabled by default since 1.32, older servers
/// are listed page by page.
fn initial_list_strategy(version: &Version) -> InitialListStrategy {
    let major = version.major.trim_end_matches('+').parse::<u32>();
    let minor = version.minor.trim_end_matches('+').parse::<u32>();

    match (major, minor) {
        (Ok(major), Ok(minor)) if (major, minor) >= (1, 32) => InitialListStrategy::StreamingList,
        _ => InitialListStrategy::ListWatch,
    }
}

/// Run until a signal asks to stop.
pub async fn run(config: Config) -> Result<(), Error> {
    let client = Client::new(None).map_err(Error::Client)?;

    let strategy = match client.version().await {
        Ok(version) => {
            info!(
                message = "api server connected",
                version = %version.git_version,
                platform = %version.platform,
            );

            initial_list_strategy(&version)
        }
        Err(err) => {
            warn!(message = "fetch api server version failed", %err);
            InitialListStrategy::ListWatch
        }
    };

    let namespace = match config.namespace {
        Some(namespace) => namespace,
        None => discover_namespace(&client, &config.discovery_selector).await?,
    };

    info!(
        message = "target list location",
        %namespace,
        config_map = %config.config_map,
        key = %config.key,
        dedup = %config.dedup,
    );

    let mut store_client = client.clone();
    store_client.set_namespace(Some(namespace));
    let reconciler = Reconciler::new(
        KubernetesStore::new(store_client, config.config_map, config.key),
        config.port,
        config.dedup,
    );

    let mut watch_client = client;
    watch_client.set_namespace(config.watch_namespace);
    let subscribe = move || {
        let config = WatchConfig {
            bookmark: true,
            initial_list_strategy: strategy,
            ..Default::default()
        };

        watcher::<WorkloadEntry>(watch_client.clone(), config)
    };

    let mut signals = pin!(signal::os_signals().map_err(Error::Signal)?);

    let (trigger, tripwire) = Tripwire::new("workload-watcher");
    let mut worker = tokio::spawn(async move {
        workload_watcher::run(subscribe, &reconciler, tripwire, RESUBSCRIBE_DELAY).await;
    });

    let signal = tokio::select! {
        signal = signals.next() => signal.unwrap_or(SignalTo::Shutdown),
        result = &mut worker => {
            // the worker only returns once the trigger fires
            result?;
            return Ok(());
        }
    };

    match signal {
        SignalTo::Shutdown => {
            info!(message = "shutdown signal received, wait for the in-flight pass");
            trigger.cancel();

            tokio::select! {
                result = &mut worker => result?,
                _ = signals.next() => {
                    info!(message = "another signal received, quit immediately");
                    worker.abort();
                }
            }
        }
        SignalTo::Quit => {
            info!(message = "quit signal received");
            worker.abort();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use kubernetes::ObjectList;
    use pretty_assertions::assert_eq;

    use super::*;

    fn pods(json: &str) -> Vec<Pod> {
        serde_json::from_str::<ObjectList<Pod>>(json).unwrap().items
    }

    #[test]
    fn prefer_running_pod() {
        let pods = pods(
            r#"{
                "metadata": {"resourceVersion": "10"},
                "items": [
                    {"metadata": {"name": "prometheus-0", "namespace": "staging"}, "status": {"phase": "Pending"}},
                    {"metadata": {"name": "prometheus-0", "namespace": "monitoring"}, "status": {"phase": "Running"}},
                    {"metadata": {"name": "prometheus-1", "namespace": "other"}, "status": {"phase": "Running"}}
                ]
            }"#,
        );

        assert_eq!(pick_namespace(&pods), Some("monitoring"));
    }

    #[test]
    fn fallback_to_first_pod() {
        let pods = pods(
            r#"{
                "metadata": {},
                "items": [
                    {"metadata": {"name": "prometheus-0", "namespace": "staging"}, "status": {"phase": "Pending"}},
                    {"metadata": {"name": "prometheus-0", "namespace": "monitoring"}}
                ]
            }"#,
        );

        assert_eq!(pick_namespace(&pods), Some("staging"));
        assert_eq!(pick_namespace(&[]), None);
    }

    #[test]
    fn list_strategy_by_version() {
        for (major, minor, streaming) in [
            ("1", "31", false),
            ("1", "32", true),
            ("1", "33+", true),
            ("2", "0", true),
            ("", "", false),
        ] {
            let version = Version {
                major: major.to_string(),
                minor: minor.to_string(),
                git_version: String::new(),
                platform: "linux/amd64".to_string(),
            };

            assert_eq!(
                matches!(
                    initial_list_strategy(&version),
                    InitialListStrategy::StreamingList
                ),
                streaming,
                "{major}.{minor}"
            );
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(
            Error::NoPodFound("app=prometheus".to_string()).exit_code(),
            exitcode::UNAVAILABLE
        );
        assert_eq!(
            Error::Client(kubernetes::Error::Validation("bad".to_string())).exit_code(),
            exitcode::CONFIG
        );
    }
}
