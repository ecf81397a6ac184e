use std::io::IsTerminal;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use tracing::{error, info};
use workload_sd::config::{
    Config, DEFAULT_CONFIG_MAP, DEFAULT_DISCOVERY_SELECTOR, DEFAULT_KEY, DEFAULT_PORT,
};
use workload_sd::targets::DedupStrategy;
use workload_sd::{app, trace};

fn default_worker_threads() -> usize {
    std::env::var("WORKLOAD_SD_WORKER_THREADS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|threads| *threads > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1)
}

#[derive(FromArgs)]
#[argh(
    description = "Publish Istio WorkloadEntries as a Prometheus file_sd target list",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(switch, description = "output logs as JSON")]
    log_json: bool,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,

    #[argh(
        option,
        short = 'n',
        description = "namespace of the ConfigMap, discovered from the Prometheus pods if not set"
    )]
    namespace: Option<String>,

    #[argh(
        option,
        description = "only watch WorkloadEntries in this namespace, all namespaces if not set"
    )]
    watch_namespace: Option<String>,

    #[argh(
        option,
        default = "DEFAULT_CONFIG_MAP.to_string()",
        description = "name of the ConfigMap holding the target list"
    )]
    config_map: String,

    #[argh(
        option,
        default = "DEFAULT_KEY.to_string()",
        description = "the ConfigMap key holding the target list"
    )]
    key: String,

    #[argh(
        option,
        default = "DEFAULT_PORT",
        description = "port appended to every workload address"
    )]
    port: u16,

    #[argh(
        option,
        default = "DEFAULT_DISCOVERY_SELECTOR.to_string()",
        description = "label selector of the Prometheus pods, used to discover the namespace"
    )]
    discovery_selector: String,

    #[argh(
        option,
        default = "DedupStrategy::default()",
        description = "how repeated targets are removed, group or address"
    )]
    dedup: DedupStrategy,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("workload-sd {}", env!("CARGO_PKG_VERSION"));
    }

    fn config(&self) -> Config {
        Config {
            namespace: self.namespace.clone(),
            watch_namespace: self.watch_namespace.clone(),
            config_map: self.config_map.clone(),
            key: self.key.clone(),
            port: self.port,
            discovery_selector: self.discovery_selector.clone(),
            dedup: self.dedup,
        }
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let levels =
            std::env::var(trace::LOG_ENV).unwrap_or_else(|_| trace::levels(&self.log_level));
        let color = !self.log_json && std::io::stdout().is_terminal();
        trace::init(color, self.log_json, &levels);

        let config = self.config();
        config.validate().map_err(handle_config_errors)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("workload-sd-worker")
            .worker_threads(self.threads)
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "build tokio runtime failed", %err);
                exitcode::OSERR
            })?;

        let result = runtime.block_on(async move {
            info!(
                message = "start workload-sd",
                version = env!("CARGO_PKG_VERSION"),
                threads = self.threads,
            );

            app::run(config).await.map_err(|err| {
                error!(message = "workload-sd exited", %err);
                err.exit_code()
            })
        });

        runtime.shutdown_timeout(Duration::from_secs(5));

        result
    }
}

pub fn handle_config_errors(errors: Vec<String>) -> ExitCode {
    for err in errors {
        error!(message = "configuration error", %err);
    }

    exitcode::CONFIG
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults() {
        let cmd = RootCommand::from_args(&["workload-sd"], &[]).unwrap();

        assert_eq!(cmd.config(), Config::default());
        assert_eq!(cmd.log_level, "info");
        assert!(!cmd.log_json);
        assert!(cmd.threads > 0);
    }

    #[test]
    fn flags() {
        let cmd = RootCommand::from_args(
            &["workload-sd"],
            &[
                "-n",
                "monitoring",
                "--watch-namespace",
                "vm",
                "--config-map",
                "vm-targets",
                "--key",
                "targets.json",
                "--port",
                "9100",
                "--dedup",
                "address",
                "-l",
                "debug",
                "--log-json",
            ],
        )
        .unwrap();

        assert_eq!(
            cmd.config(),
            Config {
                namespace: Some("monitoring".to_string()),
                watch_namespace: Some("vm".to_string()),
                config_map: "vm-targets".to_string(),
                key: "targets.json".to_string(),
                port: 9100,
                discovery_selector: DEFAULT_DISCOVERY_SELECTOR.to_string(),
                dedup: DedupStrategy::Address,
            }
        );
        assert_eq!(cmd.log_level, "debug");
        assert!(cmd.log_json);
    }

    #[test]
    fn unknown_dedup() {
        assert!(RootCommand::from_args(&["workload-sd"], &["--dedup", "label"]).is_err());
    }
}
