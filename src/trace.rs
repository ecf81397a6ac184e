use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Env var overriding `--log-level`, it takes `EnvFilter` directives.
pub const LOG_ENV: &str = "WORKLOAD_SD_LOG";

/// Expand a bare level to directives for the crates of this workspace, so
/// dependencies like hyper and rustls stay quiet.
pub fn levels(level: &str) -> String {
    match level {
        "off" => "off".to_string(),
        level => ["workload_sd", "kubernetes", "tripwire"]
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect::<Vec<_>>()
            .join(","),
    }
}

/// Install the global subscriber. Invalid directives fall back to `info`.
pub fn init(color: bool, json: bool, levels: &str) {
    let (filter, invalid) = match EnvFilter::try_new(levels) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(self::levels("info")), Some(err)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(color)
        .with_writer(std::io::stdout);

    // an error means a subscriber is installed already, e.g. by another test
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.finish().try_init()
    };

    if let Some(err) = invalid {
        warn!(message = "invalid log levels, fallback to info", levels, %err);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn expand_levels() {
        assert_eq!(levels("off"), "off");
        assert_eq!(
            levels("debug"),
            "workload_sd=debug,kubernetes=debug,tripwire=debug"
        );
    }

    #[test]
    fn directives_parse() {
        for level in ["trace", "info", "off"] {
            assert!(EnvFilter::try_new(levels(level)).is_ok(), "{level}");
        }
    }
}
