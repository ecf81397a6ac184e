use crate::targets::DedupStrategy;

pub const DEFAULT_CONFIG_MAP: &str = "file-sd-config";
pub const DEFAULT_KEY: &str = "staticConfigurations.json";
/// The port istio-agent serves merged metrics on.
pub const DEFAULT_PORT: u16 = 15020;
pub const DEFAULT_DISCOVERY_SELECTOR: &str = "app=prometheus";

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Namespace of the ConfigMap, discovered from the Prometheus pods if
    /// not set.
    pub namespace: Option<String>,

    /// Only watch WorkloadEntries in this namespace, all namespaces if not set.
    pub watch_namespace: Option<String>,

    pub config_map: String,

    /// The ConfigMap key holding the target list.
    pub key: String,

    /// Port appended to every workload address.
    pub port: u16,

    /// Label selector of the pods whose namespace holds the ConfigMap.
    pub discovery_selector: String,

    pub dedup: DedupStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: None,
            watch_namespace: None,
            config_map: DEFAULT_CONFIG_MAP.to_string(),
            key: DEFAULT_KEY.to_string(),
            port: DEFAULT_PORT,
            discovery_selector: DEFAULT_DISCOVERY_SELECTOR.to_string(),
            dedup: DedupStrategy::default(),
        }
    }
}

impl Config {
    /// Check every field, and return all problems found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.config_map.is_empty() {
            errors.push("config map name is empty".to_string());
        }

        if self.key.is_empty() {
            errors.push("config map key is empty".to_string());
        } else if !self
            .key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            errors.push(format!(
                "config map key {:?} is invalid, only alphanumeric characters, '-', '_' and '.' are allowed",
                self.key
            ));
        }

        if self.port == 0 {
            errors.push("port must be greater than 0".to_string());
        }

        match &self.namespace {
            Some(namespace) if namespace.is_empty() => {
                errors.push("namespace is empty".to_string());
            }
            Some(_) => {}
            None => {
                if self.discovery_selector.is_empty() {
                    errors.push(
                        "discovery selector is required when namespace is not set".to_string(),
                    );
                }
            }
        }

        if let Some(namespace) = &self.watch_namespace {
            if namespace.is_empty() {
                errors.push("watch namespace is empty".to_string());
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_is_valid() {
        let config = Config::default();

        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.config_map, "file-sd-config");
        assert_eq!(config.key, "staticConfigurations.json");
        assert_eq!(config.port, 15020);
        assert_eq!(config.dedup, DedupStrategy::Group);
    }

    #[test]
    fn collect_all_errors() {
        let config = Config {
            namespace: None,
            watch_namespace: Some(String::new()),
            config_map: String::new(),
            key: "static/configs.json".to_string(),
            port: 0,
            discovery_selector: String::new(),
            dedup: DedupStrategy::Address,
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5, "{errors:#?}");
    }

    #[test]
    fn explicit_namespace_skips_discovery() {
        let config = Config {
            namespace: Some("monitoring".to_string()),
            discovery_selector: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));

        let config = Config {
            namespace: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(vec!["namespace is empty".to_string()]));
    }
}
