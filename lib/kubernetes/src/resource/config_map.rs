use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Resource;
use super::metadata::ObjectMeta;

fn default_api_version() -> String {
    ConfigMap::api_version()
}

fn default_kind() -> String {
    ConfigMap::KIND.to_string()
}

/// ConfigMap holds configuration data for pods to consume.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#configmap-v1-core
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConfigMap {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    /// Data contains the configuration data. Each key must consist of alphanumeric
    /// characters, '-', '_' or '.'.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Resource for ConfigMap {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "ConfigMap";
    const PLURAL: &'static str = "configmaps";
}

impl ConfigMap {
    pub fn new(name: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        ConfigMap {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            data,
        }
    }
}
