pub mod config_map;
pub mod metadata;
pub mod pod;
pub mod workload_entry;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// An accessor trait for a kubernetes Resource.
pub trait Resource: DeserializeOwned {
    /// The group of the resource, or the empty string if the resource doesn't have a
    /// group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    /// The kind of the resource, it is used by logging and the `kind` field
    /// of objects sent to the API server.
    const KIND: &'static str;

    /// The plural of this resource, which is used to construct URLS
    const PLURAL: &'static str;

    /// The `apiVersion` of this resource, e.g. `v1` or `networking.istio.io/v1beta1`
    fn api_version() -> String {
        if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        }
    }

    /// Creates a url path for http requests for this resource
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = Self::api_version();
        let namespace = match namespace {
            Some(namespace) => format!("namespaces/{namespace}/"),
            None => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }

    /// Creates a url path of a single named object.
    fn object_path(namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", Self::url_path(namespace), name)
    }
}

/// A generic Kubernetes object list
///
/// This is used instead of a full struct for `ConfigMapList`, `PodList`, etc.
/// and is generally produced from list queries on an [`Resource`].
#[derive(Deserialize)]
pub struct ObjectList<T> {
    /// ListMeta - only really used for its `resourceVersion` and `continue`
    pub metadata: metadata::ListMeta,

    /// These items we are actually interested in.
    pub items: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigMap, WorkloadEntry};

    #[test]
    fn core_group_paths() {
        assert_eq!(ConfigMap::url_path(None), "/api/v1/configmaps");
        assert_eq!(
            ConfigMap::url_path(Some("monitoring")),
            "/api/v1/namespaces/monitoring/configmaps"
        );
        assert_eq!(
            ConfigMap::object_path(Some("monitoring"), "file-sd-config"),
            "/api/v1/namespaces/monitoring/configmaps/file-sd-config"
        );
    }

    #[test]
    fn named_group_paths() {
        assert_eq!(WorkloadEntry::api_version(), "networking.istio.io/v1beta1");
        assert_eq!(
            WorkloadEntry::url_path(None),
            "/apis/networking.istio.io/v1beta1/workloadentries"
        );
        assert_eq!(
            WorkloadEntry::url_path(Some("vm")),
            "/apis/networking.istio.io/v1beta1/namespaces/vm/workloadentries"
        );
    }
}
