use serde::Deserialize;

use super::Resource;
use super::metadata::ObjectMeta;

/// PodStatus represents information about the status of a pod.
#[derive(Debug, Default, Deserialize)]
pub struct PodStatus {
    /// The phase of a Pod is a simple, high-level summary of where the Pod is
    /// in its lifecycle. One of Pending, Running, Succeeded, Failed or Unknown.
    #[serde(default)]
    pub phase: String,
}

/// Pod is a collection of containers that can run on a host. Only the metadata
/// and phase are decoded, since pods are only listed to locate a namespace.
#[derive(Debug, Deserialize)]
pub struct Pod {
    /// Standard object's metadata.
    ///
    /// More info: https://git.k8s.io/community/contributors/devel/sig-architecture/api-conventions.md#metadata
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn is_running(&self) -> bool {
        self.status.phase == "Running"
    }
}

impl Resource for Pod {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Pod";
    const PLURAL: &'static str = "pods";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectList;

    #[test]
    fn deserialize_list() {
        let input = r#"{
  "kind": "PodList",
  "apiVersion": "v1",
  "metadata": {"resourceVersion": "9918"},
  "items": [
    {
      "metadata": {
        "name": "prometheus-7d4c8f9b5-xk2lq",
        "namespace": "monitoring",
        "labels": {"app": "prometheus"}
      },
      "spec": {"containers": [{"name": "prometheus", "image": "prom/prometheus"}]},
      "status": {"phase": "Running", "podIP": "10.244.0.7"}
    },
    {
      "metadata": {"name": "pending", "namespace": "other"}
    }
  ]
}"#;

        let list = serde_json::from_str::<ObjectList<Pod>>(input).unwrap();
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].metadata.namespace, "monitoring");
        assert_eq!(list.items[0].metadata.labels["app"], "prometheus");
        assert!(list.items[0].is_running());
        assert!(!list.items[1].is_running());
    }
}
