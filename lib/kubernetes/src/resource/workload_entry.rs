use std::collections::BTreeMap;

use serde::Deserialize;

use super::Resource;
use super::metadata::ObjectMeta;

/// WorkloadEntrySpec describes the properties of a single non-Kubernetes
/// workload, such as a VM or a bare metal server, that is onboarded into the
/// mesh.
///
/// Every field is optional here, an entry without an address is still decoded
/// and left for the caller to reject.
///
/// See https://istio.io/latest/docs/reference/config/networking/workload-entry/
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WorkloadEntrySpec {
    /// Address associated with the network endpoint without the port. Domain
    /// names can be used if and only if the resolution is set to DNS, and must
    /// be fully-qualified without wildcards.
    #[serde(default)]
    pub address: String,

    /// Set of ports associated with the endpoint, keyed by port name.
    #[serde(default)]
    pub ports: BTreeMap<String, u32>,

    /// One or more labels associated with the endpoint.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Network enables Istio to group endpoints resident in the same L3 domain/network.
    #[serde(default)]
    pub network: String,

    /// The locality associated with the endpoint, e.g. `us-west/zone1/rack2`.
    #[serde(default)]
    pub locality: String,

    /// The load balancing weight associated with the endpoint.
    #[serde(default)]
    pub weight: Option<u32>,

    /// The service account associated with the workload if a sidecar is
    /// present in the workload.
    #[serde(default, rename = "serviceAccount")]
    pub service_account: String,
}

/// WorkloadEntry enables specifying the properties of a single non-Kubernetes
/// workload.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkloadEntry {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: WorkloadEntrySpec,
}

impl Resource for WorkloadEntry {
    const GROUP: &'static str = "networking.istio.io";
    const VERSION: &'static str = "v1beta1";
    const KIND: &'static str = "WorkloadEntry";
    const PLURAL: &'static str = "workloadentries";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WatchEvent;

    #[test]
    fn deserialize_watch_event() {
        let input = r#"{"type":"ADDED","object":{"apiVersion":"networking.istio.io/v1beta1","kind":"WorkloadEntry","metadata":{"name":"vm-1","namespace":"vm","resourceVersion":"3301"},"spec":{"address":"10.0.0.5","labels":{"app":"ratings"},"serviceAccount":"bookinfo-ratings","network":"vm-net","ports":{"http":9080}}}}"#;

        let event = serde_json::from_str::<WatchEvent<WorkloadEntry>>(input).unwrap();
        let WatchEvent::Added(entry) = event else {
            panic!("expect added event");
        };

        assert_eq!(entry.metadata.name, "vm-1");
        assert_eq!(entry.spec.address, "10.0.0.5");
        assert_eq!(entry.spec.ports["http"], 9080);
        assert_eq!(entry.spec.service_account, "bookinfo-ratings");
    }

    #[test]
    fn missing_spec() {
        let input = r#"{"metadata":{"name":"broken"}}"#;

        let entry = serde_json::from_str::<WorkloadEntry>(input).unwrap();
        assert!(entry.spec.address.is_empty());
    }
}
