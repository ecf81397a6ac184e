use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// ObjectMeta is metadata that all persisted resources must have, which includes
/// all objects users must create.
///
/// Only the fields this crate needs are kept, everything else is dropped when
/// an object is read, which is fine for the server since it fills defaults back
/// on update.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#objectmeta-v1-meta
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ObjectMeta {
    /// Name must be unique within a namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Namespace defines the space within which each name must be unique. An
    /// empty namespace is equivalent to the "default" namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// UID is the unique in time and space value for this object. It is
    /// populated by the system.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// An opaque value that represents the internal version of this object.
    /// Sending it back on update lets the server reject writes based on a stale
    /// read.
    #[serde(
        default,
        rename = "resourceVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// ListMeta describes metadata that synthetic resources must have, including
/// lists and various status objects.
#[derive(Debug, Default, Deserialize)]
pub struct ListMeta {
    /// continue may be set if the user set a limit on the number of items returned.
    #[serde(default, deserialize_with = "non_empty")]
    pub r#continue: Option<String>,

    /// String that identifies the server's internal version of this object.
    #[serde(default, rename = "resourceVersion", deserialize_with = "non_empty")]
    pub resource_version: Option<String>,
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_continue_is_none() {
        let meta: ListMeta =
            serde_json::from_str(r#"{"continue": "", "resourceVersion": "12"}"#).unwrap();
        assert_eq!(meta.r#continue, None);
        assert_eq!(meta.resource_version.as_deref(), Some("12"));
    }

    #[test]
    fn skip_empty_fields() {
        let meta = ObjectMeta {
            name: "file-sd-config".to_string(),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_string(&meta).unwrap(),
            r#"{"name":"file-sd-config"}"#
        );
    }
}
