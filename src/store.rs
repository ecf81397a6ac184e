//! Where the target list lives between reconciliation passes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kubernetes::{Client, ConfigMap};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("get document {name} failed, {source}")]
    Get {
        name: String,
        source: kubernetes::Error,
    },

    #[error("create document {name} failed, {source}")]
    Create {
        name: String,
        source: kubernetes::Error,
    },

    #[error("update document {name} failed, {source}")]
    Update {
        name: String,
        source: kubernetes::Error,
    },
}

impl StoreError {
    /// The write was rejected because the document changed since it was read.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Update { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

/// A fetched copy of the persisted document. The key holding the target list
/// is fixed when the document is fetched, other keys are carried along
/// untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    config_map: ConfigMap,
    key: String,
}

impl Document {
    pub fn new(config_map: ConfigMap, key: impl Into<String>) -> Self {
        Document {
            config_map,
            key: key.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config_map.metadata.name
    }

    /// The serialized target list, `None` if the key is missing.
    pub fn text(&self) -> Option<&str> {
        self.config_map.data.get(&self.key).map(String::as_str)
    }

    pub fn set_text(&mut self, text: String) {
        self.config_map.data.insert(self.key.clone(), text);
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.config_map.metadata.resource_version.as_deref()
    }

    pub fn into_inner(self) -> ConfigMap {
        self.config_map
    }
}

/// A named document in a namespace, both are bound when the store is built.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the document, or create it with an empty target list if it
    /// does not exist yet.
    async fn get_or_create(&self) -> Result<Document, StoreError>;

    /// Overwrite the stored document with `document`.
    async fn update(&self, document: Document) -> Result<(), StoreError>;
}

/// The initial content of the target list key.
pub const EMPTY_TARGET_LIST: &str = "[]";

/// Stores the target list in a ConfigMap.
pub struct KubernetesStore {
    client: Client,
    name: String,
    key: String,
}

impl KubernetesStore {
    /// `client` must be scoped to the namespace of the ConfigMap.
    pub fn new(client: Client, name: impl Into<String>, key: impl Into<String>) -> Self {
        KubernetesStore {
            client,
            name: name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl DocumentStore for KubernetesStore {
    async fn get_or_create(&self) -> Result<Document, StoreError> {
        let found = self
            .client
            .get::<ConfigMap>(&self.name)
            .await
            .map_err(|source| StoreError::Get {
                name: self.name.clone(),
                source,
            })?;
        if let Some(config_map) = found {
            return Ok(Document::new(config_map, self.key.as_str()));
        }

        let data = BTreeMap::from([(self.key.clone(), EMPTY_TARGET_LIST.to_string())]);
        let created = self
            .client
            .create(&ConfigMap::new(self.name.as_str(), data))
            .await
            .map_err(|source| StoreError::Create {
                name: self.name.clone(),
                source,
            })?;

        info!(
            message = "document created",
            name = %self.name,
            namespace = self.client.namespace().unwrap_or_default(),
        );

        Ok(Document::new(created, self.key.as_str()))
    }

    async fn update(&self, document: Document) -> Result<(), StoreError> {
        // the resource version read by `get_or_create` is sent back, so a
        // concurrent write in between makes the server answer 409
        self.client
            .replace(&self.name, &document.into_inner())
            .await
            .map(|_| ())
            .map_err(|source| StoreError::Update {
                name: self.name.clone(),
                source,
            })
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
