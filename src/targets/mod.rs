//! The Prometheus `file_sd_configs` document.
//!
//! A document is a JSON array of groups, each one lists its scrape targets
//! under `targets`, for example
//!
//! ```json
//! [{"targets": ["10.0.0.5:15020"]}, {"targets": ["10.0.0.6:15020"]}]
//! ```
//!
//! Keys other than `targets` (e.g. `labels` added by hand) are kept as they
//! are, so a read/write cycle does not lose them.

mod dedup;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use dedup::{DedupStrategy, deduplicate};

/// A scrape endpoint, `host:port`
pub type Target = String;

#[derive(Debug, thiserror::Error)]
#[error("decode target list failed, {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Debug, thiserror::Error)]
#[error("encode target list failed, {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Format the scrape target of a workload address, IPv6 addresses are
/// bracketed.
pub fn target_of(address: &str, port: u16) -> Target {
    if is_bare_ipv6(address) {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

/// The targets a workload may already be listed under. Besides [`target_of`],
/// an IPv6 address may appear unbracketed (`fd00::5:15020`), as documents
/// written before bracketing was introduced hold it.
pub fn known_targets(address: &str, port: u16) -> Vec<Target> {
    let mut targets = vec![target_of(address, port)];
    if is_bare_ipv6(address) {
        targets.push(format!("{address}:{port}"));
    }

    targets
}

fn is_bare_ipv6(address: &str) -> bool {
    address.contains(':') && !address.starts_with('[')
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TargetGroup {
    #[serde(default)]
    pub targets: Vec<Target>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TargetGroup {
    pub fn new(target: Target) -> Self {
        TargetGroup {
            targets: vec![target],
            extra: Map::new(),
        }
    }

    pub fn contains(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TargetList {
    groups: Vec<TargetGroup>,
}

impl From<Vec<TargetGroup>> for TargetList {
    fn from(groups: Vec<TargetGroup>) -> Self {
        TargetList { groups }
    }
}

impl FromIterator<TargetGroup> for TargetList {
    fn from_iter<T: IntoIterator<Item = TargetGroup>>(iter: T) -> Self {
        TargetList {
            groups: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TargetList {
    type Item = TargetGroup;
    type IntoIter = std::vec::IntoIter<TargetGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl TargetList {
    /// Decode a document. Blank text is an empty list, it is what a freshly
    /// created ConfigMap key may hold.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        if text.trim().is_empty() {
            return Ok(TargetList::default());
        }

        serde_json::from_str::<Vec<TargetGroup>>(text)
            .map(TargetList::from)
            .map_err(DecodeError)
    }

    pub fn encode(&self) -> Result<String, EncodeError> {
        serde_json::to_string(self).map_err(EncodeError)
    }

    pub fn groups(&self) -> &[TargetGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Whether any group lists `target`.
    pub fn contains(&self, target: &str) -> bool {
        self.groups.iter().any(|group| group.contains(target))
    }

    pub fn push(&mut self, group: TargetGroup) {
        self.groups.push(group);
    }

    /// Remove the first group which lists any of `candidates`, and return it.
    pub fn remove_first(&mut self, candidates: &[&str]) -> Option<TargetGroup> {
        let index = self
            .groups
            .iter()
            .position(|group| candidates.iter().any(|c| group.contains(c)))?;

        Some(self.groups.remove(index))
    }
}
