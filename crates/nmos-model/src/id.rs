//! Resource identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resource identifier, the canonical string form of a UUID.
///
/// Ids are either random (one per process run) or derived from a configured
/// seed so that a node presents stable ids across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Generates a fresh random (v4) id.
    pub fn random() -> Self {
        ResourceId(Uuid::new_v4().to_string())
    }

    /// Derives a repeatable (v5) id from a seed and a resource name.
    ///
    /// The same seed and name always produce the same id, which keeps the
    /// node's identity stable across restarts.
    pub fn from_seed(seed: &str, name: &str) -> Self {
        let derived = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}/{}", seed, name).as_bytes());
        ResourceId(derived.to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        ResourceId(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId(value.to_string())
    }
}
