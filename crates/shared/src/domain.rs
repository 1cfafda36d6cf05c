use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A channel message as delivered by `channel.get`.
///
/// `hash` is the content address and the dedup key. `key` is the opaque token
/// the server accepts as an "older than" / "newer than" boundary. Any other
/// field the server sends is kept verbatim in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub hash: String,
    pub key: String,
    /// Server ordering hint. Never interpreted client-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Value>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(hash: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            key: key.into(),
            seq: None,
            payload: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    List,
    File,
}

/// One row of a directory listing, as exposed to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub hash: String,
    pub size: u64,
    pub kind: EntryKind,
    pub name: String,
}
