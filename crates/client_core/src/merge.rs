use std::collections::HashSet;

use shared::domain::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Prepend; the batch is older than everything cached.
    Older,
    /// Append; the batch is newer than everything cached.
    Newer,
}

/// Drops every message whose hash is already in `known`, or repeats an earlier
/// message of the same batch. Accepted hashes are added to `known`; batch order
/// is kept.
pub fn retain_unseen(known: &mut HashSet<String>, batch: Vec<Message>) -> Vec<Message> {
    batch
        .into_iter()
        .filter(|message| known.insert(message.hash.clone()))
        .collect()
}
