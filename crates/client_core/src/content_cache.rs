use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

/// Parsed message bodies keyed by content hash.
///
/// Bodies are immutable, so entries never expire; the whole cache is dropped on
/// disconnect. Callers asking for a hash that is already being fetched wait on
/// the in-flight request instead of issuing another one.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: HashMap<String, Value>,
    pending: HashMap<String, Vec<oneshot::Sender<Option<Value>>>>,
}

#[derive(Debug)]
pub enum ContentLookup {
    Cached(Value),
    /// Not cached yet. `waiter` yields the fetch result; when `fetch` is set
    /// the caller is the first to ask and must fetch, then call
    /// [`ContentCache::complete`].
    Pending {
        waiter: oneshot::Receiver<Option<Value>>,
        fetch: bool,
    },
}

impl ContentCache {
    pub fn lookup(&mut self, hash: &str) -> ContentLookup {
        if let Some(value) = self.entries.get(hash) {
            return ContentLookup::Cached(value.clone());
        }
        let (tx, waiter) = oneshot::channel();
        let fetch = !self.pending.contains_key(hash);
        self.pending.entry(hash.to_string()).or_default().push(tx);
        ContentLookup::Pending { waiter, fetch }
    }

    /// Finishes a fetch. A successful value is stored; every waiter receives
    /// the same result.
    pub fn complete(&mut self, hash: &str, value: Option<Value>) {
        if let Some(value) = &value {
            self.entries.insert(hash.to_string(), value.clone());
        }
        for waiter in self.pending.remove(hash).unwrap_or_default() {
            let _ = waiter.send(value.clone());
        }
    }

    /// Drops all entries. Pending waiters observe a closed channel.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pending(lookup: ContentLookup) -> (oneshot::Receiver<Option<Value>>, bool) {
        match lookup {
            ContentLookup::Pending { waiter, fetch } => (waiter, fetch),
            ContentLookup::Cached(value) => panic!("unexpected cached value {value}"),
        }
    }

    #[test]
    fn only_first_lookup_fetches_and_all_waiters_get_the_value() {
        let mut cache = ContentCache::default();
        let (mut first, first_fetches) = pending(cache.lookup("h"));
        let (mut second, second_fetches) = pending(cache.lookup("h"));
        assert!(first_fetches);
        assert!(!second_fetches);

        cache.complete("h", Some(json!({"content": "hi"})));
        assert_eq!(first.try_recv().expect("first"), Some(json!({"content": "hi"})));
        assert_eq!(second.try_recv().expect("second"), Some(json!({"content": "hi"})));
        assert!(matches!(
            cache.lookup("h"),
            ContentLookup::Cached(value) if value == json!({"content": "hi"})
        ));
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let mut cache = ContentCache::default();
        let (mut waiter, _) = pending(cache.lookup("h"));
        cache.complete("h", None);
        assert_eq!(waiter.try_recv().expect("result"), None);

        let (_, fetch) = pending(cache.lookup("h"));
        assert!(fetch);
    }

    #[test]
    fn clear_drops_waiters() {
        let mut cache = ContentCache::default();
        let (mut waiter, _) = pending(cache.lookup("h"));
        cache.clear();
        assert!(waiter.try_recv().is_err());
    }
}
