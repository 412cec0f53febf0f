use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use qce_core::message::{MessageElement, RawMessage};

/// Minimal record of a previously seen message, enough to synthesise a reply
/// preview without keeping whole messages alive.
#[derive(Debug, Clone)]
pub struct IndexedMessage {
    pub msg_id: String,
    pub msg_seq: i64,
    pub client_seq: Option<i64>,
    pub sender_name: String,
    pub elements: Vec<MessageElement>,
}

/// How many leading elements are worth keeping for a preview.
const PREVIEW_ELEMENTS: usize = 4;

/// LRU index for reply resolution.
///
/// Keyed by message id, with sequence and client-sequence side tables kept in
/// lock-step (entries evicted from the LRU are removed from both). Bounded so
/// a 100k-message export cannot grow it past `capacity`.
pub struct ReplyIndex {
    by_id: LruCache<String, IndexedMessage>,
    seq_to_id: HashMap<i64, String>,
    client_seq_to_id: HashMap<i64, String>,
}

impl ReplyIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            seq_to_id: HashMap::new(),
            client_seq_to_id: HashMap::new(),
        }
    }

    pub fn insert(&mut self, raw: &RawMessage, sender_name: &str) {
        if raw.msg_id.is_empty() {
            return;
        }
        let entry = IndexedMessage {
            msg_id: raw.msg_id.clone(),
            msg_seq: raw.msg_seq,
            client_seq: raw.client_seq,
            sender_name: sender_name.to_string(),
            elements: raw.elements.iter().take(PREVIEW_ELEMENTS).cloned().collect(),
        };
        self.seq_to_id.insert(raw.msg_seq, raw.msg_id.clone());
        if let Some(cs) = raw.client_seq {
            self.client_seq_to_id.insert(cs, raw.msg_id.clone());
        }
        if let Some((_, evicted)) = self.by_id.push(raw.msg_id.clone(), entry) {
            // push returns the displaced entry; drop its side-table keys so
            // the maps stay bounded by the LRU capacity.
            if evicted.msg_id != raw.msg_id {
                if self.seq_to_id.get(&evicted.msg_seq).map(String::as_str)
                    == Some(evicted.msg_id.as_str())
                {
                    self.seq_to_id.remove(&evicted.msg_seq);
                }
                if let Some(cs) = evicted.client_seq {
                    if self.client_seq_to_id.get(&cs).map(String::as_str)
                        == Some(evicted.msg_id.as_str())
                    {
                        self.client_seq_to_id.remove(&cs);
                    }
                }
            }
        }
    }

    pub fn get_by_id(&mut self, msg_id: &str) -> Option<IndexedMessage> {
        self.by_id.get(msg_id).cloned()
    }

    pub fn get_by_seq(&mut self, seq: i64) -> Option<IndexedMessage> {
        let id = self.seq_to_id.get(&seq)?.clone();
        self.by_id.get(&id).cloned()
    }

    pub fn get_by_client_seq(&mut self, client_seq: i64) -> Option<IndexedMessage> {
        let id = self.client_seq_to_id.get(&client_seq)?.clone();
        self.by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qce_core::message::MessageElement;

    fn raw(id: &str, seq: i64, client_seq: Option<i64>) -> RawMessage {
        RawMessage {
            msg_id: id.to_string(),
            msg_seq: seq,
            client_seq,
            elements: vec![MessageElement::text(format!("text {id}"))],
            ..Default::default()
        }
    }

    #[test]
    fn lookup_by_all_three_keys() {
        let mut idx = ReplyIndex::new(10);
        idx.insert(&raw("A", 100, Some(7)), "alice");
        assert_eq!(idx.get_by_id("A").unwrap().sender_name, "alice");
        assert_eq!(idx.get_by_seq(100).unwrap().msg_id, "A");
        assert_eq!(idx.get_by_client_seq(7).unwrap().msg_id, "A");
        assert!(idx.get_by_seq(999).is_none());
    }

    #[test]
    fn eviction_cleans_side_tables() {
        let mut idx = ReplyIndex::new(2);
        idx.insert(&raw("A", 1, Some(11)), "a");
        idx.insert(&raw("B", 2, Some(12)), "b");
        idx.insert(&raw("C", 3, Some(13)), "c"); // evicts A
        assert_eq!(idx.len(), 2);
        assert!(idx.get_by_id("A").is_none());
        assert!(idx.get_by_seq(1).is_none());
        assert!(idx.get_by_client_seq(11).is_none());
        assert!(idx.get_by_seq(3).is_some());
    }
}
