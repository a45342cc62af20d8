// Message reconciliation
// Merges fetched history and live events into one id-keyed mapping and
// derives per-conversation views from it on demand.

use log::{debug, info};
use std::collections::HashMap;

use crate::models::{Identity, Message};

/// Unordered pair of identities naming one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    low: Identity,
    high: Identity,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        ConversationKey {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.low == identity || self.high == identity
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    // Position of the first ingestion of this id; survives overwrites
    seq: u64,
    message: Message,
}

/// All messages known for the current identity, keyed by backend id.
#[derive(Debug, Default)]
pub struct Reconciler {
    identity: Option<Identity>,
    messages: HashMap<i64, Entry>,
    next_seq: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Bind the mapping to `identity`. The mapping is only cleared when the
    /// identity actually changes.
    pub fn reset(&mut self, identity: &str) {
        if self.identity.as_deref() == Some(identity) {
            return;
        }
        info!(
            "Reconciler switching identity {:?} -> {} (dropping {} messages)",
            self.identity,
            identity,
            self.messages.len()
        );
        self.identity = Some(identity.to_string());
        self.messages.clear();
        self.next_seq = 0;
    }

    /// Merge one fetched history page. Called once per active-contact change;
    /// late pages for a previous conversation are merged the same way.
    pub fn ingest_history<I>(&mut self, conversation: &ConversationKey, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        let mut count = 0usize;
        for message in messages {
            self.merge(message);
            count += 1;
        }
        debug!("Merged {} history messages for {}", count, conversation);
    }

    /// Merge one live message. Same rule as history: the newest copy of an id
    /// replaces the stored one, except that its status is never lowered.
    pub fn ingest_event(&mut self, message: Message) {
        self.merge(message);
    }

    /// Last-write-wins by id for every field but `status`, which only moves
    /// forward along sent, delivered, seen. An overwrite keeps the original
    /// insertion position.
    fn merge(&mut self, mut message: Message) {
        match self.messages.get_mut(&message.id) {
            Some(entry) => {
                // A stale copy (e.g. a history page fetched before the seen
                // event) must not roll the delivery chain back.
                if message.status < entry.message.status {
                    message.status = entry.message.status;
                } else if message.status != entry.message.status {
                    debug!(
                        "Message {} status {:?} -> {:?}",
                        message.id, entry.message.status, message.status
                    );
                }
                entry.message = message;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.messages.insert(message.id, Entry { seq, message });
            }
        }
    }

    /// Messages exchanged between `identity` and `contact`, oldest first.
    ///
    /// Ties on timestamp fall back to insertion order. Timestamps that fail
    /// to parse sort before every parseable one.
    pub fn conversation_view(&self, identity: &str, contact: &str) -> Vec<Message> {
        let mut entries: Vec<(&Entry, Option<chrono::DateTime<chrono::Utc>>)> = self
            .messages
            .values()
            .filter(|entry| entry.message.is_between(identity, contact))
            .map(|entry| (entry, entry.message.parsed_timestamp()))
            .collect();

        entries.sort_by(|(a, ts_a), (b, ts_b)| ts_a.cmp(ts_b).then(a.seq.cmp(&b.seq)));
        entries.into_iter().map(|(entry, _)| entry.message.clone()).collect()
    }

    pub fn get(&self, id: i64) -> Option<&Message> {
        self.messages.get(&id).map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
