//! Per-conversation pagination state for `/more`.
//!
//! A search delivery materializes the full result set once; follow-up "more"
//! requests walk it with a forward-only offset instead of re-running (and
//! re-charging) the worker. One live entry per conversation; a new search
//! replaces the old entry wholesale, unconsumed offset included.

use crate::registry::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PaginationEntry {
    pub items: Vec<String>,
    pub topic: String,
    pub location: Option<String>,
    /// Index of the first not-yet-shown item. Only ever moves forward.
    pub offset: usize,
    pub expires_at: Instant,
}

/// Result of a `/more` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    Page { items: Vec<String>, remaining: usize },
    /// Offset already at or past the end. Not an error; the caller turns
    /// this into a friendly "seen everything" message.
    Exhausted,
}

pub struct PaginationStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, PaginationEntry>>,
}

impl PaginationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Install the materialized result set for a conversation, replacing any
    /// prior entry.
    pub fn replace(&self, conversation_id: &str, entry: PaginationEntry) {
        self.entries.lock().insert(conversation_id.to_owned(), entry);
    }

    pub fn get(&self, conversation_id: &str) -> Option<PaginationEntry> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(conversation_id)
            .filter(|entry| entry.expires_at > now)
            .cloned()
    }

    /// Return the next page and advance the offset by the number of items
    /// returned. `None` means no live entry for this conversation.
    pub fn advance(&self, conversation_id: &str, page_size: usize) -> Option<NextPage> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(conversation_id)
            .filter(|entry| entry.expires_at > now)?;

        if entry.offset >= entry.items.len() {
            return Some(NextPage::Exhausted);
        }

        let end = (entry.offset + page_size.max(1)).min(entry.items.len());
        let items = entry.items[entry.offset..end].to_vec();
        entry.offset = end;
        Some(NextPage::Page {
            items,
            remaining: entry.items.len() - end,
        })
    }

    /// Drop expired entries, returning the number removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Build an entry whose first page has already been shown in the delivery
/// message, so the offset starts past it.
pub fn materialized_entry(
    clock: &dyn Clock,
    items: Vec<String>,
    topic: String,
    location: Option<String>,
    shown: usize,
    ttl: Duration,
) -> PaginationEntry {
    let offset = shown.min(items.len());
    PaginationEntry {
        items,
        topic,
        location,
        offset,
        expires_at: clock.now() + ttl,
    }
}
