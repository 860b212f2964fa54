//! Pending-request registry: one entry per outstanding correlation token.
//!
//! An entry is created when a command is deferred behind a payment prompt and
//! destroyed exactly once, either by the callback dispatcher (delivery) or by
//! the expiry reaper (sweep). `take` is the only consuming read; a second
//! concurrent `take` for the same token always loses.

use crate::channels::DeliveryTarget;
use crate::worker::RequestParams;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Injected time source so expiry is testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed `Clock` used everywhere outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Mint an unguessable single-use correlation token.
///
/// Shape: `{conversation}-{unix_millis}-{hex(16 CSPRNG bytes)}`. The random
/// component alone carries the unguessability; the prefix exists for log
/// legibility.
pub fn mint_token(conversation_id: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);

    format!("{conversation_id}-{millis}-{}", hex::encode(random))
}

/// Everything needed to deliver the eventual result back to the conversation
/// that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub target: DeliveryTarget,
    pub params: RequestParams,
    /// Message id of the payment prompt, cleaned up after delivery.
    pub prompt_message_id: Option<String>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// `put` with a token that is already live. Tokens are minted fresh per
    /// request, so this is a programming error, never a legitimate overwrite.
    #[error("correlation token already registered")]
    Duplicate,
    /// Token absent, already consumed, or past its expiry.
    #[error("unknown or expired correlation token")]
    NotFound,
}

/// Process-local map of outstanding tokens. All access goes through one
/// mutex so check-then-mutate is atomic without external coordination.
pub struct PendingRegistry {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh pending entry. Never overwrites.
    pub fn put(&self, token: &str, entry: PendingEntry) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(token) {
            return Err(RegistryError::Duplicate);
        }
        entries.insert(token.to_owned(), entry);
        Ok(())
    }

    /// Atomically return-and-remove the entry for `token`. Exactly one
    /// concurrent caller can succeed; everyone else sees `NotFound`.
    /// An expired entry that the reaper has not swept yet is also `NotFound`
    /// (and is dropped here rather than handed out).
    pub fn take(&self, token: &str) -> Result<PendingEntry, RegistryError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.remove(token) {
            Some(entry) if entry.expires_at > now => Ok(entry),
            Some(_) => Err(RegistryError::NotFound),
            None => Err(RegistryError::NotFound),
        }
    }

    /// Attach the payment-prompt message id to a still-live entry. A miss is
    /// fine: the entry may already have been consumed or swept.
    pub fn set_prompt_message(&self, token: &str, message_id: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(token) {
            entry.prompt_message_id = Some(message_id.to_owned());
        }
    }

    /// Drop every entry whose expiry has passed. Returns how many were
    /// removed, counted under the same lock as the removal.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Build an entry expiring `ttl` from now on the given clock.
pub fn pending_entry(
    clock: &dyn Clock,
    target: DeliveryTarget,
    params: RequestParams,
    ttl: Duration,
) -> PendingEntry {
    let now = clock.now();
    PendingEntry {
        target,
        params,
        prompt_message_id: None,
        created_at: now,
        expires_at: now + ttl,
    }
}


#[cfg(test)]
mod tests {
    use super::test_clock::ManualClock;
    use super::*;
    use crate::channels::{DeliveryTarget, Platform};

    fn target() -> DeliveryTarget {
        DeliveryTarget {
            platform: Platform::Telegram,
            conversation_id: "12345".into(),
            interaction_token: None,
        }
    }

    fn entry(clock: &dyn Clock, ttl_secs: u64) -> PendingEntry {
        pending_entry(
            clock,
            target(),
            RequestParams::Summarise {
                lookback_minutes: 60,
            },
            Duration::from_secs(ttl_secs),
        )
    }

    #[test]
    fn minted_tokens_are_unique_and_prefixed() {
        let a = mint_token("chat1");
        let b = mint_token("chat1");
        assert_ne!(a, b);
        assert!(a.starts_with("chat1-"));
        // 16 random bytes hex-encoded
        assert_eq!(a.rsplit('-').next().unwrap().len(), 32);
    }

    #[test]
    fn put_then_take_round_trips() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 60)).unwrap();

        let taken = registry.take("tok").unwrap();
        assert_eq!(taken.target.conversation_id, "12345");
        assert!(registry.is_empty());
    }

    #[test]
    fn put_duplicate_token_is_an_error() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 60)).unwrap();
        assert_eq!(
            registry.put("tok", entry(&*clock, 60)),
            Err(RegistryError::Duplicate)
        );
    }

    #[test]
    fn take_succeeds_at_most_once() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 60)).unwrap();

        assert!(registry.take("tok").is_ok());
        assert_eq!(registry.take("tok"), Err(RegistryError::NotFound));
    }

    #[test]
    fn concurrent_take_has_exactly_one_winner() {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(PendingRegistry::new(clock.clone()));
        registry.put("tok", entry(&*clock, 60)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.take("tok").is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn take_unknown_token_is_not_found() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock);
        assert_eq!(registry.take("abc123"), Err(RegistryError::NotFound));
    }

    #[test]
    fn expired_entry_is_not_found_even_before_sweep() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 30)).unwrap();

        clock.advance(Duration::from_secs(31));
        assert_eq!(registry.take("tok"), Err(RegistryError::NotFound));
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("short", entry(&*clock, 30)).unwrap();
        registry.put("long", entry(&*clock, 120)).unwrap();

        clock.advance(Duration::from_secs(60));
        registry.sweep(clock.now());

        assert_eq!(registry.len(), 1);
        assert!(registry.take("long").is_ok());
    }

    #[test]
    fn sweep_counts_only_what_it_removed() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("short", entry(&*clock, 30)).unwrap();
        registry.put("long", entry(&*clock, 120)).unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(registry.sweep(clock.now()), 1);

        // Entries inserted after the last sweep don't distort the count.
        registry.put("fresh", entry(&*clock, 120)).unwrap();
        assert_eq!(registry.sweep(clock.now()), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn entry_unreachable_after_sweep() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 30)).unwrap();

        clock.advance(Duration::from_secs(31));
        registry.sweep(clock.now());
        assert_eq!(registry.take("tok"), Err(RegistryError::NotFound));
        assert!(registry.is_empty());
    }

    #[test]
    fn prompt_message_id_recorded_on_live_entry() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 60)).unwrap();

        registry.set_prompt_message("tok", "msg-99");
        let taken = registry.take("tok").unwrap();
        assert_eq!(taken.prompt_message_id.as_deref(), Some("msg-99"));
    }

    #[test]
    fn prompt_message_id_on_consumed_entry_is_a_no_op() {
        let clock = Arc::new(ManualClock::new());
        let registry = PendingRegistry::new(clock.clone());
        registry.put("tok", entry(&*clock, 60)).unwrap();
        registry.take("tok").unwrap();

        registry.set_prompt_message("tok", "msg-99");
        assert!(registry.is_empty());
    }
}
