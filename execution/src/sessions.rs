use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;
use wagerbook_types::LedgerError;

/// Lifetime of a session token.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Live player sessions kept before the oldest is evicted.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Live admin sessions kept before the oldest is evicted.
pub const DEFAULT_MAX_ADMIN_SESSIONS: usize = 64;

struct Entry<V> {
    value: V,
    issued: Instant,
}

/// Opaque bearer tokens with a fixed lifetime and a bounded table.
///
/// Expired tokens never resolve. They are pruned whenever a new token is issued; when the
/// table is still full after pruning, the oldest token is evicted.
pub struct SessionTable<V> {
    ttl: Duration,
    max: usize,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone> SessionTable<V> {
    pub fn new(ttl: Duration, max: usize) -> Self {
        Self {
            ttl,
            max: max.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.issued) < self.ttl
    }

    /// Issues a fresh token for `value`.
    pub fn open(&self, value: V) -> Result<String, LedgerError> {
        let token = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::StoreUnavailable("session table poisoned".into()))?;
        entries.retain(|_, entry| self.is_live(entry, now));
        while entries.len() >= self.max {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.issued)
                .map(|(token, _)| token.clone());
            match oldest {
                Some(oldest) => {
                    debug!("evicting oldest session");
                    entries.remove(&oldest);
                }
                None => break,
            }
        }
        entries.insert(
            token.clone(),
            Entry {
                value,
                issued: now,
            },
        );
        Ok(token)
    }

    pub fn get(&self, token: &str) -> Option<V> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(token)?;
        self.is_live(entry, Instant::now())
            .then(|| entry.value.clone())
    }

    pub fn remove(&self, token: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(token);
        }
    }

    /// Tokens held, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for SessionTable<V> {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL, DEFAULT_MAX_SESSIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_get_remove() {
        let table = SessionTable::default();
        let token = table.open("amy").unwrap();
        assert_eq!(table.get(&token), Some("amy"));
        assert_eq!(table.get("unknown"), None);
        table.remove(&token);
        assert_eq!(table.get(&token), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_expired_tokens_do_not_resolve() {
        let table = SessionTable::new(Duration::ZERO, 8);
        let token = table.open(1u8).unwrap();
        assert_eq!(table.get(&token), None);

        // Issuing prunes what has expired.
        table.open(2u8).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let table = SessionTable::new(DEFAULT_SESSION_TTL, 2);
        let first = table.open("first").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = table.open("second").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let third = table.open("third").unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&first), None);
        assert_eq!(table.get(&second), Some("second"));
        assert_eq!(table.get(&third), Some("third"));
    }
}
