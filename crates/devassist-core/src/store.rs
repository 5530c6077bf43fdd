//! Key-value store abstraction backing the response cache and usage counters.

use core::mem;
use core::time::Duration;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::sync::IgnoreLock as _;

/// Shared key-value store with per-key expiry.
///
/// Implementations must make each operation atomic on its own; callers never
/// hold locks across operations.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a string value.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the key holds a list.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a string value, replacing whatever the key held.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Adds `delta` to a numeric value (missing keys count as zero) and
    /// refreshes its expiry. Returns the new total.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the value is not numeric.
    async fn incr_by_float(&self, key: &str, delta: f64, ttl: Option<Duration>)
    -> StoreResult<f64>;

    /// Appends to a list and refreshes its expiry.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the key holds a scalar.
    async fn push(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Reads a whole list; missing keys read as empty.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable or the key holds a scalar.
    async fn list(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Removes a key. Returns whether it existed.
    ///
    /// # Errors
    /// Returns an error if the store is unreachable.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: StoredValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-process store for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock_ignore_poison()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the entry if it has expired, then hands back whatever is left.
    fn live_entry<'map>(
        entries: &'map mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'map mut Entry> {
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn corrupt(key: &str, reason: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_owned(),
        reason: reason.to_owned(),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock_ignore_poison();
        match Self::live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(StoredValue::Text(text)) => Ok(Some(text.clone())),
            Some(StoredValue::Number(number)) => Ok(Some(number.to_string())),
            Some(StoredValue::List(_)) => Err(corrupt(key, "expected a scalar, found a list")),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries
            .lock_ignore_poison()
            .insert(key.to_owned(), Entry::new(StoredValue::Text(value), ttl));
        Ok(())
    }

    async fn incr_by_float(
        &self,
        key: &str,
        delta: f64,
        ttl: Option<Duration>,
    ) -> StoreResult<f64> {
        let mut entries = self.entries.lock_ignore_poison();
        let current = match Self::live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => 0.0,
            Some(StoredValue::Number(number)) => *number,
            Some(StoredValue::Text(text)) => text
                .parse::<f64>()
                .map_err(|error| corrupt(key, &format!("not a number: {error}")))?,
            Some(StoredValue::List(_)) => {
                return Err(corrupt(key, "expected a number, found a list"));
            }
        };
        let total = current + delta;
        entries.insert(key.to_owned(), Entry::new(StoredValue::Number(total), ttl));
        Ok(total)
    }

    async fn push(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.entries.lock_ignore_poison();
        let mut items = match Self::live_entry(&mut entries, key).map(|entry| &mut entry.value) {
            None => Vec::new(),
            Some(StoredValue::List(items)) => mem::take(items),
            Some(StoredValue::Text(_) | StoredValue::Number(_)) => {
                return Err(corrupt(key, "expected a list, found a scalar"));
            }
        };
        items.push(value);
        entries.insert(key.to_owned(), Entry::new(StoredValue::List(items), ttl));
        Ok(())
    }

    async fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock_ignore_poison();
        match Self::live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::List(items)) => Ok(items.clone()),
            Some(StoredValue::Text(_) | StoredValue::Number(_)) => {
                Err(corrupt(key, "expected a list, found a scalar"))
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock_ignore_poison();
        let existed = Self::live_entry(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }
}
