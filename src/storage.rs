/*!
 * In-memory key-value store with lazy + sampled expiration.
 *
 * A single-threaded `HashMap` over an ahash hasher (no `DashMap`/sharded
 * locking here — the event loop that owns this store is single-threaded
 * by design, see spec §5). Memory accounting is an incrementally
 * maintained counter rather than a recomputed sum, updated at every
 * mutator per spec invariant I1.
 */

use hashbrown::HashMap;
use rand::seq::index::sample;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::glob::glob_match;

/// Per-entry fixed overhead added to `cost(k, v)` (spec §3, invariant I1).
const ENTRY_OVERHEAD: usize = 64;

/// Tag identifying the shape of a value. Only `String` is ever produced
/// by the implemented command set; the others exist to answer `TYPE` and
/// to support a future type system (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    String,
    List,
    Set,
    Hash,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::List => "list",
            TypeTag::Set => "set",
            TypeTag::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    type_tag: TypeTag,
    /// Absolute expiry, seconds since epoch (fractional allowed). `None`
    /// means the key never expires.
    expiry: Option<f64>,
}

fn cost(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The key-value store. Not `Send`/`Sync` — owned by a single event loop.
pub struct DataStore {
    entries: HashMap<Vec<u8>, Entry, ahash::RandomState>,
    memory_usage: usize,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::default(),
            memory_usage: 0,
        }
    }

    /// Set `key` to `value`, overwriting any previous entry. `expiry` is an
    /// absolute unix timestamp in seconds, or `None` for no expiry.
    pub fn set(&mut self, key: &[u8], value: Vec<u8>, expiry: Option<f64>) {
        if let Some(old) = self.entries.get(key) {
            self.memory_usage -= cost(key, &old.value);
        }
        self.memory_usage += cost(key, &value);
        self.entries.insert(
            key.to_vec(),
            Entry {
                value,
                type_tag: TypeTag::String,
                expiry,
            },
        );
    }

    /// Internal helper used by `set`/recovery to store a pre-typed entry
    /// without re-deriving the type tag (always `String` in this command
    /// set, but kept distinct so future type support has a seam).
    fn set_raw(&mut self, key: Vec<u8>, value: Vec<u8>, type_tag: TypeTag, expiry: Option<f64>) {
        if let Some(old) = self.entries.get(&key) {
            self.memory_usage -= cost(&key, &old.value);
        }
        self.memory_usage += cost(&key, &value);
        self.entries.insert(
            key,
            Entry {
                value,
                type_tag,
                expiry,
            },
        );
    }

    /// True if present and (if it has an expiry) not yet expired. Removes
    /// the entry as a side effect when it has expired (lazy expiration,
    /// invariant I2).
    fn is_valid(&mut self, key: &[u8]) -> bool {
        let expired = match self.entries.get(key) {
            None => return false,
            Some(e) => matches!(e.expiry, Some(exp) if exp <= now_secs()),
        };
        if expired {
            self.remove_entry(key);
            false
        } else {
            true
        }
    }

    fn remove_entry(&mut self, key: &[u8]) {
        if let Some(e) = self.entries.remove(key) {
            self.memory_usage -= cost(key, &e.value);
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        if !self.is_valid(key) {
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn delete(&mut self, keys: &[&[u8]]) -> i64 {
        let mut count = 0i64;
        for key in keys {
            if self.entries.contains_key(*key) {
                self.remove_entry(key);
                count += 1;
            }
        }
        count
    }

    pub fn exists(&mut self, keys: &[&[u8]]) -> i64 {
        keys.iter().filter(|k| self.is_valid(k)).count() as i64
    }

    /// All keys matching `pattern` (default `"*"`, fast path skips the
    /// glob filter entirely). Removes any expired keys encountered along
    /// the way.
    pub fn keys(&mut self, pattern: &str) -> Vec<Vec<u8>> {
        let now = now_secs();
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.expiry, Some(exp) if exp <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.remove_entry(k);
        }

        if pattern == "*" {
            return self.entries.keys().cloned().collect();
        }
        self.entries
            .keys()
            .filter(|k| {
                std::str::from_utf8(k)
                    .map(|s| glob_match(pattern, s))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn flush(&mut self) {
        self.entries.clear();
        self.memory_usage = 0;
    }

    pub fn expire(&mut self, key: &[u8], seconds: i64) -> bool {
        if !self.is_valid(key) {
            return false;
        }
        let exp = now_secs() + seconds as f64;
        if let Some(e) = self.entries.get_mut(key) {
            e.expiry = Some(exp);
        }
        true
    }

    pub fn expire_at(&mut self, key: &[u8], unix_ts: i64) -> bool {
        if !self.is_valid(key) {
            return false;
        }
        if let Some(e) = self.entries.get_mut(key) {
            e.expiry = Some(unix_ts as f64);
        }
        true
    }

    /// Seconds remaining: -2 absent/expired, -1 no expiry, else floor of
    /// remaining whole seconds.
    pub fn ttl(&mut self, key: &[u8]) -> i64 {
        if !self.is_valid(key) {
            return -2;
        }
        match self.entries.get(key).and_then(|e| e.expiry) {
            None => -1,
            Some(exp) => (exp - now_secs()).floor() as i64,
        }
    }

    /// Same as `ttl` but in milliseconds.
    pub fn pttl(&mut self, key: &[u8]) -> i64 {
        if !self.is_valid(key) {
            return -2;
        }
        match self.entries.get(key).and_then(|e| e.expiry) {
            None => -1,
            Some(exp) => ((exp - now_secs()) * 1000.0).floor() as i64,
        }
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        if !self.is_valid(key) {
            return false;
        }
        if let Some(e) = self.entries.get_mut(key) {
            e.expiry = None;
        }
        true
    }

    pub fn get_type(&mut self, key: &[u8]) -> &'static str {
        if !self.is_valid(key) {
            return "none";
        }
        self.entries.get(key).map(|e| e.type_tag.as_str()).unwrap_or("none")
    }

    pub fn get_memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sample up to `min(20, N)` keys uniformly at random without
    /// replacement and remove any that have expired. Returns the count
    /// removed (spec §4.2).
    pub fn cleanup_expired_keys(&mut self) -> usize {
        let n = self.entries.len();
        if n == 0 {
            return 0;
        }
        let sample_size = n.min(20);
        let keys: Vec<Vec<u8>> = self.entries.keys().cloned().collect();
        let mut rng = rand::thread_rng();
        let indices = sample(&mut rng, n, sample_size);

        let now = now_secs();
        let mut removed = 0;
        for idx in indices.iter() {
            let key = &keys[idx];
            if matches!(self.entries.get(key.as_slice()).and_then(|e| e.expiry), Some(exp) if exp <= now)
            {
                self.remove_entry(key);
                removed += 1;
            }
        }
        removed
    }

    /// Iterate over all *live* entries without mutating — used by the RDB
    /// snapshot and AOF rewrite paths, which need a read-only view that
    /// doesn't evict expired keys mid-iteration.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<u8>, TypeTag, Option<f64>)> {
        let now = now_secs();
        self.entries
            .iter()
            .filter(|(_, e)| !matches!(e.expiry, Some(exp) if exp <= now))
            .map(|(k, e)| (k.clone(), e.value.clone(), e.type_tag, e.expiry))
            .collect()
    }

    /// Load a raw entry, bypassing cost deltas on overwrite logic subtlety
    /// checks — used by recovery and RDB load, which populate a store that
    /// starts empty.
    pub fn load_raw(&mut self, key: Vec<u8>, value: Vec<u8>, type_tag: TypeTag, expiry: Option<f64>) {
        self.set_raw(key, value, type_tag, expiry);
    }
}
