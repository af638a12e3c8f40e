//! Key/value cache that splits large values across several keys.
//!
//! Hosted caches cap the size of a single entry, so a value whose JSON form is
//! longer than `chunk_size` characters is stored as numbered chunks plus a small
//! manifest under the original key. Reads treat a missing chunk or an
//! undecodable value as a miss. There is no locking: a read racing a write can
//! see an incomplete chunk set and will simply miss.

use crate::config::CacheConfig;
use crate::error::Result;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const MANIFEST_PREFIX: &str = "__chunked__:";

pub trait KeyValueBackend {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&mut self, key: &str, value: String, ttl: Duration);

    fn remove(&mut self, key: &str);
}

/// Process-local backend with per-entry expiry. A TTL too large to represent
/// as an `Instant` never expires.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: HashMap<String, (String, Option<Instant>)>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|(_, expires_at)| is_live(*expires_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueBackend for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|(_, expires_at)| is_live(*expires_at, Instant::now()))
            .map(|(value, _)| value.clone())
    }

    fn put(&mut self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now().checked_add(ttl)));
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| at > now)
}

impl<B: KeyValueBackend + ?Sized> KeyValueBackend for Box<B> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: String, ttl: Duration) {
        (**self).put(key, value, ttl)
    }

    fn remove(&mut self, key: &str) {
        (**self).remove(key)
    }
}

pub struct ChunkedCache<B: KeyValueBackend> {
    backend: B,
    chunk_size: usize,
    ttl: Duration,
}

impl<B: KeyValueBackend> ChunkedCache<B> {
    pub fn new(backend: B, config: &CacheConfig) -> Self {
        Self {
            backend,
            chunk_size: config.chunk_size.max(1),
            ttl: Duration::from_secs(config.ttl_seconds),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn chunk_key(key: &str, index: usize) -> String {
        format!("{}__chunk_{}", key, index)
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.remove(key);

        if json.chars().count() <= self.chunk_size {
            self.backend.put(key, json, self.ttl);
            return Ok(());
        }

        let chars: Vec<char> = json.chars().collect();
        let chunks: Vec<String> = chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect())
            .collect();
        let count = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            self.backend
                .put(&Self::chunk_key(key, index), chunk, self.ttl);
        }
        // manifest last, so a reader never finds it before its chunks
        self.backend
            .put(key, format!("{}{}", MANIFEST_PREFIX, count), self.ttl);

        debug!("Stored '{}' as {} chunk(s)", key, count);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let raw = self.backend.get(key)?;

        let json = match chunk_count(&raw) {
            Some(count) => {
                let mut joined = String::new();
                for index in 0..count {
                    match self.backend.get(&Self::chunk_key(key, index)) {
                        Some(chunk) => joined.push_str(&chunk),
                        None => {
                            debug!("Chunk {} of '{}' is missing; treating as a miss", index, key);
                            return None;
                        }
                    }
                }
                joined
            }
            None => raw,
        };

        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry '{}': {}", key, e);
                self.remove(key);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(count) = self.backend.get(key).as_deref().and_then(chunk_count) {
            for index in 0..count {
                self.backend.remove(&Self::chunk_key(key, index));
            }
        }
        self.backend.remove(key);
    }
}

fn chunk_count(raw: &str) -> Option<usize> {
    raw.strip_prefix(MANIFEST_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackOfficeConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        title: String,
        values: Vec<i64>,
    }

    fn payload() -> Payload {
        Payload {
            title: "Año de ventas, señal fuerte".to_string(),
            values: (0..40).collect(),
        }
    }

    fn cache(chunk_size: usize) -> ChunkedCache<MemoryKv> {
        let config = CacheConfig {
            chunk_size,
            ..CacheConfig::default()
        };
        ChunkedCache::new(MemoryKv::new(), &config)
    }

    #[test]
    fn test_small_value_stored_directly() {
        let mut cache = cache(10_000);
        cache.put("k", &payload()).unwrap();

        assert_eq!(cache.backend().len(), 1);
        assert_eq!(cache.get::<Payload>("k"), Some(payload()));
    }

    #[test]
    fn test_chunked_round_trip() {
        let mut cache = cache(16);
        cache.put("k", &payload()).unwrap();

        let raw = cache.backend().get("k").unwrap();
        let count = chunk_count(&raw).unwrap();
        assert!(count > 1);
        assert_eq!(cache.backend().len(), count + 1);

        assert_eq!(cache.get::<Payload>("k"), Some(payload()));
    }

    #[test]
    fn test_missing_chunk_is_a_miss() {
        let mut cache = cache(16);
        cache.put("k", &payload()).unwrap();
        cache
            .backend_mut()
            .remove(&ChunkedCache::<MemoryKv>::chunk_key("k", 1));

        assert_eq!(cache.get::<Payload>("k"), None);
    }

    #[test]
    fn test_corrupt_entry_is_removed() {
        let mut cache = cache(1_000);
        cache
            .backend_mut()
            .put("k", "{not json".to_string(), Duration::from_secs(60));

        assert_eq!(cache.get::<Payload>("k"), None);
        assert!(cache.backend().get("k").is_none());
    }

    #[test]
    fn test_remove_deletes_chunks() {
        let mut cache = cache(16);
        cache.put("k", &payload()).unwrap();
        cache.remove("k");

        assert!(cache.backend().is_empty());
        assert_eq!(cache.get::<Payload>("k"), None);
    }

    #[test]
    fn test_overwrite_with_smaller_value_clears_old_chunks() {
        let mut cache = cache(16);
        cache.put("k", &payload()).unwrap();
        cache.put("k", &vec![1, 2]).unwrap();

        assert_eq!(cache.backend().len(), 1);
        assert_eq!(cache.get::<Vec<i32>>("k"), Some(vec![1, 2]));
    }

    #[test]
    fn test_entries_expire() {
        let config = CacheConfig {
            ttl_seconds: 0,
            ..CacheConfig::default()
        };
        let mut cache = ChunkedCache::new(MemoryKv::new(), &config);
        cache.put("k", &payload()).unwrap();

        assert_eq!(cache.get::<Payload>("k"), None);
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let config =
            BackOfficeConfig::from_json_str(r#"{"cache": {"ttl_seconds": 18446744073709551615}}"#)
                .unwrap();
        let mut cache = ChunkedCache::new(MemoryKv::new(), &config.cache);
        cache.put("k", &1u32).unwrap();

        assert_eq!(cache.backend().len(), 1);
        assert_eq!(cache.get::<u32>("k"), Some(1));
    }
}
