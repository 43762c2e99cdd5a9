//! Bounded write-back string cache.
//!
//! Values live in memory until the total character count goes over the
//! configured limit. Overflow is handled immediately: entries are scanned
//! oldest first, clean entries are dropped, dirty entries are written to the
//! persistence layer and dropped only once the write succeeded.

use crate::persistence::StringPersistence;
use parking_lot::Mutex;
use quarry_core::{OrderedMap, Result};
use serde::{Deserialize, Serialize};

/// Default character budget.
pub const DEFAULT_MAX_CHARS: usize = 10 * 1024;

/// Configuration for [`WriteBackStringCache`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringCacheConfig {
    /// Maximum resident characters. Zero means the default.
    pub max_chars: usize,
}

impl Default for StringCacheConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl StringCacheConfig {
    /// The effective limit.
    pub fn effective_max_chars(&self) -> usize {
        if self.max_chars == 0 {
            DEFAULT_MAX_CHARS
        } else {
            self.max_chars
        }
    }
}

#[derive(Debug)]
struct CachedString {
    value: Option<String>,
    dirty: bool,
}

impl CachedString {
    fn chars(&self) -> usize {
        self.value.as_deref().map_or(0, char_len)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

struct State {
    entries: OrderedMap<CachedString>,
    chars: usize,
}

/// A write-back cache of string values in front of a [`StringPersistence`].
pub struct WriteBackStringCache<P> {
    persistence: P,
    max_chars: usize,
    state: Mutex<State>,
}

impl<P: StringPersistence> WriteBackStringCache<P> {
    /// Creates a cache with the default character budget.
    pub fn new(persistence: P) -> Self {
        Self::with_config(persistence, &StringCacheConfig::default())
    }

    pub fn with_config(persistence: P, config: &StringCacheConfig) -> Self {
        Self {
            persistence,
            max_chars: config.effective_max_chars(),
            state: Mutex::new(State {
                entries: OrderedMap::new(),
                chars: 0,
            }),
        }
    }

    /// Stores `value` under `key` in memory, to be persisted later.
    pub fn save(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let mut state = self.state.lock();
        let added = char_len(&value);
        let removed = match state.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.chars();
                entry.value = Some(value);
                entry.dirty = true;
                old
            }
            None => {
                state.entries.insert(
                    key,
                    CachedString {
                        value: Some(value),
                        dirty: true,
                    },
                );
                0
            }
        };
        state.chars = state.chars - removed + added;
        if state.chars > self.max_chars {
            self.evict_overflow(&mut state);
        }
    }

    /// Returns the value for `key`, loading it from persistence on a miss.
    ///
    /// A missing value is cached as well so repeated lookups stay in memory.
    pub fn obtain(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(key) {
            return Ok(entry.value.clone());
        }
        let loaded = self.persistence.load(key)?;
        let added = loaded.as_deref().map_or(0, char_len);
        state.entries.insert(
            key,
            CachedString {
                value: loaded.clone(),
                dirty: false,
            },
        );
        state.chars += added;
        if state.chars > self.max_chars {
            self.evict_overflow(&mut state);
        }
        Ok(loaded)
    }

    /// Persists every dirty entry and drops everything that is safe to drop.
    ///
    /// Returns true when nothing is left resident.
    pub fn flush(&self) -> bool {
        let mut state = self.state.lock();
        for key in state.entries.keys() {
            self.try_drop(&mut state, &key);
        }
        tracing::debug!(resident = state.entries.len(), chars = state.chars, "flushed string cache");
        state.chars == 0
    }

    /// Characters currently resident.
    pub fn char_count(&self) -> usize {
        self.state.lock().chars
    }

    /// Keys currently resident, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys()
    }

    /// Returns true if `key` is resident and not yet persisted.
    pub fn is_dirty(&self, key: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(key)
            .map_or(false, |e| e.dirty)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// The persistence layer.
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    fn evict_overflow(&self, state: &mut State) {
        let before = state.chars;
        for key in state.entries.keys() {
            if state.chars <= self.max_chars {
                break;
            }
            self.try_drop(state, &key);
        }
        tracing::debug!(before, after = state.chars, max = self.max_chars, "string cache overflow");
    }

    /// Drops `key`, persisting it first if dirty. Kept resident on failure.
    fn try_drop(&self, state: &mut State, key: &str) {
        let Some(entry) = state.entries.get(key) else {
            return;
        };
        if entry.dirty {
            let value = entry.value.as_deref().unwrap_or_default();
            if let Err(e) = self.persistence.save(key, value) {
                tracing::warn!(key = %key, error = %e, "failed to persist string, keeping it resident");
                return;
            }
        }
        if let Some(entry) = state.entries.remove(key) {
            state.chars -= entry.chars();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use parking_lot::Mutex as PlMutex;
    use quarry_core::Error;
    use std::sync::Arc;

    fn cache(max_chars: usize) -> WriteBackStringCache<Arc<MemoryPersistence>> {
        WriteBackStringCache::with_config(
            Arc::new(MemoryPersistence::new()),
            &StringCacheConfig { max_chars },
        )
    }

    /// Persistence that refuses writes for chosen keys.
    struct Flaky {
        inner: MemoryPersistence,
        refuse: PlMutex<Vec<String>>,
    }

    impl StringPersistence for Flaky {
        fn save(&self, key: &str, value: &str) -> Result<()> {
            if self.refuse.lock().iter().any(|k| k == key) {
                return Err(Error::persistence(key, "disk full"));
            }
            self.inner.save(key, value)
        }

        fn load(&self, key: &str) -> Result<Option<String>> {
            self.inner.load(key)
        }
    }

    #[test]
    fn test_config_zero_falls_back() {
        assert_eq!(StringCacheConfig { max_chars: 0 }.effective_max_chars(), DEFAULT_MAX_CHARS);
        assert_eq!(StringCacheConfig::default().max_chars, 10240);
    }

    #[test]
    fn test_save_and_obtain_from_memory() {
        let c = cache(100);
        c.save("a", "hello");
        assert_eq!(c.obtain("a").unwrap().as_deref(), Some("hello"));
        assert_eq!(c.char_count(), 5);
        assert!(c.is_dirty("a"));
        assert_eq!(c.persistence().save_count(), 0);
    }

    #[test]
    fn test_save_replaces_and_recounts() {
        let c = cache(100);
        c.save("a", "hello");
        c.save("a", "hi");
        assert_eq!(c.char_count(), 2);
        assert_eq!(c.keys(), vec!["a"]);
    }

    #[test]
    fn test_chars_are_unicode_scalars() {
        let c = cache(100);
        c.save("a", "héllo");
        assert_eq!(c.char_count(), 5);
    }

    #[test]
    fn test_overflow_persists_oldest_first() {
        let c = cache(10);
        c.save("a", "aaaa");
        c.save("b", "bbbb");
        c.save("c", "cccc");
        // 12 > 10: "a" is written and dropped.
        assert_eq!(c.keys(), vec!["b", "c"]);
        assert_eq!(c.char_count(), 8);
        assert_eq!(c.persistence().stored("a").as_deref(), Some("aaaa"));
        assert_eq!(c.obtain("a").unwrap().as_deref(), Some("aaaa"));
    }

    #[test]
    fn test_obtain_miss_caches_absent() {
        let c = cache(10);
        assert_eq!(c.obtain("nothing").unwrap(), None);
        assert_eq!(c.keys(), vec!["nothing"]);
        assert_eq!(c.char_count(), 0);
        assert!(!c.is_dirty("nothing"));
    }

    #[test]
    fn test_overflow_keeps_entries_that_fail_to_persist() {
        let flaky = Flaky {
            inner: MemoryPersistence::new(),
            refuse: PlMutex::new(vec!["a".to_string()]),
        };
        let c = WriteBackStringCache::with_config(flaky, &StringCacheConfig { max_chars: 6 });
        c.save("a", "aaaa");
        c.save("b", "bbbb");
        assert_eq!(c.keys(), vec!["a"]);
        assert_eq!(c.char_count(), 4);
        assert!(c.is_dirty("a"));

        assert!(!c.flush());
        c.persistence().refuse.lock().clear();
        assert!(c.flush());
        assert_eq!(c.persistence().inner.stored("a").as_deref(), Some("aaaa"));
    }

    #[test]
    fn test_flush_empties_cache() {
        let c = cache(100);
        c.save("a", "x");
        c.obtain("b").unwrap();
        assert!(c.flush());
        assert!(c.keys().is_empty());
        assert_eq!(c.persistence().save_count(), 1);
    }
}
