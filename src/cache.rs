//! Opt-in memoization of call results keyed by argument hash.
//!
//! This is a correctness cache: it avoids repeating expensive queries for
//! structurally identical arguments. There is no TTL, no size bound, and no
//! eviction beyond explicit [`RpcCacheManager::clear`]. The allow-list of
//! cacheable function names can be replaced at runtime, because cacheability
//! metadata may arrive from the remote after the cache is constructed.

// Rust guideline compliant 2026-03

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::hash::arg_hash;

/// Produces the cache key for one call.
pub type KeySerializer = Arc<dyn Fn(&str, &[Value]) -> String + Send + Sync>;

/// Runtime-replaceable cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Names of functions whose results may be cached.
    pub functions: Vec<String>,
}

struct CacheInner {
    functions: HashSet<String>,
    entries: HashMap<String, HashMap<String, Value>>,
}

/// Per-function result cache with a replaceable allow-list.
pub struct RpcCacheManager {
    inner: Mutex<CacheInner>,
    serializer: KeySerializer,
}

impl std::fmt::Debug for RpcCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("cache poisoned");
        f.debug_struct("RpcCacheManager")
            .field("functions", &inner.functions)
            .field("cached_functions", &inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl RpcCacheManager {
    /// Create a cache with the default key serializer (structural arg hash).
    pub fn new(options: CacheOptions) -> Self {
        Self::with_serializer(options, Arc::new(|_, args| arg_hash(args)))
    }

    /// Create a cache with a custom key serializer.
    pub fn with_serializer(options: CacheOptions, serializer: KeySerializer) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                functions: options.functions.into_iter().collect(),
                entries: HashMap::new(),
            }),
            serializer,
        }
    }

    /// Whether results for this function name may be cached.
    pub fn validate(&self, name: &str) -> bool {
        self.inner
            .lock()
            .expect("cache poisoned")
            .functions
            .contains(name)
    }

    /// Replace the allow-list. Existing entries are kept; entries for names
    /// no longer allow-listed simply stop being served.
    pub fn update_options(&self, options: CacheOptions) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        inner.functions = options.functions.into_iter().collect();
    }

    /// Store a response under `(name, key(args))`.
    pub fn apply(&self, name: &str, args: &[Value], response: Value) {
        let key = (self.serializer)(name, args);
        let mut inner = self.inner.lock().expect("cache poisoned");
        inner
            .entries
            .entry(name.to_string())
            .or_default()
            .insert(key, response);
    }

    /// Look up a cached response. A miss (or a non-allow-listed name) is
    /// `None`, never an error.
    pub fn cached(&self, name: &str, args: &[Value]) -> Option<Value> {
        let key = (self.serializer)(name, args);
        let inner = self.inner.lock().expect("cache poisoned");
        if !inner.functions.contains(name) {
            return None;
        }
        inner.entries.get(name)?.get(&key).cloned()
    }

    /// Evict one function's entries, or everything when `name` is `None`.
    pub fn clear(&self, name: Option<&str>) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        match name {
            Some(name) => {
                inner.entries.remove(name);
            }
            None => inner.entries.clear(),
        }
    }
}
