//! Process-wide instance registry.
//!
//! Keys are compared structurally: an entry is addressed by the content hash
//! of the key's serialized form, so two keys serializing identically share
//! one slot. Entries live for the whole process; there is no eviction.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// A process-lifetime cache of shared instances.
#[derive(Default)]
pub struct Registry {
    entries: DashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    fn key_hash<K: Serialize + ?Sized>(key: &K) -> u64 {
        let serialized = serde_json::to_string(key).unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        serialized.hash(&mut hasher);
        hasher.finish()
    }

    /// Looks up a stored instance; `None` when absent or of another type.
    pub fn get<T, K>(&self, key: &K) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
    {
        let entry = self.entries.get(&Self::key_hash(key))?;
        Arc::clone(entry.value()).downcast::<T>().ok()
    }

    /// Stores an instance under `key`, replacing any previous entry, and
    /// hands it back.
    pub fn set<T, K>(&self, key: &K, value: Arc<T>) -> Arc<T>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
    {
        self.entries.insert(
            Self::key_hash(key),
            Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
        );
        value
    }

    /// Returns the stored instance, creating it atomically when absent. A
    /// stored entry of another type is replaced.
    pub fn get_or_insert_with<T, K>(&self, key: &K, init: impl FnOnce() -> Arc<T>) -> Arc<T>
    where
        T: Send + Sync + 'static,
        K: Serialize + ?Sized,
    {
        let hash = Self::key_hash(key);
        if let Some(existing) = self
            .entries
            .get(&hash)
            .and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
        {
            return existing;
        }
        let created = init();
        let mut entry = self
            .entries
            .entry(hash)
            .or_insert_with(|| Arc::clone(&created) as Arc<dyn Any + Send + Sync>);
        match Arc::clone(entry.value()).downcast::<T>() {
            // ours, or a racing insert of the right type
            Ok(value) => value,
            Err(_) => {
                *entry.value_mut() = Arc::clone(&created) as Arc<dyn Any + Send + Sync>;
                created
            }
        }
    }
}
