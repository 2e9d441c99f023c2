use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Concurrency-safe keyed store behind a single reader/writer lock.
///
/// Inserts and removals are atomic with respect to lookups; no caller ever
/// observes a half-mutated entry. Not chat-specific: values are cloned out,
/// so `V` is typically an `Arc`.
pub struct Registry<K, V> {
    items: RwLock<HashMap<K, V>>,
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let items = self.items.read().await;
        items.get(key).cloned()
    }

    pub async fn set(&self, key: K, value: V) {
        let mut items = self.items.write().await;
        items.insert(key, value);
    }

    /// Removes an entry, returning the stored value if it existed.
    pub async fn delete(&self, key: &K) -> Option<V> {
        let mut items = self.items.write().await;
        items.remove(key)
    }

    pub async fn keys(&self) -> Vec<K> {
        let items = self.items.read().await;
        items.keys().cloned().collect()
    }

    pub async fn values(&self) -> Vec<V> {
        let items = self.items.read().await;
        items.values().cloned().collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
