use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use parking_lot::RwLock;

/// A fixed-capacity map that evicts its oldest entry once full.
///
/// Eviction order is insertion order. Replacing the value of a key that is
/// already present keeps the key in its original position.
///
/// Reads (`get`, `len`, `contains_key`) share a read lock and may run in
/// parallel. `put` and `remove` take the write lock, so each is observed
/// either entirely or not at all.
pub struct BoundedCache<K, V> {
    capacity: usize,
    inner: RwLock<Inner<K, V>>,
}

struct Inner<K, V> {
    next_seq: u64,
    entries: HashMap<K, (u64, V)>,
    order: BTreeMap<u64, K>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn insert(&mut self, capacity: usize, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.entries.get_mut(&key) {
            slot.1 = value;
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, (seq, value));

        if self.entries.len() > capacity {
            let (_, oldest) = self.order.pop_first()?;
            return self.entries.remove(&oldest).map(|(_, v)| v);
        }
        None
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                next_seq: 0,
                entries: HashMap::with_capacity(capacity),
                order: BTreeMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace `key`, returning the value evicted to make room.
    ///
    /// Only inserting a new key can evict. The evicted entry is always the
    /// oldest one still present.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(self.capacity, key, value)
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.write();
        let (seq, value) = inner.entries.remove(key)?;
        inner.order.remove(&seq);
        Some(value)
    }

    /// Number of live entries. Never exceeds [`capacity`](Self::capacity).
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.read().entries.contains_key(key)
    }
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.read().entries.get(key).map(|(_, v)| v.clone())
    }

    /// Return the cached value for `key`, computing and inserting it if absent.
    ///
    /// The flag is true when this call inserted the value. `make` runs at most
    /// once per absent key even under contention: the presence check is
    /// repeated under the write lock before it is called. `make` runs with the
    /// write lock held and must not touch this cache.
    pub fn get_or_insert_with<Q>(&self, key: &Q, make: impl FnOnce() -> V) -> (V, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(value) = self.get(key) {
            return (value, false);
        }

        let mut inner = self.inner.write();
        if let Some((_, value)) = inner.entries.get(key) {
            return (value.clone(), false);
        }
        let value = make();
        inner.insert(self.capacity, key.to_owned(), value.clone());
        (value, true)
    }
}
