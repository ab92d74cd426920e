//! Fixed-capacity LRU: a slot arena threaded by an intrusive doubly linked
//! list, plus a key → slot index. All operations are O(1) except
//! [`LruArena::remove_where`].

use std::collections::HashMap;
use std::hash::Hash;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub(crate) struct LruArena<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    index: HashMap<K, usize>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used.
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Clone + Eq + Hash, V> LruArena<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Insert or replace `key` as most recently used. Returns the entry
    /// evicted to make room, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            self.unlink(idx);
            self.push_front(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_back()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|slot| slot.value)
    }

    /// Remove every entry matching `predicate`; returns how many went.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&K, &V) -> bool) -> usize {
        let doomed: Vec<K> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| predicate(&slot.key, &slot.value))
            .map(|slot| slot.key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    #[cfg(test)]
    pub fn keys_mru(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.slots[idx].as_ref() {
                Some(slot) => {
                    keys.push(slot.key.clone());
                    cursor = slot.next;
                }
                None => break,
            }
        }
        keys
    }

    fn pop_back(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.unlink(idx);
        self.free.push(idx);
        let slot = self.slots[idx].take()?;
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(slot) = self.slots[h].as_mut() {
                slot.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}
