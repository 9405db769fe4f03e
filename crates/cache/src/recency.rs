//! Recency index: hash map plus intrusive doubly linked list
//!
//! Nodes live in a flat `Vec` and link to each other by index, with fixed
//! head and tail sentinels so unlink/relink never branch on list ends.
//! Every operation except iteration is O(1).
//!
//! Order is most recently used at the head, least recently used at the tail.

use crate::error::InvariantViolation;
use std::collections::HashMap;
use std::hash::Hash;

const HEAD: usize = 0;
const TAIL: usize = 1;
/// Link value of a node that is not in the list
const UNLINKED: usize = usize::MAX;

struct Node<K, V> {
    entry: Option<(K, V)>,
    prev: usize,
    next: usize,
}

impl<K, V> Node<K, V> {
    fn sentinel() -> Self {
        Self {
            entry: None,
            prev: UNLINKED,
            next: UNLINKED,
        }
    }
}

/// Map from key to value ordered by recency of use
pub struct RecencyIndex<K, V> {
    nodes: Vec<Node<K, V>>,
    slots: HashMap<K, usize>,
    /// Node indices free for reuse
    vacant: Vec<usize>,
}

impl<K: Copy + Eq + Hash, V> RecencyIndex<K, V> {
    pub fn new() -> Self {
        let mut nodes = vec![Node::sentinel(), Node::sentinel()];
        nodes[HEAD].next = TAIL;
        nodes[TAIL].prev = HEAD;
        Self {
            nodes,
            slots: HashMap::new(),
            vacant: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Look up a value without changing its position
    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = *self.slots.get(key)?;
        self.nodes[slot].entry.as_ref().map(|(_, value)| value)
    }

    /// Mutable lookup without changing position
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.slots.get(key)?;
        self.nodes[slot].entry.as_mut().map(|(_, value)| value)
    }

    /// Move `key` to the head. Returns `false` if it is absent.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.slots.get(key) {
            Some(&slot) => {
                self.unlink(slot);
                self.link_front(slot);
                true
            }
            None => false,
        }
    }

    /// Insert at the head, replacing and returning any previous value for `key`
    pub fn push_front(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&slot) = self.slots.get(&key) {
            let old = self.nodes[slot].entry.replace((key, value));
            self.unlink(slot);
            self.link_front(slot);
            return old.map(|(_, value)| value);
        }

        let node = Node {
            entry: Some((key, value)),
            prev: UNLINKED,
            next: UNLINKED,
        };
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.slots.insert(key, slot);
        self.link_front(slot);
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.release(slot).map(|(_, value)| value)
    }

    /// Least recently used entry
    pub fn peek_back(&self) -> Option<(&K, &V)> {
        self.nodes[self.nodes[TAIL].prev]
            .entry
            .as_ref()
            .map(|(key, value)| (key, value))
    }

    /// Remove and return the least recently used entry
    pub fn pop_back(&mut self) -> Option<(K, V)> {
        let slot = self.nodes[TAIL].prev;
        if slot == HEAD {
            return None;
        }
        let entry = self.release(slot)?;
        self.slots.remove(&entry.0);
        Some(entry)
    }

    /// Entries from most to least recently used
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            nodes: &self.nodes,
            cursor: self.nodes[HEAD].next,
        }
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(key, _)| *key)
    }

    /// Remove every entry, least recently used first
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_back() {
            drained.push(entry);
        }
        drained
    }

    /// Verify the list and the map describe the same set of entries
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let broken = |message: String| Err(InvariantViolation::RecencyList(message));

        let mut count = 0;
        let mut prev = HEAD;
        let mut cursor = self.nodes[HEAD].next;
        while cursor != TAIL {
            if cursor == UNLINKED || cursor >= self.nodes.len() {
                return broken(format!("dangling link {cursor} after node {prev}"));
            }
            let node = &self.nodes[cursor];
            if node.prev != prev {
                return broken(format!("node {cursor} links back to {} not {prev}", node.prev));
            }
            let Some((key, _)) = &node.entry else {
                return broken(format!("node {cursor} in list has no entry"));
            };
            if self.slots.get(key) != Some(&cursor) {
                return broken(format!("node {cursor} is not indexed by its key"));
            }
            count += 1;
            if count > self.slots.len() {
                return broken("list is longer than the map".to_string());
            }
            prev = cursor;
            cursor = node.next;
        }

        if self.nodes[TAIL].prev != prev {
            return broken("tail sentinel does not point at last node".to_string());
        }
        if count != self.slots.len() {
            return broken(format!("list has {count} nodes, map has {}", self.slots.len()));
        }
        Ok(())
    }

    fn unlink(&mut self, slot: usize) {
        let Node { prev, next, .. } = self.nodes[slot];
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[slot].prev = UNLINKED;
        self.nodes[slot].next = UNLINKED;
    }

    fn link_front(&mut self, slot: usize) {
        let first = self.nodes[HEAD].next;
        self.nodes[slot].prev = HEAD;
        self.nodes[slot].next = first;
        self.nodes[first].prev = slot;
        self.nodes[HEAD].next = slot;
    }

    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        self.unlink(slot);
        self.vacant.push(slot);
        self.nodes[slot].entry.take()
    }
}

impl<K: Copy + Eq + Hash, V> Default for RecencyIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [`RecencyIndex`] from most to least recently used
pub struct Iter<'a, K, V> {
    nodes: &'a [Node<K, V>],
    cursor: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == TAIL || self.cursor == UNLINKED {
            return None;
        }
        let node = &self.nodes[self.cursor];
        self.cursor = node.next;
        node.entry.as_ref().map(|(key, value)| (key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(index: &RecencyIndex<u32, &'static str>) -> Vec<u32> {
        index.keys().collect()
    }

    #[test]
    fn test_push_front_orders_mru_first() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");
        index.push_front(3, "c");

        assert_eq!(order(&index), vec![3, 2, 1]);
        assert_eq!(index.len(), 3);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_touch_moves_to_front() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");
        index.push_front(3, "c");

        assert!(index.touch(&1));
        assert_eq!(order(&index), vec![1, 3, 2]);
        assert!(!index.touch(&99));
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_pop_back_returns_lru() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");
        index.touch(&1);

        assert_eq!(index.peek_back(), Some((&2, &"b")));
        assert_eq!(index.pop_back(), Some((2, "b")));
        assert_eq!(index.pop_back(), Some((1, "a")));
        assert_eq!(index.pop_back(), None);
        assert!(index.is_empty());
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_push_existing_key_replaces_and_moves() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");

        assert_eq!(index.push_front(1, "z"), Some("a"));
        assert_eq!(order(&index), vec![1, 2]);
        assert_eq!(index.get(&1), Some(&"z"));
        assert_eq!(index.len(), 2);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_from_middle() {
        let mut index = RecencyIndex::new();
        for key in 0..5 {
            index.push_front(key, "x");
        }

        assert_eq!(index.remove(&2), Some("x"));
        assert_eq!(index.remove(&2), None);
        assert_eq!(order(&index), vec![4, 3, 1, 0]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_slots_are_reused() {
        let mut index = RecencyIndex::new();
        for key in 0..100 {
            index.push_front(key, "x");
            if key >= 3 {
                index.pop_back();
            }
        }

        assert_eq!(index.len(), 3);
        // Two sentinels plus at most four live or vacant slots
        assert!(index.nodes.len() <= 6);
        assert_eq!(order(&index), vec![99, 98, 97]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_get_does_not_reorder() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");

        assert_eq!(index.get(&1), Some(&"a"));
        if let Some(value) = index.get_mut(&1) {
            *value = "aa";
        }
        assert_eq!(order(&index), vec![2, 1]);
        assert_eq!(index.get(&1), Some(&"aa"));
    }

    #[test]
    fn test_drain_empties_lru_first() {
        let mut index = RecencyIndex::new();
        index.push_front(1, "a");
        index.push_front(2, "b");
        index.push_front(3, "c");

        let drained: Vec<u32> = index.drain().into_iter().map(|(key, _)| key).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(index.is_empty());
        index.check_invariants().unwrap();
    }
}
