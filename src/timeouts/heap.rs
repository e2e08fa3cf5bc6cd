//! Binary min-heap of deadlines with removal and re-keying by key.
//!
//! A position index maps each key to its slot in the heap, so `insert`
//! (including moving an existing key), `remove` and `pop_due` are all
//! O(log n) and a key is never present twice.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Node<K> {
    deadline: Instant,
    key: K,
}

#[derive(Debug)]
pub struct KeyedHeap<K> {
    nodes: Vec<Node<K>>,
    positions: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash> KeyedHeap<K> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.positions.get(key).map(|&pos| self.nodes[pos].deadline)
    }

    /// Insert `key`, or move it to `deadline` if already present.
    pub fn insert(&mut self, key: K, deadline: Instant) {
        if let Some(&pos) = self.positions.get(&key) {
            let previous = self.nodes[pos].deadline;
            self.nodes[pos].deadline = deadline;
            if deadline < previous {
                self.sift_up(pos);
            } else {
                self.sift_down(pos);
            }
            return;
        }

        let pos = self.nodes.len();
        self.nodes.push(Node { deadline, key });
        self.positions.insert(key, pos);
        self.sift_up(pos);
    }

    /// Remove `key`, returning its deadline if it was present.
    pub fn remove(&mut self, key: &K) -> Option<Instant> {
        let pos = self.positions.remove(key)?;
        let removed = self.nodes.swap_remove(pos);

        if pos < self.nodes.len() {
            let moved = self.nodes[pos].key;
            self.positions.insert(moved, pos);
            if pos > 0 && self.nodes[pos].deadline < self.nodes[(pos - 1) / 2].deadline {
                self.sift_up(pos);
            } else {
                self.sift_down(pos);
            }
        }

        Some(removed.deadline)
    }

    /// Earliest entry, without removing it.
    pub fn peek(&self) -> Option<(K, Instant)> {
        self.nodes.first().map(|node| (node.key, node.deadline))
    }

    /// Remove and return the earliest entry if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(K, Instant)> {
        let (key, deadline) = self.peek()?;
        if deadline > now {
            return None;
        }
        self.remove(&key);
        Some((key, deadline))
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.nodes[pos].deadline >= self.nodes[parent].deadline {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.nodes[right].deadline < self.nodes[left].deadline {
                right
            } else {
                left
            };
            if self.nodes[child].deadline >= self.nodes[pos].deadline {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.nodes.swap(a, b);
        self.positions.insert(self.nodes[a].key, a);
        self.positions.insert(self.nodes[b].key, b);
    }
}

impl<K: Copy + Eq + Hash> Default for KeyedHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn secs(base: Instant, s: u64) -> Instant {
        base + Duration::from_secs(s)
    }

    fn drain(heap: &mut KeyedHeap<u32>, now: Instant) -> Vec<u32> {
        let mut keys = Vec::new();
        while let Some((key, _)) = heap.pop_due(now) {
            keys.push(key);
        }
        keys
    }

    #[test]
    fn pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = KeyedHeap::new();
        for (key, s) in [(1, 50), (2, 10), (3, 30), (4, 20), (5, 40), (6, 0)] {
            heap.insert(key, secs(base, s));
        }

        assert_eq!(heap.len(), 6);
        assert_eq!(drain(&mut heap, secs(base, 100)), vec![6, 2, 4, 3, 5, 1]);
        assert!(heap.is_empty());
    }

    #[test]
    fn pop_due_stops_at_now() {
        let base = Instant::now();
        let mut heap = KeyedHeap::new();
        heap.insert(1, secs(base, 5));
        heap.insert(2, secs(base, 6));

        assert_eq!(drain(&mut heap, secs(base, 4)), Vec::<u32>::new());
        assert_eq!(drain(&mut heap, secs(base, 5)), vec![1]);
        assert_eq!(heap.peek().map(|(k, _)| k), Some(2));
    }

    #[test]
    fn reinsert_moves_existing_key() {
        let base = Instant::now();
        let mut heap = KeyedHeap::new();
        heap.insert(1, secs(base, 1));
        heap.insert(2, secs(base, 2));
        heap.insert(3, secs(base, 3));

        heap.insert(1, secs(base, 10));
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.deadline(&1), Some(secs(base, 10)));

        heap.insert(3, secs(base, 0));
        assert_eq!(drain(&mut heap, secs(base, 20)), vec![3, 2, 1]);
    }

    #[test]
    fn remove_from_the_middle_keeps_order() {
        let base = Instant::now();
        let mut heap = KeyedHeap::new();
        for key in 0..32u32 {
            // Interleave deadlines so removals hit interior nodes.
            heap.insert(key, secs(base, u64::from((key * 7) % 32)));
        }

        for key in (0..32u32).filter(|k| k % 3 == 0) {
            assert!(heap.remove(&key).is_some());
            assert!(!heap.contains(&key));
        }
        assert_eq!(heap.remove(&0), None);

        let popped = drain(&mut heap, secs(base, 100));
        let deadlines: Vec<u64> = popped.iter().map(|k| u64::from((k * 7) % 32)).collect();
        let mut sorted = deadlines.clone();
        sorted.sort_unstable();
        assert_eq!(deadlines, sorted);
        assert_eq!(popped.len(), 32 - 11);
    }

    #[test]
    fn remove_last_and_only() {
        let base = Instant::now();
        let mut heap = KeyedHeap::new();
        heap.insert(7u32, base);
        assert_eq!(heap.remove(&7), Some(base));
        assert!(heap.is_empty());
        assert_eq!(heap.peek(), None);
    }
}
