//! Structural dedup cache.

use std::collections::HashMap;

/// One trie node: a serial token and the paths continuing from it.
#[derive(Debug, Default)]
struct TrieNode {
    visits: usize,
    accepted: usize,
    next: HashMap<i32, TrieNode>,
}

/// Append-only trie over expression serials.
///
/// A full serial is "novel" exactly once; later insertions of the same path
/// only bump the visit counters.
#[derive(Debug, Default)]
pub struct DedupTrie {
    root: TrieNode,
    nodes: usize,
}

impl DedupTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a serial, returning whether it was seen for the first time.
    pub fn insert(&mut self, serial: &[i32]) -> bool {
        debug_assert!(!serial.is_empty(), "serials are never empty");

        self.root.visits += 1;
        let mut created = 0;
        let mut node = &mut self.root;
        for &token in serial {
            node = node.next.entry(token).or_insert_with(|| {
                created += 1;
                TrieNode::default()
            });
            node.visits += 1;
        }

        // A path can be a strict prefix of an earlier one, in which case no
        // node was created but the terminal node has never been accepted.
        let novel = created > 0 || node.accepted == 0;
        if novel {
            node.accepted += 1;
            self.root.accepted += 1;
        }
        self.nodes += created;
        novel
    }

    /// Distinct serials accepted.
    pub fn unique(&self) -> usize {
        self.root.accepted
    }

    /// Total insert calls.
    pub fn visits(&self) -> usize {
        self.root.visits
    }

    /// Number of token nodes (excluding the root).
    pub fn len(&self) -> usize {
        self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_insert_once() {
        let mut trie = DedupTrie::new();
        assert!(trie.insert(&[16, 2, 0, 4, 0]));
        assert!(!trie.insert(&[16, 2, 0, 4, 0]));
        assert!(trie.insert(&[16, 2, 0, 4, 1]));
        assert_eq!(trie.unique(), 2);
        assert_eq!(trie.visits(), 3);
        assert_eq!(trie.len(), 6);
    }

    #[test]
    fn test_prefix_paths_are_distinct() {
        let mut trie = DedupTrie::new();
        assert!(trie.insert(&[1, 2, 3]));
        assert!(trie.insert(&[1, 2]));
        assert!(!trie.insert(&[1, 2]));
        assert!(trie.insert(&[1]));
        assert_eq!(trie.unique(), 3);
        assert_eq!(trie.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_novel_exactly_once(
            serials in prop::collection::vec(prop::collection::vec(0i32..4, 1..6), 1..40)
        ) {
            let mut trie = DedupTrie::new();
            let mut seen = std::collections::HashSet::new();
            for s in &serials {
                prop_assert_eq!(trie.insert(s), seen.insert(s.clone()));
            }
            prop_assert_eq!(trie.unique(), seen.len());
            prop_assert_eq!(trie.visits(), serials.len());
        }
    }
}
