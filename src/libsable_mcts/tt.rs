// Copyright 2024 the sable authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use dashmap::DashMap;
use std::sync::{Arc, Weak};

use crate::node::Node;

/// A sharded concurrent map from position keys to their nodes, so that
/// transposed move orders share a single subtree.
///
/// The table holds weak references only; ownership stays with the parent
/// edges and the root anchors. Entries whose node has been pruned away die
/// with it and are swept between searches.
pub struct TranspositionTable {
    map: Option<DashMap<u64, Weak<Node>>>,
}

impl TranspositionTable {
    pub fn new(enabled: bool) -> Self {
        Self {
            map: if enabled { Some(DashMap::new()) } else { None }
        }
    }

    pub fn enabled(&self) -> bool {
        self.map.is_some()
    }

    /// Find a live node for `key`, if sharing is enabled and the node has
    /// not been pruned.
    pub fn lookup(&self, key: u64) -> Option<Arc<Node>> {
        self.map.as_ref()?
            .get(&key)
            .and_then(|entry| entry.value().upgrade())
    }

    pub fn insert(&self, key: u64, node: &Arc<Node>) {
        if let Some(map) = self.map.as_ref() {
            map.insert(key, Arc::downgrade(node));
        }
    }

    /// Sweep entries whose node is gone. Called between searches, after
    /// the old root lineage has been released.
    pub fn purge_dead(&self) {
        if let Some(map) = self.map.as_ref() {
            map.retain(|_, node| node.upgrade().is_some());
        }
    }

    pub fn clear(&self) {
        if let Some(map) = self.map.as_ref() {
            map.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.map.as_ref().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_chess::{GamePosition, Variant};

    fn some_node() -> Arc<Node> {
        let pos = GamePosition::startpos(Variant::Chess);

        Arc::new(Node::new(pos.hash_key(), pos.legal_moves(), None))
    }

    #[test]
    fn lookup_finds_live_nodes() {
        let table = TranspositionTable::new(true);
        let node = some_node();

        table.insert(node.pos_key(), &node);

        assert!(Arc::ptr_eq(&table.lookup(node.pos_key()).unwrap(), &node));
        assert!(table.lookup(12345).is_none());
    }

    #[test]
    fn dead_entries_do_not_resolve() {
        let table = TranspositionTable::new(true);
        let node = some_node();
        let key = node.pos_key();

        table.insert(key, &node);
        drop(node);

        assert!(table.lookup(key).is_none());

        table.purge_dead();

        assert_eq!(table.len(), 0);
    }

    #[test]
    fn disabled_table_never_shares() {
        let table = TranspositionTable::new(false);
        let node = some_node();

        table.insert(node.pos_key(), &node);

        assert!(!table.enabled());
        assert!(table.lookup(node.pos_key()).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn clear_empties_the_table() {
        let table = TranspositionTable::new(true);
        let node = some_node();

        table.insert(node.pos_key(), &node);
        table.clear();

        assert!(table.is_empty());
    }
}
