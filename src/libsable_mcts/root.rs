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

use log::info;
use rand::rngs::SmallRng;
use std::mem;
use std::sync::Arc;

use sable_chess::{GamePosition, Move};

use crate::node::Node;
use crate::predict::PredictError;
use crate::settings::SearchSettings;
use crate::tt::TranspositionTable;

/// The root the coordinator will search from.
pub struct PreparedRoot {
    pub root: Arc<Node>,
    pub nodes_pre_search: u64,
}

/// Owns the live tree between searches: the current root, the two
/// next-move anchors saved after the previous search (our reply and the
/// opponent's), and one generation of retired roots that keeps lineage
/// alive while the new root settles in.
///
/// All methods run between searches, never concurrently with workers.
pub struct RootManager {
    tt: Arc<TranspositionTable>,
    root: Option<Arc<Node>>,
    next_own: Option<Arc<Node>>,
    next_opp: Option<Arc<Node>>,
    active_anchors: Vec<Arc<Node>>,
    passive_anchors: Vec<Arc<Node>>,
}

impl RootManager {
    pub fn new(use_transposition_table: bool) -> Self {
        Self {
            tt: Arc::new(TranspositionTable::new(use_transposition_table)),
            root: None,
            next_own: None,
            next_opp: None,
            active_anchors: vec! [],
            passive_anchors: vec! [],
        }
    }

    pub fn transpositions(&self) -> Arc<TranspositionTable> {
        self.tt.clone()
    }

    pub fn root(&self) -> Option<Arc<Node>> {
        self.root.clone()
    }

    /// Select or create the root for `pos`. A position matching the
    /// current root or one of the saved anchors is re-rooted in place and
    /// reports its accumulated visits as `nodes_pre_search`; anything else
    /// gets a fresh node whose evaluation is requested synchronously
    /// through `predict_root`.
    pub fn prepare<F>(
        &mut self,
        pos: &GamePosition,
        settings: &SearchSettings,
        rng: &mut SmallRng,
        predict_root: F
    ) -> Result<PreparedRoot, PredictError>
        where F: FnOnce(&GamePosition) -> Result<(f32, Vec<f32>), PredictError>
    {
        let key = pos.hash_key();
        let matched = [&self.root, &self.next_own, &self.next_opp].into_iter()
            .flatten()
            .find(|node| node.pos_key() == key && node.has_nn_results())
            .cloned();

        let (root, nodes_pre_search) = match matched {
            Some(node) => {
                let nodes_pre_search = node.total_visits();

                info!("reusing a subtree with {} nodes", nodes_pre_search);
                (node, nodes_pre_search)
            },
            None => {
                info!("creating a new search tree");

                let legal_moves = pos.legal_moves();
                let terminal = pos.terminal_value();
                let node = Arc::new(Node::new(key, legal_moves, terminal));

                if !node.is_terminal() {
                    let (value, prior) = predict_root(pos)?;

                    node.expand(value, prior);
                }

                self.tt.insert(key, &node);
                (node, 0)
            }
        };

        let first_time_root = !root.is_root();

        if let Some(old_root) = self.root.take() {
            if !Arc::ptr_eq(&old_root, &root) {
                old_root.set_root(false);
                self.active_anchors.push(old_root);
            }
        }

        root.set_root(true);

        if root.nb_children() >= 2 {
            if first_time_root {
                root.enhance_moves(pos, settings);
            }

            root.apply_dirichlet(settings.dirichlet_alpha, settings.dirichlet_epsilon, rng);
        }

        self.root = Some(root.clone());
        self.next_own = None;
        self.next_opp = None;
        self.commit();

        Ok(PreparedRoot { root, nodes_pre_search })
    }

    /// Record that `mv` was played in the real game: saves the matching
    /// subtree as the anchor for the next search and prunes its siblings.
    /// `own_move` distinguishes our chosen move (descending from the
    /// current root) from the opponent's reply (descending from the
    /// own-move anchor).
    pub fn apply_move_to_tree(&mut self, mv: Move, own_move: bool) {
        let parent = if own_move { self.root.clone() } else { self.next_own.clone() };
        let anchor = parent.and_then(|parent| {
            if !parent.has_nn_results() {
                return None;
            }

            let index = parent.legal_moves().iter().position(|&m| m == mv)?;
            let child = parent.child(index)?;

            parent.prune_children_except(index);
            Some(child)
        });

        if own_move {
            self.next_own = anchor;
            self.next_opp = None;
        } else {
            self.next_opp = anchor;
        }
    }

    /// Drop all anchors and empty the transposition table.
    pub fn clear_game_history(&mut self) {
        self.root = None;
        self.next_own = None;
        self.next_opp = None;
        self.active_anchors.clear();
        self.passive_anchors.clear();
        self.tt.clear();
    }

    /// Double-buffered release of retired roots: the generation retired
    /// two searches ago is dropped, the one retired last search moves into
    /// the passive slot. Dead transposition entries are swept afterwards.
    fn commit(&mut self) {
        let retired = mem::take(&mut self.passive_anchors);

        self.passive_anchors = mem::take(&mut self.active_anchors);
        drop(retired);
        self.tt.purge_dead();
    }
}
