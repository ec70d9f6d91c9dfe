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

use rand::rngs::SmallRng;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use sable_chess::{GamePosition, Move};

use crate::choose;
use crate::dirichlet;
use crate::settings::SearchSettings;
use crate::spin::Spinlock;

const EDGE_EMPTY: u8 = 0;
const EDGE_CLAIMED: u8 = 1;
const EDGE_READY: u8 = 2;

/// A lazily created edge to a child node. Workers race to claim an empty
/// edge; the winner creates the child (or finds it in the transposition
/// table) and publishes it, everyone else waits for the publication.
struct Edge {
    state: AtomicU8,
    node: UnsafeCell<Option<Arc<Node>>>,
}

impl Edge {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EDGE_EMPTY),
            node: UnsafeCell::new(None),
        }
    }
}

struct NnResults {
    value: f32,
    prior: Vec<f32>,
}

struct EdgeStats {
    visits: Box<[u32]>,
    q: Box<[f32]>,
}

/// A reached position in the search tree.
///
/// The node is created with its legal moves and terminal status; the
/// network outputs arrive later through [`Node::expand`], which publishes
/// them with release ordering. Everything read during a descent is either
/// immutable after that publication (`legal_moves`, `prior`, `value`) or
/// accessed through atomics and the per-node statistics spinlock.
pub struct Node {
    pos_key: u64,
    legal_moves: Vec<Move>,
    terminal: Option<f32>,
    has_nn_results: AtomicBool,
    nn: UnsafeCell<NnResults>,
    stats: Spinlock<EdgeStats>,
    total_visits: AtomicU64,
    virtual_loss: Vec<AtomicU32>,
    vl_total: AtomicU32,
    children: Vec<Edge>,
    is_root: AtomicBool,
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    /// Create a node for a position with the given legal moves.
    /// `terminal` carries the game result from the side-to-move
    /// perspective when the position is over; such nodes never receive
    /// network results and are complete immediately. A game can end with
    /// moves still available (fifty-move rule), so terminal nodes drop
    /// their move list.
    pub fn new(pos_key: u64, legal_moves: Vec<Move>, terminal: Option<f32>) -> Self {
        let is_terminal = terminal.is_some();
        let legal_moves = if is_terminal { vec! [] } else { legal_moves };
        let nb_children = legal_moves.len();

        Self {
            pos_key,
            legal_moves,
            terminal,
            has_nn_results: AtomicBool::new(is_terminal),
            nn: UnsafeCell::new(NnResults {
                value: terminal.unwrap_or(0.0),
                prior: vec! [],
            }),
            stats: Spinlock::new(EdgeStats {
                visits: vec! [0; nb_children].into_boxed_slice(),
                q: vec! [0.0; nb_children].into_boxed_slice(),
            }),
            total_visits: AtomicU64::new(if is_terminal { 1 } else { 0 }),
            virtual_loss: (0..nb_children).map(|_| AtomicU32::new(0)).collect(),
            vl_total: AtomicU32::new(0),
            children: (0..nb_children).map(|_| Edge::new()).collect(),
            is_root: AtomicBool::new(false),
        }
    }

    pub fn pos_key(&self) -> u64 {
        self.pos_key
    }

    pub fn nb_children(&self) -> usize {
        self.legal_moves.len()
    }

    pub fn legal_moves(&self) -> &[Move] {
        &self.legal_moves
    }

    pub fn legal_move(&self, i: usize) -> Move {
        self.legal_moves[i]
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn terminal_value(&self) -> Option<f32> {
        self.terminal
    }

    pub fn is_root(&self) -> bool {
        self.is_root.load(Ordering::Relaxed)
    }

    pub fn set_root(&self, is_root: bool) {
        self.is_root.store(is_root, Ordering::Relaxed);
    }

    /// True once the network outputs have been published.
    pub fn has_nn_results(&self) -> bool {
        self.has_nn_results.load(Ordering::Acquire)
    }

    /// Publish the network outputs for this node. May be called exactly
    /// once, by the worker that claimed the expansion.
    pub fn expand(&self, value: f32, prior: Vec<f32>) {
        debug_assert!(!self.has_nn_results());
        debug_assert_eq!(prior.len(), self.nb_children());

        unsafe {
            *self.nn.get() = NnResults { value, prior };
        }

        self.total_visits.store(1, Ordering::Relaxed);
        self.has_nn_results.store(true, Ordering::Release);
    }

    /// The network value of this position, from the side-to-move
    /// perspective. Must not be called before `has_nn_results`.
    pub fn value(&self) -> f32 {
        debug_assert!(self.has_nn_results());

        unsafe { (*self.nn.get()).value }
    }

    fn prior_slice(&self) -> &[f32] {
        debug_assert!(self.has_nn_results());

        unsafe { &(*self.nn.get()).prior }
    }

    pub fn prior(&self, i: usize) -> f32 {
        self.prior_slice()[i]
    }

    pub fn priors(&self) -> Vec<f32> {
        self.prior_slice().to_vec()
    }

    /// `1 + Σ visits[i]` once expanded; the extra one accounts for the
    /// node's own evaluation.
    pub fn total_visits(&self) -> u64 {
        self.total_visits.load(Ordering::Relaxed)
    }

    pub fn virtual_loss_total(&self) -> u32 {
        self.vl_total.load(Ordering::Relaxed)
    }

    pub fn visits(&self) -> Vec<u32> {
        self.stats.lock().visits.to_vec()
    }

    pub fn q_values(&self) -> Vec<f32> {
        self.stats.lock().q.to_vec()
    }

    /// Pick the next edge to descend by PUCT with a time-varying
    /// exploration factor, and mark it with virtual loss. `q_init` is the
    /// Q estimate for edges that have never been visited.
    ///
    /// Each in-flight selection parks `settings.virtual_loss` units on the
    /// edge; they count as visits in the exploration denominator and push
    /// the exploited Q one unit towards a loss apiece, so concurrent
    /// workers spread over different branches.
    pub fn select_child(&self, settings: &SearchSettings, q_init: f32) -> usize {
        debug_assert!(self.nb_children() > 0);

        let prior = self.prior_slice();
        let total = self.total_visits() as f32;
        let vl_total = self.virtual_loss_total() as f32;
        let cpuct = ((1.0 + total + settings.cpuct_base) / settings.cpuct_base).ln()
            + settings.cpuct_init;
        let u_factor = (settings.u_init / (1.0 + total / settings.u_base)).max(settings.u_min);
        let sqrt_total = (total + vl_total).sqrt();

        let best = {
            let stats = self.stats.lock();
            let mut best = 0;
            let mut best_score = f32::NEG_INFINITY;

            for i in 0..self.nb_children() {
                let vl = self.virtual_loss[i].load(Ordering::Relaxed) as f32;
                let visits = stats.visits[i] as f32;
                let q_hat = if stats.visits[i] == 0 { q_init - vl } else { stats.q[i] - vl };
                let u = cpuct * prior[i] * sqrt_total / (1.0 + visits + vl);
                let score = q_hat + u_factor * u;

                if score > best_score {
                    best = i;
                    best_score = score;
                }
            }

            best
        };

        self.virtual_loss[best].fetch_add(settings.virtual_loss, Ordering::Relaxed);
        self.vl_total.fetch_add(settings.virtual_loss, Ordering::Relaxed);

        best
    }

    /// Fold a backed-up value into edge `i` and release its virtual loss.
    /// The visit count and running mean move together under the statistics
    /// lock, so concurrent backups never tear the pair.
    pub fn backup(&self, i: usize, value: f32, vl_units: u32) {
        {
            let mut stats = self.stats.lock();
            let visits = stats.visits[i] as f32;

            stats.q[i] = (stats.q[i] * visits + value) / (visits + 1.0);
            stats.visits[i] += 1;
        }

        self.total_visits.fetch_add(1, Ordering::AcqRel);
        self.revert_virtual_loss(i, vl_units);
    }

    /// Remove virtual loss without recording a visit, for trajectories
    /// that were abandoned.
    pub fn revert_virtual_loss(&self, i: usize, vl_units: u32) {
        self.virtual_loss[i].fetch_sub(vl_units, Ordering::Relaxed);
        self.vl_total.fetch_sub(vl_units, Ordering::Relaxed);
    }

    pub fn child(&self, i: usize) -> Option<Arc<Node>> {
        if self.children[i].state.load(Ordering::Acquire) == EDGE_READY {
            unsafe { (*self.children[i].node.get()).clone() }
        } else {
            None
        }
    }

    /// Try to claim the expansion of edge `i`. Exactly one caller wins.
    pub fn try_claim_child(&self, i: usize) -> bool {
        self.children[i].state
            .compare_exchange(EDGE_EMPTY, EDGE_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish the child of a claimed edge.
    pub fn publish_child(&self, i: usize, child: Arc<Node>) {
        debug_assert_eq!(self.children[i].state.load(Ordering::Acquire), EDGE_CLAIMED);

        unsafe {
            *self.children[i].node.get() = Some(child);
        }

        self.children[i].state.store(EDGE_READY, Ordering::Release);
    }

    /// Drop every child subtree except `keep`. Only valid between
    /// searches, when no worker holds the tree.
    pub fn prune_children_except(&self, keep: usize) {
        for (i, edge) in self.children.iter().enumerate() {
            if i != keep && edge.state.load(Ordering::Acquire) == EDGE_READY {
                unsafe {
                    *edge.node.get() = None;
                }

                edge.state.store(EDGE_EMPTY, Ordering::Release);
            }
        }
    }

    /// Mix Dirichlet noise into the prior. Root only, between searches.
    pub fn apply_dirichlet(&self, alpha: f32, epsilon: f32, rng: &mut SmallRng) {
        debug_assert!(self.has_nn_results());

        let prior = unsafe { &mut (*self.nn.get()).prior };

        dirichlet::add(prior, alpha, epsilon, rng);
    }

    /// Boost the prior of checking and capturing moves, then renormalize.
    /// Root only, once, right after the node first becomes the root.
    pub fn enhance_moves(&self, pos: &GamePosition, settings: &SearchSettings) {
        debug_assert!(self.has_nn_results());

        if !settings.enhance_checks && !settings.enhance_captures {
            return;
        }

        let prior = unsafe { &mut (*self.nn.get()).prior };
        let mut boosted = false;

        for (i, &mv) in self.legal_moves.iter().enumerate() {
            let boost = (settings.enhance_checks && pos.gives_check(mv))
                || (settings.enhance_captures && pos.is_capture(mv));

            if boost {
                prior[i] *= 1.0 + settings.enhance_factor;
                boosted = true;
            }
        }

        if boosted {
            let sum: f32 = prior.iter().sum();

            for p in prior.iter_mut() {
                *p /= sum;
            }
        }
    }

    /// The MCTS policy over this node's children, see the move-selection
    /// rules for the exact blend of visits and Q values.
    pub fn mcts_policy(&self, q_weight: f32, q_thresh: f32) -> Vec<f32> {
        choose::mcts_policy(&self.visits(), &self.q_values(), q_weight, q_thresh)
    }
}
