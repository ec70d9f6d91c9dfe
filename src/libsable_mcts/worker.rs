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

use crossbeam_utils::Backoff;
use log::warn;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sable_chess::{features, GamePosition};

use crate::node::Node;
use crate::predict::{policy_over_moves, PredictError};
use crate::predict_service::PredictHandle;
use crate::settings::SearchSettings;
use crate::tt::TranspositionTable;

/// Everything a worker shares with its peers and the coordinator for the
/// duration of one search.
pub(crate) struct SearchContext {
    pub root: Arc<Node>,
    pub starting_point: GamePosition,
    pub predict: PredictHandle,
    pub tt: Arc<TranspositionTable>,
    pub settings: SearchSettings,
    pub stop: Arc<AtomicBool>,
    pub node_limit: Option<u64>,
    pub failed: AtomicBool,
    pub max_depth: AtomicUsize,
    expansion_lock: Mutex<()>,
    expansion_signal: Condvar,
}

impl SearchContext {
    pub fn new(
        root: Arc<Node>,
        starting_point: GamePosition,
        predict: PredictHandle,
        tt: Arc<TranspositionTable>,
        settings: SearchSettings,
        stop: Arc<AtomicBool>,
        node_limit: Option<u64>
    ) -> Self
    {
        Self {
            root,
            starting_point,
            predict,
            tt,
            settings,
            stop,
            node_limit,
            failed: AtomicBool::new(false),
            max_depth: AtomicUsize::new(0),
            expansion_lock: Mutex::new(()),
            expansion_signal: Condvar::new(),
        }
    }

    pub fn notify_expansion(&self) {
        drop(self.expansion_lock.lock().unwrap());
        self.expansion_signal.notify_all();
    }
}

enum Abort {
    /// The search is shutting down without a usable leaf value.
    Stopped,

    /// The predictor rejected the trajectory's evaluation.
    Predict(PredictError),
}

/// Worker entry point: run trajectories until the stop flag is raised.
pub(crate) fn run(context: Arc<SearchContext>) {
    while !context.stop.load(Ordering::Acquire) {
        if let Some(limit) = context.node_limit {
            if context.root.total_visits() >= limit {
                context.stop.store(true, Ordering::Release);
                break;
            }
        }

        match run_trajectory(&context) {
            Ok(()) => {},
            Err(Abort::Stopped) => {},
            Err(Abort::Predict(reason)) => {
                warn!("worker aborts the search: {}", reason);
                context.failed.store(true, Ordering::Release);
                context.stop.store(true, Ordering::Release);
                context.notify_expansion();
            }
        }
    }
}

/// One iteration of select → descend → evaluate → backup, producing a
/// single new visit along the chosen path.
fn run_trajectory(context: &SearchContext) -> Result<(), Abort> {
    let vl_units = context.settings.virtual_loss;
    let mut pos = context.starting_point.clone();
    let mut node = context.root.clone();
    let mut path: Vec<(Arc<Node>, usize)> = Vec::with_capacity(64);

    // the descent loop is only ever entered on expanded nodes
    let result = loop {
        if let Some(terminal) = node.terminal_value() {
            break Ok(terminal);
        }

        if path.len() >= context.settings.max_search_depth {
            break Ok(node.value());
        }

        let q_init = context.settings.q_init.unwrap_or(-node.value());
        let i = node.select_child(&context.settings, q_init);

        path.push((node.clone(), i));
        pos.apply_move(node.legal_move(i));

        if let Some(child) = node.child(i) {
            if child.has_nn_results() {
                node = child;
                continue;
            }

            // a peer is evaluating this child, reuse its pending result
            break wait_for_results(context, &child).map(|_| leaf_value(&child));
        }

        if node.try_claim_child(i) {
            break expand_leaf(context, &node, i, &pos);
        } else {
            // lost the race, wait for the claimer to publish
            break wait_for_edge(context, &node, i)
                .and_then(|child| wait_for_results(context, &child).map(|_| leaf_value(&child)));
        }
    };

    match result {
        Ok(leaf) => {
            context.max_depth.fetch_max(path.len(), Ordering::Relaxed);
            backup(&path, leaf, vl_units);
            Ok(())
        },
        Err(abort) => {
            for (node, i) in path.iter() {
                node.revert_virtual_loss(*i, vl_units);
            }

            Err(abort)
        }
    }
}

fn leaf_value(node: &Node) -> f32 {
    node.terminal_value().unwrap_or_else(|| node.value())
}

/// Walk the trajectory from the leaf back to the root, alternating the
/// sign of the value at every edge and releasing the parked virtual loss.
fn backup(path: &[(Arc<Node>, usize)], leaf: f32, vl_units: u32) {
    let mut value = leaf;

    for (node, i) in path.iter().rev() {
        value = -value;
        node.backup(*i, value, vl_units);
    }
}

/// Create the child for the claimed edge `i`, evaluate it, and return its
/// value. The node is published before the evaluation is requested so that
/// peers find it and wait on `has_nn_results` instead of spinning on the
/// edge.
fn expand_leaf(
    context: &SearchContext,
    parent: &Arc<Node>,
    i: usize,
    pos: &GamePosition
) -> Result<f32, Abort>
{
    let key = pos.hash_key();

    if context.settings.use_transposition_table {
        if let Some(existing) = context.tt.lookup(key) {
            parent.publish_child(i, existing.clone());

            if !existing.has_nn_results() {
                wait_for_results(context, &existing)?;
            }

            return Ok(leaf_value(&existing));
        }
    }

    let child = Arc::new(Node::new(key, pos.legal_moves(), pos.terminal_value()));

    if context.settings.use_transposition_table {
        context.tt.insert(key, &child);
    }

    parent.publish_child(i, child.clone());

    if let Some(terminal) = child.terminal_value() {
        return Ok(terminal);
    }

    let planes = features::board_to_planes(pos);

    match context.predict.predict(planes) {
        Ok(response) => {
            let mut value = response.value();

            if !value.is_finite() {
                warn!("nan_in_value: substituting 0 for the network value");
                value = 0.0;
            }

            let prior = policy_over_moves(
                response.policy(),
                pos,
                child.legal_moves(),
                context.predict.is_policy_map()
            );

            child.expand(value, prior);
            context.notify_expansion();

            Ok(value)
        },
        Err(reason) => {
            // leave a well-formed node behind so peers waiting on it can
            // make progress, then abort the trajectory
            let nb = child.nb_children();

            child.expand(0.0, vec! [1.0 / nb.max(1) as f32; nb]);
            context.notify_expansion();

            Err(Abort::Predict(reason))
        }
    }
}

/// Wait for a peer's expansion to be published: a bounded spin with
/// exponential backoff first, then short slices on the shared condition
/// variable.
fn wait_for_results(context: &SearchContext, node: &Arc<Node>) -> Result<(), Abort> {
    let backoff = Backoff::new();

    while !node.has_nn_results() {
        if context.failed.load(Ordering::Acquire) {
            return Err(Abort::Stopped);
        }

        if backoff.is_completed() {
            let guard = context.expansion_lock.lock().unwrap();
            let _unused = context.expansion_signal
                .wait_timeout(guard, Duration::from_millis(1))
                .unwrap();
        } else {
            backoff.snooze();
        }
    }

    Ok(())
}

/// Wait for the worker that won the claim on edge `i` to publish the
/// child. Publication happens before any blocking call, so this stays a
/// short spin.
fn wait_for_edge(
    context: &SearchContext,
    node: &Arc<Node>,
    i: usize
) -> Result<Arc<Node>, Abort>
{
    let backoff = Backoff::new();

    loop {
        if let Some(child) = node.child(i) {
            return Ok(child);
        }

        if context.failed.load(Ordering::Acquire) {
            return Err(Abort::Stopped);
        }

        backoff.snooze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::RandomPredictor;
    use crate::predict_service::PredictService;
    use sable_chess::Variant;
    use std::thread;

    fn context_for(fen: Option<&str>, settings: SearchSettings) -> (PredictService, Arc<SearchContext>) {
        let pos = match fen {
            Some(fen) => GamePosition::from_fen(Variant::Chess, fen).unwrap(),
            None => GamePosition::startpos(Variant::Chess),
        };
        let service = PredictService::new(
            Box::new(RandomPredictor::dense()),
            settings.batch_size
        ).unwrap();
        let root = Arc::new(Node::new(pos.hash_key(), pos.legal_moves(), pos.terminal_value()));
        let handle = service.handle();

        if !root.is_terminal() {
            let planes = features::board_to_planes(&pos);
            let response = handle.predict(planes).unwrap();
            let prior = policy_over_moves(response.policy(), &pos, root.legal_moves(), false);

            root.expand(response.value(), prior);
        }

        let context = Arc::new(SearchContext::new(
            root,
            pos,
            handle,
            Arc::new(TranspositionTable::new(settings.use_transposition_table)),
            settings,
            Arc::new(AtomicBool::new(false)),
            None
        ));

        (service, context)
    }

    #[test]
    fn trajectories_grow_the_tree() {
        let (_service, context) = context_for(None, SearchSettings::default());

        for _ in 0..50 {
            run_trajectory(&context).map_err(|_| "trajectory aborted").unwrap();
        }

        assert_eq!(context.root.total_visits(), 51);
        assert_eq!(context.root.virtual_loss_total(), 0);
        assert!(context.root.visits().iter().any(|&v| v > 0));
    }

    #[test]
    fn parallel_workers_leave_no_virtual_loss() {
        let mut settings = SearchSettings::default();
        settings.threads = 4;

        let (_service, context) = context_for(None, settings);
        let stop = context.stop.clone();

        let handles: Vec<_> = (0..4).map(|_| {
            let context = context.clone();

            thread::spawn(move || run(context))
        }).collect();

        thread::sleep(Duration::from_millis(100));
        stop.store(true, Ordering::Release);

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(context.root.virtual_loss_total(), 0);
        assert!(context.root.total_visits() > 1);

        let visits: u32 = context.root.visits().iter().sum();
        assert_eq!(context.root.total_visits(), 1 + visits as u64);
    }

    #[test]
    fn mate_in_one_dominates_the_visits() {
        // Ra8# is the only winning move
        let (_service, context) = context_for(
            Some("6k1/5ppp/8/8/8/8/8/R6K w - - 0 1"),
            SearchSettings::default()
        );

        for _ in 0..400 {
            run_trajectory(&context).map_err(|_| "trajectory aborted").unwrap();
        }

        let visits = context.root.visits();
        let best = crate::choose::argmax(
            &visits.iter().map(|&v| v as f32).collect::<Vec<f32>>()
        ).unwrap();

        assert_eq!(
            context.starting_point.move_to_uci(context.root.legal_move(best)),
            "a1a8"
        );

        let q = context.root.q_values();
        assert!(q[best] > 0.9, "mate line should back up +1, got {}", q[best]);
    }

    #[test]
    fn transpositions_share_nodes() {
        let mut settings = SearchSettings::default();
        settings.use_transposition_table = true;

        let (_service, context) = context_for(None, settings);

        for _ in 0..300 {
            run_trajectory(&context).map_err(|_| "trajectory aborted").unwrap();
        }

        // 1. Nf3 Nf6 2. Nc3 and 1. Nc3 Nf6 2. Nf3 collide after 4 plies,
        // so the table must have fewer entries than created trajectories
        assert!(context.tt.len() > 0);

        let total: u64 = context.root.total_visits();
        assert!(total > 1);
    }

    #[test]
    fn depth_limit_caps_the_trajectory() {
        let mut settings = SearchSettings::default();
        settings.max_search_depth = 2;

        let (_service, context) = context_for(None, settings);

        for _ in 0..100 {
            run_trajectory(&context).map_err(|_| "trajectory aborted").unwrap();
        }

        assert!(context.max_depth.load(Ordering::Relaxed) <= 2);
    }
}
