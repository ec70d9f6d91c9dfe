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

use log::{info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sable_chess::{features, move_uci, GamePosition, Move};

use crate::choose;
use crate::node::Node;
use crate::predict::{policy_over_moves, PredictError, Predictor};
use crate::predict_service::{PredictHandle, PredictService};
use crate::root::RootManager;
use crate::settings::{PlaySettings, SearchLimits, SearchSettings};
use crate::time_control::TimeManager;
use crate::worker::{self, SearchContext};

/// How the engine answers a `go`: a full tree search, or a single forward
/// pass through the network.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    RawNet,
    Mcts,
}

/// Everything a finished search reports about the move it picked.
#[derive(Clone, Debug)]
pub struct EvalInfo {
    pub best_move: Option<Move>,
    pub pv: Vec<String>,
    pub legal_moves: Vec<Move>,
    pub policy: Vec<f32>,
    pub centipawns: i32,
    pub depth: usize,
    pub nodes: u64,
    pub nodes_pre_search: u64,
    pub elapsed_ms: u64,
    pub nps: u64,
}

impl EvalInfo {
    fn empty(centipawns: i32) -> Self {
        Self {
            best_move: None,
            pv: vec! [],
            legal_moves: vec! [],
            policy: vec! [],
            centipawns,
            depth: 0,
            nodes: 0,
            nodes_pre_search: 0,
            elapsed_ms: 0,
            nps: 0,
        }
    }

    /// UCI spelling of the best move, `(none)` when the position is over.
    pub fn best_move_uci(&self) -> String {
        match self.best_move {
            Some(mv) => move_uci(mv),
            None => "(none)".into()
        }
    }

    /// The `info …` line reported after the search.
    pub fn to_info_line(&self) -> String {
        let mut line = format!(
            "depth {} score cp {} nodes {} nps {} time {}",
            self.depth, self.centipawns, self.nodes, self.nps, self.elapsed_ms
        );

        if !self.pv.is_empty() {
            line.push_str(" pv ");
            line.push_str(&self.pv.join(" "));
        }

        line
    }
}

fn evaluate(
    handle: &PredictHandle,
    pos: &GamePosition
) -> Result<(f32, Vec<f32>), PredictError>
{
    let planes = features::board_to_planes(pos);
    let response = handle.predict(planes)?;
    let mut value = response.value();

    if !value.is_finite() {
        warn!("nan_in_value: substituting 0 for the network value");
        value = 0.0;
    }

    let moves = pos.legal_moves();
    let policy = policy_over_moves(response.policy(), pos, &moves, handle.is_policy_map());

    Ok((value, policy))
}

/// The engine core: owns the predictor facade, the live tree, and the RNG
/// driving Dirichlet noise and temperature sampling.
pub struct Engine {
    predict: PredictService,
    roots: RootManager,
    rng: SmallRng,
    stop: Arc<AtomicBool>,
    last_eval: Option<(f32, sable_chess::Color)>,
}

impl Engine {
    /// Build the engine around an executor. `seed` pins the RNG for
    /// reproducible searches; 0 seeds it from the entropy pool.
    pub fn new(
        predictor: Box<dyn Predictor>,
        batch_size: usize,
        use_transposition_table: bool,
        seed: u64
    ) -> Result<Self, PredictError>
    {
        Ok(Self {
            predict: PredictService::new(predictor, batch_size)?,
            roots: RootManager::new(use_transposition_table),
            rng: if seed == 0 { SmallRng::from_entropy() } else { SmallRng::seed_from_u64(seed) },
            stop: Arc::new(AtomicBool::new(false)),
            last_eval: None,
        })
    }

    /// Shared flag the front-end raises on `stop`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn new_game(&mut self) {
        self.roots.clear_game_history();
        self.last_eval = None;
    }

    /// Keep the subtree below the played move alive for the next search.
    pub fn apply_move_to_tree(&mut self, mv: Move, own_move: bool) {
        self.roots.apply_move_to_tree(mv, own_move);
    }

    pub fn go(
        &mut self,
        pos: &GamePosition,
        limits: &SearchLimits,
        settings: &SearchSettings,
        play: &PlaySettings,
        mode: Mode
    ) -> EvalInfo
    {
        match mode {
            Mode::RawNet => self.go_raw(pos, play),
            Mode::Mcts => self.go_mcts(pos, limits, settings, play),
        }
    }

    /// A single forward pass: the move selection runs on a synthetic root
    /// whose policy is the network output over the legal moves.
    fn go_raw(&mut self, pos: &GamePosition, play: &PlaySettings) -> EvalInfo {
        let start = Instant::now();
        let legal_moves = pos.legal_moves();

        if legal_moves.is_empty() {
            return EvalInfo::empty(choose::value_to_centipawn(pos.terminal_value().unwrap_or(0.0)));
        }

        let handle = self.predict.handle();
        let (value, policy) = match evaluate(&handle, pos) {
            Ok(result) => result,
            Err(reason) => {
                warn!("raw evaluation failed ({}), returning the first legal move", reason);

                return fallback_eval(&legal_moves, start);
            }
        };

        let pv_index = choose::argmax(&policy).unwrap_or(0);
        let chosen = choose::final_move_index(&policy, pv_index, pos.game_ply(), play, &mut self.rng);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        EvalInfo {
            best_move: Some(legal_moves[chosen]),
            pv: vec! [move_uci(legal_moves[pv_index])],
            policy,
            legal_moves,
            centipawns: choose::value_to_centipawn(value),
            depth: 1,
            nodes: 1,
            nodes_pre_search: 0,
            elapsed_ms,
            nps: 0,
        }
    }

    fn go_mcts(
        &mut self,
        pos: &GamePosition,
        limits: &SearchLimits,
        settings: &SearchSettings,
        play: &PlaySettings
    ) -> EvalInfo
    {
        let start = Instant::now();

        self.stop.store(false, Ordering::Release);

        let mut settings = settings.clone();

        if let Some(depth) = limits.depth {
            settings.max_search_depth = settings.max_search_depth.min(depth);
        }

        let handle = self.predict.handle();
        let prepared = match self.roots.prepare(pos, &settings, &mut self.rng, |p| evaluate(&handle, p)) {
            Ok(prepared) => prepared,
            Err(reason) => {
                warn!("root evaluation failed ({}), returning the first legal move", reason);

                return fallback_eval(&pos.legal_moves(), start);
            }
        };

        let root = prepared.root.clone();
        let legal_moves = root.legal_moves().to_vec();

        match legal_moves.len() {
            0 => {
                return EvalInfo::empty(
                    choose::value_to_centipawn(root.terminal_value().unwrap_or(0.0))
                );
            },
            1 => {
                // a forced move needs no deliberation
                let elapsed_ms = start.elapsed().as_millis() as u64;

                return EvalInfo {
                    best_move: Some(legal_moves[0]),
                    pv: vec! [move_uci(legal_moves[0])],
                    policy: vec! [1.0],
                    legal_moves,
                    centipawns: choose::value_to_centipawn(root.value()),
                    depth: 0,
                    nodes: 0,
                    nodes_pre_search: prepared.nodes_pre_search,
                    elapsed_ms,
                    nps: 0,
                };
            },
            _ => {}
        }

        let context = Arc::new(SearchContext::new(
            root.clone(),
            pos.clone(),
            self.predict.handle(),
            self.roots.transpositions(),
            settings.clone(),
            self.stop.clone(),
            limits.nodes
        ));
        let workers: Vec<JoinHandle<()>> = (0..settings.threads.max(1)).map(|_| {
            let context = context.clone();

            thread::Builder::new()
                .name("sable_worker".into())
                .spawn(move || worker::run(context))
                .expect("could not spawn a search worker")
        }).collect();

        self.run_time_control(&context, pos, limits, &settings);

        self.stop.store(true, Ordering::Release);
        context.notify_expansion();

        for handle in workers {
            let _ = handle.join();
        }

        if context.failed.load(Ordering::Acquire) {
            warn!("the search lost its predictor, reporting the best effort so far");
        }

        let visits = root.visits();

        if visits.iter().all(|&v| v == 0) {
            return fallback_eval(&legal_moves, start);
        }

        let q = root.q_values();
        let q_thresh = choose::dynamic_q_thresh(&settings, root.total_visits());
        let policy = choose::mcts_policy(&visits, &q, settings.q_value_weight, q_thresh);
        let pv = principal_variation(&root);
        let visit_counts: Vec<f32> = visits.iter().map(|&v| v as f32).collect();
        let pv_index = choose::argmax(&visit_counts).unwrap_or(0);
        let chosen = choose::final_move_index(&policy, pv_index, pos.game_ply(), play, &mut self.rng);

        if chosen != pv_index {
            info!("sampled {} over {}", move_uci(legal_moves[chosen]), move_uci(legal_moves[pv_index]));
        }

        self.last_eval = Some((q[pv_index], pos.side_to_move()));

        let nodes = root.total_visits();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let searched = nodes.saturating_sub(prepared.nodes_pre_search);

        EvalInfo {
            best_move: Some(legal_moves[chosen]),
            centipawns: choose::value_to_centipawn(q[pv_index]),
            depth: pv.len(),
            pv,
            policy,
            legal_moves,
            nodes,
            nodes_pre_search: prepared.nodes_pre_search,
            elapsed_ms,
            nps: searched * 1000 / elapsed_ms.max(1),
        }
    }

    /// Sleep out the wall budget in short ticks, probing the early-stop
    /// rule at the half-way mark and the extension rule at the end. Node
    /// limits and the external stop flag cut the loop short.
    fn run_time_control(
        &self,
        context: &SearchContext,
        pos: &GamePosition,
        limits: &SearchLimits,
        settings: &SearchSettings
    ) {
        const TICK: Duration = Duration::from_millis(2);

        let time = TimeManager::new(limits.move_overhead);
        let budget = time.budget(limits, pos.side_to_move(), pos.game_ply());
        let start = Instant::now();
        let mut deadline = budget.map(|budget| start + budget);
        let halfway = budget.map(|budget| start + budget / 2);
        let mut half_checked = false;
        let mut extended = false;

        loop {
            if context.stop.load(Ordering::Acquire) {
                return;
            }

            if let Some(nodes) = limits.nodes {
                if context.root.total_visits() >= nodes {
                    return;
                }
            }

            let now = Instant::now();

            if let Some(halfway) = halfway {
                if !half_checked && now >= halfway {
                    half_checked = true;

                    if self.early_stop(context, settings) {
                        info!("the search is committed, stopping at half time");
                        return;
                    }
                }
            }

            if let Some(d) = deadline {
                if now >= d {
                    if !extended && self.wants_extension(context, pos, limits) {
                        info!("the best move got worse, extending the budget");
                        extended = true;
                        deadline = Some(d + budget.unwrap() / 2);
                        continue;
                    }

                    return;
                }
            }

            thread::sleep(TICK);
        }
    }

    fn early_stop(&self, context: &SearchContext, settings: &SearchSettings) -> bool {
        let root = &context.root;
        let visits = root.visits();
        let q = root.q_values();
        let q_thresh = choose::dynamic_q_thresh(settings, root.total_visits());
        let policy = choose::mcts_policy(&visits, &q, settings.q_value_weight, q_thresh);
        let time = TimeManager::new(0);

        time.should_stop_early(&policy, &root.priors(), &q, &visits)
    }

    fn wants_extension(
        &self,
        context: &SearchContext,
        pos: &GamePosition,
        limits: &SearchLimits
    ) -> bool
    {
        let visits: Vec<f32> = context.root.visits().iter().map(|&v| v as f32).collect();
        let best = match choose::argmax(&visits) {
            Some(best) => best,
            None => { return false; }
        };
        let best_q = context.root.q_values()[best];
        let time = TimeManager::new(limits.move_overhead);

        time.should_continue(limits, pos.side_to_move(), best_q, self.last_eval)
    }
}

/// The most-visited line from the root downwards.
fn principal_variation(root: &Arc<Node>) -> Vec<String> {
    let mut pv = vec! [];
    let mut node = root.clone();

    while node.has_nn_results() && node.nb_children() > 0 {
        let visits: Vec<f32> = node.visits().iter().map(|&v| v as f32).collect();
        let best = match choose::argmax(&visits) {
            Some(best) if visits[best] > 0.0 => best,
            _ => break
        };

        pv.push(move_uci(node.legal_move(best)));

        match node.child(best) {
            Some(child) => { node = child; },
            None => break
        }
    }

    pv
}

fn fallback_eval(legal_moves: &[Move], start: Instant) -> EvalInfo {
    let best_move = legal_moves.first().copied();
    let pv = best_move.map(|mv| vec! [move_uci(mv)]).unwrap_or_default();

    EvalInfo {
        best_move,
        pv,
        legal_moves: legal_moves.to_vec(),
        policy: vec! [],
        centipawns: 0,
        depth: 0,
        nodes: 0,
        nodes_pre_search: 0,
        elapsed_ms: start.elapsed().as_millis() as u64,
        nps: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::RandomPredictor;
    use sable_chess::Variant;

    fn engine() -> Engine {
        Engine::new(Box::new(RandomPredictor::dense()), 4, true, 12345).unwrap()
    }

    fn quiet_settings() -> SearchSettings {
        let mut settings = SearchSettings::default();
        settings.threads = 1;
        settings.batch_size = 1;
        settings
    }

    #[test]
    fn one_legal_move_returns_immediately() {
        let mut engine = engine();
        let pos = GamePosition::from_fen(Variant::Chess, "k7/7R/8/8/8/8/8/K7 b - - 0 1").unwrap();

        let info = engine.go(
            &pos,
            &SearchLimits::movetime(10_000),
            &quiet_settings(),
            &PlaySettings::default(),
            Mode::Mcts
        );

        assert_eq!(info.best_move_uci(), "a8b8");
        assert_eq!(info.nodes, 0);
        assert!(info.elapsed_ms < 1_000);
    }

    #[test]
    fn no_legal_moves_returns_none() {
        let mut engine = engine();
        let pos = GamePosition::from_fen(Variant::Chess, "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();

        let info = engine.go(
            &pos,
            &SearchLimits::movetime(100),
            &quiet_settings(),
            &PlaySettings::default(),
            Mode::Mcts
        );

        assert_eq!(info.best_move_uci(), "(none)");
        assert_eq!(info.centipawns, 0);
    }

    #[test]
    fn node_limit_bounds_the_search() {
        let mut engine = engine();
        let pos = GamePosition::startpos(Variant::Chess);

        let info = engine.go(
            &pos,
            &SearchLimits::nodes(200),
            &quiet_settings(),
            &PlaySettings::default(),
            Mode::Mcts
        );

        assert!(info.nodes >= 200);
        assert!(info.nodes < 400, "limit overshot: {}", info.nodes);
        assert!(info.best_move.is_some());
        assert!(!info.pv.is_empty());
    }

    #[test]
    fn raw_mode_runs_a_single_forward_pass() {
        let mut engine = engine();
        let pos = GamePosition::startpos(Variant::Chess);

        let info = engine.go(
            &pos,
            &SearchLimits::default(),
            &quiet_settings(),
            &PlaySettings::default(),
            Mode::RawNet
        );

        assert_eq!(info.nodes, 1);
        assert_eq!(info.depth, 1);
        assert_eq!(info.policy.len(), 20);
        assert!(info.best_move.is_some());
    }

    #[test]
    fn info_line_is_well_formed() {
        let mut engine = engine();
        let pos = GamePosition::startpos(Variant::Chess);

        let info = engine.go(
            &pos,
            &SearchLimits::nodes(64),
            &quiet_settings(),
            &PlaySettings::default(),
            Mode::Mcts
        );
        let line = info.to_info_line();

        assert!(line.starts_with("depth "));
        assert!(line.contains(" nodes "));
        assert!(line.contains(" pv "));
    }
}
