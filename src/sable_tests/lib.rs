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

//! End-to-end scenarios driving the whole engine against the random
//! predictor, where terminal game results are the only signal.

#[cfg(test)]
mod tests {
    use sable_chess::{GamePosition, Variant};
    use sable_mcts::{
        Engine, EvalInfo, Mode, PlaySettings, RandomPredictor, SearchLimits, SearchSettings
    };

    fn engine_with_seed(seed: u64) -> Engine {
        Engine::new(Box::new(RandomPredictor::dense()), 8, true, seed).unwrap()
    }

    fn single_threaded() -> SearchSettings {
        let mut settings = SearchSettings::default();
        settings.threads = 1;
        settings.batch_size = 1;
        settings
    }

    fn go_nodes(
        engine: &mut Engine,
        pos: &GamePosition,
        nodes: u64,
        settings: &SearchSettings
    ) -> EvalInfo
    {
        engine.go(
            pos,
            &SearchLimits::nodes(nodes),
            settings,
            &PlaySettings::default(),
            Mode::Mcts
        )
    }

    #[test]
    fn finds_the_mate_in_one() {
        let mut engine = engine_with_seed(1);
        let pos = GamePosition::from_fen(Variant::Chess, "6k1/5ppp/8/8/8/8/8/R6K w - - 0 1").unwrap();

        let eval = engine.go(
            &pos,
            &SearchLimits::movetime(300),
            &single_threaded(),
            &PlaySettings::default(),
            Mode::Mcts
        );

        assert_eq!(eval.best_move_uci(), "a1a8");
        assert!(eval.centipawns > 1_000, "mate should score high, got {}", eval.centipawns);
        assert!(!eval.pv.is_empty());
        assert!(eval.nodes > 0);
    }

    #[test]
    fn checkmated_root_returns_none() {
        let mut engine = engine_with_seed(2);

        // fool's mate, white is checkmated
        let pos = GamePosition::from_fen(
            Variant::Chess,
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3"
        ).unwrap();

        let eval = go_nodes(&mut engine, &pos, 100, &single_threaded());

        assert_eq!(eval.best_move_uci(), "(none)");
        assert_eq!(eval.nodes, 0);
        assert_eq!(eval.centipawns, -9999);
    }

    #[test]
    fn forced_move_skips_the_search() {
        let mut engine = engine_with_seed(3);
        let pos = GamePosition::from_fen(Variant::Chess, "k7/7R/8/8/8/8/8/K7 b - - 0 1").unwrap();

        let eval = engine.go(
            &pos,
            &SearchLimits::movetime(10_000),
            &single_threaded(),
            &PlaySettings::default(),
            Mode::Mcts
        );

        assert_eq!(eval.best_move_uci(), "a8b8");
        assert_eq!(eval.nodes, 0);
        assert!(eval.elapsed_ms < 1_000);
    }

    #[test]
    fn startpos_spreads_visits_over_many_moves() {
        let mut engine = engine_with_seed(4);
        let mut settings = SearchSettings::default();
        settings.threads = 4;
        settings.batch_size = 16;

        let pos = GamePosition::startpos(Variant::Chess);
        let eval = go_nodes(&mut engine, &pos, 600, &settings);

        assert!(eval.nodes >= 500, "searched only {} nodes", eval.nodes);
        assert_eq!(eval.policy.len(), 20);

        let explored = eval.policy.iter().filter(|&&p| p > 0.0).count();
        assert!(explored >= 4, "only {} opening moves explored", explored);

        let sum: f32 = eval.policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn the_tree_survives_into_the_next_search() {
        let mut engine = engine_with_seed(5);
        let settings = single_threaded();
        let mut pos = GamePosition::startpos(Variant::Chess);

        let first = go_nodes(&mut engine, &pos, 800, &settings);
        let best = first.best_move.unwrap();

        assert_eq!(first.nodes_pre_search, 0);

        // searching the same position again re-selects the current root
        let again = go_nodes(&mut engine, &pos, 900, &settings);
        assert!(again.nodes_pre_search > 0);

        // after our chosen move is played, the saved anchor matches
        engine.apply_move_to_tree(best, true);
        pos.apply_move(best);

        let after_own = go_nodes(&mut engine, &pos, 400, &settings);
        assert!(after_own.nodes_pre_search > 0);
    }

    #[test]
    fn a_fixed_seed_reproduces_the_search() {
        let pos = GamePosition::startpos(Variant::Chess);
        let settings = single_threaded();

        let mut a = engine_with_seed(777);
        let mut b = engine_with_seed(777);

        let eval_a = go_nodes(&mut a, &pos, 300, &settings);
        let eval_b = go_nodes(&mut b, &pos, 300, &settings);

        assert_eq!(eval_a.policy, eval_b.policy);
        assert_eq!(eval_a.best_move_uci(), eval_b.best_move_uci());
        assert_eq!(eval_a.nodes, eval_b.nodes);
    }

    #[test]
    fn raw_network_mode_answers_without_a_tree() {
        let mut engine = engine_with_seed(6);
        let pos = GamePosition::startpos(Variant::Chess);

        let eval = engine.go(
            &pos,
            &SearchLimits::default(),
            &single_threaded(),
            &PlaySettings::default(),
            Mode::RawNet
        );

        assert_eq!(eval.nodes, 1);
        assert_eq!(eval.depth, 1);
        assert!(eval.best_move.is_some());
    }

    #[test]
    fn temperature_sampling_is_seeded() {
        let pos = GamePosition::startpos(Variant::Chess);
        let settings = single_threaded();
        let play = PlaySettings { temperature: 1.0, temperature_moves: 10 };

        let run = |seed| {
            let mut engine = engine_with_seed(seed);

            engine.go(&pos, &SearchLimits::nodes(200), &settings, &play, Mode::Mcts)
                .best_move_uci()
        };

        assert_eq!(run(42), run(42));
    }

    #[test]
    fn crazyhouse_searches_without_panicking() {
        let mut engine = engine_with_seed(7);
        let pos = GamePosition::startpos(Variant::Crazyhouse);

        let eval = go_nodes(&mut engine, &pos, 200, &single_threaded());

        assert!(eval.best_move.is_some());
        assert!(eval.nodes >= 200);
    }
}
