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

use std::sync::{Arc, Mutex};

use sable_chess::{GamePosition, Variant};
use sable_mcts::{Engine, Mode, PlaySettings, SearchLimits, SearchSettings};
use sable_utils::UciOptions;

/// A spread of openings, middlegames and endgames searched at a fixed
/// movetime to measure throughput.
const POSITIONS: [&str; 10] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
    "rnbqkb1r/pp2pppp/3p1n2/8/3NP3/2N5/PPP2PPP/R1BQKB1R b KQkq - 0 5",
    "r1bq1rk1/ppp1bppp/2np1n2/4p3/2B1P3/2NP1N2/PPP2PPP/R1BQ1RK1 w - - 4 7",
    "r2q1rk1/1ppb1ppp/p1np1n2/4p3/B3P3/2PP1N2/PP3PPP/RNBQR1K1 b - - 0 9",
    "2rq1rk1/pb2bppp/1pn1pn2/2pp4/3P1B2/2PBPN2/PP1N1PPP/R2Q1RK1 w - - 0 11",
    "8/2p2k2/3p4/1p1P1p2/1P3P2/4K3/8/8 w - - 0 40",
    "8/8/4kpp1/3p4/3P1P2/4K1P1/8/8 b - - 2 48",
    "4r1k1/5ppp/8/3R4/8/8/5PPP/6K1 w - - 0 30",
    "8/5pk1/6p1/8/3Q4/6PK/5q2/8 b - - 4 60",
];

/// Search every benchmark position for `movetime` milliseconds and report
/// the aggregated nodes per second and search depth.
pub fn run(engine: &Arc<Mutex<Engine>>, options: &UciOptions, movetime: u64) {
    let settings = SearchSettings::from_options(options);
    let play = PlaySettings { temperature: 0.0, temperature_moves: 0 };
    let limits = SearchLimits {
        movetime: Some(movetime),
        move_overhead: options.spin("Move_Overhead") as u64,
        ..Default::default()
    };

    let mut engine = engine.lock().unwrap();
    let mut total_nodes = 0u64;
    let mut total_ms = 0u64;
    let mut total_depth = 0usize;
    let mut searched = 0usize;

    for fen in POSITIONS {
        let pos = match GamePosition::from_fen(Variant::Chess, fen) {
            Ok(pos) => pos,
            Err(reason) => {
                println!("info string skipping benchmark position: {}", reason);
                continue;
            }
        };

        engine.new_game();

        let eval = engine.go(&pos, &limits, &settings, &play, Mode::Mcts);

        println!(
            "info string bench {} nodes {} nps {} depth {} bestmove {}",
            fen, eval.nodes, eval.nps, eval.depth, eval.best_move_uci()
        );

        total_nodes += eval.nodes;
        total_ms += eval.elapsed_ms;
        total_depth += eval.depth;
        searched += 1;
    }

    if searched > 0 {
        println!(
            "info string bench total nodes {} nps {} avg depth {}",
            total_nodes,
            total_nodes * 1000 / total_ms.max(1),
            total_depth / searched
        );
    }

    engine.new_game();
}
