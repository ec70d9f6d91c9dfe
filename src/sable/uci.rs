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

use anyhow::{bail, Context};
use crossbeam_channel::unbounded;
use log::{info, warn};
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use sable_chess::position::variant_from_name;
use sable_chess::{GamePosition, Variant};
use sable_mcts::{
    Engine, Mode, PlaySettings, Predictor, RandomPredictor, SearchLimits, SearchSettings
};
use sable_nn::Network;
use sable_utils::UciOptions;

use crate::benchmark;

const NAME: &str = "sable";
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct UciState {
    options: UciOptions,
    engine: Option<Arc<Mutex<Engine>>>,
    stop: Option<Arc<AtomicBool>>,
    variant: Variant,
    position: GamePosition,
    base_fen: Option<String>,
    game_moves: Vec<String>,
}

impl UciState {
    fn new() -> Self {
        Self {
            options: UciOptions::default(),
            engine: None,
            stop: None,
            variant: Variant::Chess,
            position: GamePosition::startpos(Variant::Chess),
            base_fen: None,
            game_moves: vec! [],
        }
    }

    /// Lazily build the engine: load the network from the configured model
    /// directory, falling back to the uniform predictor when the directory
    /// does not exist. Corrupt artifacts are fatal.
    fn ensure_engine(&mut self) -> anyhow::Result<Arc<Mutex<Engine>>> {
        if let Some(engine) = self.engine.as_ref() {
            return Ok(engine.clone());
        }

        let model_dir = self.options.string("Model_Directory").to_string();
        let predictor: Box<dyn Predictor> = match Network::load(Path::new(&model_dir)) {
            Ok(network) => {
                info!("loaded the network from {:?}", model_dir);
                Box::new(network)
            },
            Err(sable_nn::Error::ModelNotFound(dir)) => {
                warn!("no model found in {:?}, using the random predictor", dir);
                Box::new(RandomPredictor::dense())
            },
            Err(reason) => {
                bail!("could not load the model from {:?}: {}", model_dir, reason);
            }
        };

        if self.options.string("Context") == "GPU" {
            warn!("the built-in executor runs on the CPU, ignoring Context=GPU");
        }

        let engine = Engine::new(
            predictor,
            self.options.spin("Batch_Size") as usize,
            self.options.check("Use_Transposition_Table"),
            self.options.spin("Search_Seed") as u64
        ).context("could not initialize the engine")?;

        self.stop = Some(engine.stop_handle());

        let engine = Arc::new(Mutex::new(engine));
        self.engine = Some(engine.clone());

        Ok(engine)
    }

    fn limits_from(&self, tokens: &[&str]) -> SearchLimits {
        let mut limits = SearchLimits {
            move_overhead: self.options.spin("Move_Overhead") as u64,
            ..Default::default()
        };
        let engine_nodes = self.options.spin("Nodes") as u64;

        if engine_nodes > 0 {
            limits.nodes = Some(engine_nodes);
        }

        let mut iter = tokens.iter();

        while let Some(&token) = iter.next() {
            let mut value = || iter.next().and_then(|v| v.parse::<u64>().ok());

            match token {
                "movetime" => { limits.movetime = value(); },
                "wtime" => { limits.wtime = value(); },
                "btime" => { limits.btime = value(); },
                "winc" => { limits.winc = value(); },
                "binc" => { limits.binc = value(); },
                "movestogo" => { limits.moves_to_go = value().map(|v| v as u32); },
                "nodes" => { limits.nodes = value(); },
                "depth" => { limits.depth = value().map(|v| v as usize); },
                "infinite" => { limits.infinite = true; },
                _ => {}
            }
        }

        limits
    }

    fn handle_position(&mut self, tokens: &[&str]) {
        let mut position;
        let mut moves_at = None;
        let base_fen;

        if tokens.first() == Some(&"startpos") {
            position = GamePosition::startpos(self.variant);
            moves_at = tokens.iter().position(|&t| t == "moves");
            base_fen = None;
        } else if tokens.first() == Some(&"fen") {
            let end = tokens.iter().position(|&t| t == "moves").unwrap_or(tokens.len());
            let fen = tokens[1..end].join(" ");

            moves_at = if end < tokens.len() { Some(end) } else { None };
            position = match GamePosition::from_fen(self.variant, &fen) {
                Ok(position) => position,
                Err(reason) => {
                    println!("info string {}", reason);
                    return;
                }
            };
            base_fen = Some(fen);
        } else {
            println!("info string malformed position command");
            return;
        }

        let mut game_moves = vec! [];

        if let Some(at) = moves_at {
            for &mv in &tokens[at + 1..] {
                match position.parse_uci_move(mv) {
                    Ok(parsed) => {
                        position.apply_move(parsed);
                        game_moves.push(mv.to_string());
                    },
                    Err(reason) => {
                        println!("info string {}", reason);
                        return;
                    }
                }
            }
        }

        self.sync_tree_with(&base_fen, &game_moves);
        self.position = position;
        self.base_fen = base_fen;
        self.game_moves = game_moves;
    }

    /// When the new move list extends the previous game by our reply and
    /// the opponent's answer, hand the opponent's move to the tree so the
    /// matching subtree survives as an anchor. Our own reply was already
    /// applied when the search that produced it finished.
    fn sync_tree_with(&mut self, base_fen: &Option<String>, game_moves: &[String]) {
        let engine = match self.engine.as_ref() {
            Some(engine) => engine,
            None => { return; }
        };

        if *base_fen != self.base_fen
            || game_moves.len() != self.game_moves.len() + 2
            || !game_moves.starts_with(&self.game_moves)
        {
            return;
        }

        // self.position is the position the previous search ran on
        let mut replay = self.position.clone();
        let own = &game_moves[game_moves.len() - 2];
        let opp = &game_moves[game_moves.len() - 1];

        if let Ok(own) = replay.parse_uci_move(own) {
            replay.apply_move(own);

            if let Ok(opp) = replay.parse_uci_move(opp) {
                engine.lock().unwrap().apply_move_to_tree(opp, false);
            }
        }
    }

    fn handle_go(&mut self, tokens: &[&str]) -> anyhow::Result<()> {
        let engine = self.ensure_engine()?;
        let limits = self.limits_from(tokens);
        let settings = SearchSettings::from_options(&self.options);
        let play = PlaySettings::from_options(&self.options);
        let mode = if self.options.check("Use_Raw_Network") {
            Mode::RawNet
        } else {
            Mode::Mcts
        };
        let position = self.position.clone();

        thread::Builder::new()
            .name("sable_search".into())
            .spawn(move || {
                let mut engine = engine.lock().unwrap();
                let eval = engine.go(&position, &limits, &settings, &play, mode);

                println!("info {}", eval.to_info_line());

                if let Some(best_move) = eval.best_move {
                    engine.apply_move_to_tree(best_move, true);
                }

                println!("bestmove {}", eval.best_move_uci());
            })
            .context("could not spawn the search thread")?;

        Ok(())
    }

    fn handle_setoption(&mut self, tokens: &[&str]) {
        let mut name = String::new();
        let mut value = String::new();
        let mut target: Option<&mut String> = None;

        for &token in tokens {
            match token {
                "name" => { target = Some(&mut name); },
                "value" => { target = Some(&mut value); },
                _ => {
                    if let Some(target) = target.as_mut() {
                        if !target.is_empty() {
                            target.push(' ');
                        }

                        target.push_str(token);
                    }
                }
            }
        }

        match self.options.set(&name, &value) {
            Ok(()) => {
                if name.eq_ignore_ascii_case("UCI_Variant") {
                    match variant_from_name(self.options.string("UCI_Variant")) {
                        Ok(variant) => {
                            self.variant = variant;
                            self.position = GamePosition::startpos(variant);
                            self.base_fen = None;
                            self.game_moves.clear();

                            if let Some(engine) = self.engine.as_ref() {
                                engine.lock().unwrap().new_game();
                            }

                            println!(
                                "info string variant {} startpos {}",
                                self.options.string("UCI_Variant"),
                                self.position.fen()
                            );
                        },
                        Err(reason) => { println!("info string {}", reason); }
                    }
                }
            },
            Err(reason) => { println!("info string {}", reason); }
        }
    }

    fn handle_uci(&self) {
        println!("id name {} {}", NAME, VERSION);
        println!("id author the {} authors", NAME);

        for line in self.options.declarations() {
            println!("{}", line);
        }

        println!("uciok");
    }
}

/// Run the UCI loop until `quit` or the end of stdin. A dedicated thread
/// pumps stdin so that `stop` is seen while a search is running.
pub fn run() -> anyhow::Result<()> {
    let (tx, rx) = unbounded::<String>();

    thread::Builder::new()
        .name("sable_stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();

            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    },
                    Err(_) => break
                }
            }
        })
        .context("could not spawn the stdin reader")?;

    let mut state = UciState::new();

    while let Ok(line) = rx.recv() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (command, rest) = match tokens.split_first() {
            Some((command, rest)) => (*command, rest),
            None => { continue; }
        };

        match command {
            "uci" => { state.handle_uci(); },
            "isready" => {
                state.ensure_engine()?;
                println!("readyok");
            },
            "ucinewgame" => {
                if let Some(engine) = state.engine.as_ref() {
                    engine.lock().unwrap().new_game();
                }

                state.position = GamePosition::startpos(state.variant);
                state.base_fen = None;
                state.game_moves.clear();
            },
            "setoption" => { state.handle_setoption(rest); },
            "position" => { state.handle_position(rest); },
            "go" => { state.handle_go(rest)?; },
            "stop" => {
                if let Some(stop) = state.stop.as_ref() {
                    stop.store(true, Ordering::Release);
                }
            },
            "benchmark" | "bench" => {
                let engine = state.ensure_engine()?;
                let movetime = rest.first()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(3_000);

                benchmark::run(&engine, &state.options, movetime);
            },
            "quit" => {
                if let Some(stop) = state.stop.as_ref() {
                    stop.store(true, Ordering::Release);
                }

                break;
            },
            _ => { println!("info string unknown command {}", command); }
        }
    }

    Ok(())
}
