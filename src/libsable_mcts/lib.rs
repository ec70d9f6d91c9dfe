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

//! The search core of a neural-network-guided Monte Carlo Tree Search
//! engine for chess and chess variants. Parallel workers grow a shared
//! tree whose node statistics come from a batched network executor; the
//! board rules and the executor itself stay behind the `sable_chess` and
//! [`predict::Predictor`] boundaries.

/* -------- Modules -------- */

pub mod choose;
mod dirichlet;
pub mod node;
pub mod predict;
pub mod predict_service;
pub mod root;
pub mod search;
pub mod settings;
mod spin;
pub mod time_control;
pub mod tt;
mod worker;

/* -------- Exports -------- */

pub use self::choose::value_to_centipawn;
pub use self::predict::{PredictError, PredictResponse, Predictor, RandomPredictor};
pub use self::predict_service::{PredictHandle, PredictService};
pub use self::search::{Engine, EvalInfo, Mode};
pub use self::settings::{PlaySettings, SearchLimits, SearchSettings};
pub use self::time_control::TimeManager;
