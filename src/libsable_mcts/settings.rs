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

use sable_chess::Color;
use sable_utils::UciOptions;

/// Knobs of the tree search itself, decoded from the centi-scaled UCI
/// options before each search.
#[derive(Clone, Debug)]
pub struct SearchSettings {
    pub threads: usize,
    pub batch_size: usize,
    pub cpuct_init: f32,
    pub cpuct_base: f32,
    pub u_init: f32,
    pub u_min: f32,
    pub u_base: f32,
    pub dirichlet_epsilon: f32,
    pub dirichlet_alpha: f32,
    pub q_value_weight: f32,
    pub q_thresh_init: f32,
    pub q_thresh_max: f32,
    pub q_thresh_base: f32,
    pub max_search_depth: usize,
    pub virtual_loss: u32,
    pub enhance_checks: bool,
    pub enhance_captures: bool,
    pub enhance_factor: f32,
    pub use_transposition_table: bool,

    /// Q estimate of an unvisited edge. `None` uses the parent's own value,
    /// negated into the child perspective.
    pub q_init: Option<f32>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from_options(&UciOptions::default())
    }
}

impl SearchSettings {
    pub fn from_options(options: &UciOptions) -> Self {
        Self {
            threads: options.spin("Threads") as usize,
            batch_size: options.spin("Batch_Size") as usize,
            cpuct_init: options.centi("Centi_CPuct_Init"),
            cpuct_base: options.spin("CPuct_Base") as f32,
            u_init: options.centi("Centi_U_Init") / options.centi("Centi_U_Init_Divisor"),
            u_min: options.centi("Centi_U_Min"),
            u_base: options.spin("U_Base") as f32,
            dirichlet_epsilon: options.centi("Centi_Dirichlet_Epsilon"),
            dirichlet_alpha: options.centi("Centi_Dirichlet_Alpha"),
            q_value_weight: options.centi("Centi_Q_Value_Weight"),
            q_thresh_init: options.centi("Centi_Q_Thresh_Init"),
            q_thresh_max: options.centi("Centi_Q_Thresh_Max"),
            q_thresh_base: options.spin("Q_Thresh_Base") as f32,
            max_search_depth: options.spin("Max_Search_Depth") as usize,
            virtual_loss: options.spin("Virtual_Loss") as u32,
            enhance_checks: options.check("Enhance_Checks"),
            enhance_captures: options.check("Enhance_Captures"),
            enhance_factor: 0.5,
            use_transposition_table: options.check("Use_Transposition_Table"),
            q_init: None,
        }
    }
}

/// Settings of the final move choice, separate from the search knobs.
#[derive(Clone, Debug)]
pub struct PlaySettings {
    pub temperature: f32,
    pub temperature_moves: u32,
}

impl Default for PlaySettings {
    fn default() -> Self {
        Self { temperature: 0.0, temperature_moves: 0 }
    }
}

impl PlaySettings {
    pub fn from_options(options: &UciOptions) -> Self {
        Self {
            temperature: options.centi("Centi_Temperature"),
            temperature_moves: options.spin("Temperature_Moves") as u32,
        }
    }
}

/// The limits of a single `go` command.
#[derive(Clone, Debug, Default)]
pub struct SearchLimits {
    pub movetime: Option<u64>,
    pub nodes: Option<u64>,
    pub depth: Option<usize>,
    pub infinite: bool,
    pub wtime: Option<u64>,
    pub btime: Option<u64>,
    pub winc: Option<u64>,
    pub binc: Option<u64>,
    pub moves_to_go: Option<u32>,

    /// Milliseconds reserved for protocol latency, from `Move_Overhead`.
    pub move_overhead: u64,
}

impl SearchLimits {
    pub fn movetime(ms: u64) -> Self {
        Self { movetime: Some(ms), ..Default::default() }
    }

    pub fn nodes(count: u64) -> Self {
        Self { nodes: Some(count), ..Default::default() }
    }

    pub fn time_left(&self, side: Color) -> Option<u64> {
        match side {
            Color::White => self.wtime,
            Color::Black => self.btime,
        }
    }

    pub fn increment(&self, side: Color) -> u64 {
        match side {
            Color::White => self.winc.unwrap_or(0),
            Color::Black => self.binc.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_decode_centi_options() {
        let mut options = UciOptions::default();
        options.set("Centi_CPuct_Init", "175").unwrap();
        options.set("Centi_U_Init_Divisor", "200").unwrap();

        let settings = SearchSettings::from_options(&options);

        assert_eq!(settings.cpuct_init, 1.75);
        assert_eq!(settings.u_init, 0.5);
        assert_eq!(settings.virtual_loss, 3);
    }

    #[test]
    fn limits_pick_the_right_clock() {
        let limits = SearchLimits {
            wtime: Some(60_000),
            btime: Some(30_000),
            binc: Some(1_000),
            ..Default::default()
        };

        assert_eq!(limits.time_left(Color::White), Some(60_000));
        assert_eq!(limits.time_left(Color::Black), Some(30_000));
        assert_eq!(limits.increment(Color::White), 0);
        assert_eq!(limits.increment(Color::Black), 1_000);
    }
}
