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

use std::time::Duration;

use sable_chess::Color;

use crate::choose;
use crate::settings::SearchLimits;

/// Smallest wall budget ever allocated to a move.
const MIN_BUDGET_MS: u64 = 10;

/// Converts clock-style limits into a wall budget per move and carries the
/// early-stop and extension rules.
#[derive(Clone, Debug)]
pub struct TimeManager {
    move_overhead_ms: u64,
}

/// How many more moves the game is expected to last, by phase. Used to
/// divide the remaining clock when the GUI gives no `movestogo`.
fn expected_moves_left(game_ply: u32) -> u32 {
    if game_ply < 16 {
        35
    } else if game_ply < 60 {
        25
    } else {
        15
    }
}

impl TimeManager {
    pub fn new(move_overhead_ms: u64) -> Self {
        Self { move_overhead_ms }
    }

    /// The wall budget for this move, or `None` for an unbounded search
    /// (`go infinite`, or no time information at all).
    pub fn budget(&self, limits: &SearchLimits, side: Color, game_ply: u32) -> Option<Duration> {
        if limits.infinite {
            return None;
        }

        if let Some(movetime) = limits.movetime {
            return Some(Duration::from_millis(
                movetime.saturating_sub(self.move_overhead_ms).max(1)
            ));
        }

        let time_left = limits.time_left(side)?;
        let usable = time_left.saturating_sub(self.move_overhead_ms);
        let divisor = limits.moves_to_go
            .unwrap_or(0)
            .max(expected_moves_left(game_ply)) as u64;
        let budget = (usable / divisor.max(1) + limits.increment(side))
            .max(MIN_BUDGET_MS)
            .min(usable.max(1));

        Some(Duration::from_millis(budget))
    }

    /// At the half-budget mark: stop right away when the policy is already
    /// committed to one move and the Q values agree with it.
    pub fn should_stop_early(
        &self,
        policy: &[f32],
        prior: &[f32],
        q: &[f32],
        visits: &[u32]
    ) -> bool
    {
        let top = match choose::argmax(policy) {
            Some(top) => top,
            None => { return false; }
        };

        if policy[top] <= 0.9 && prior.get(top).map_or(true, |&p| p <= 0.9) {
            return false;
        }

        let best_q = (0..q.len())
            .filter(|&i| visits[i] > 0)
            .max_by(|&a, &b| q[a].partial_cmp(&q[b]).unwrap());

        best_q == Some(top)
    }

    /// At the full-budget mark: grant another half budget when the best
    /// move's Q collapsed compared to the previous search. `last_eval` is
    /// the previous best Q together with the side it was measured for, so
    /// the comparison is sign-corrected when the side to move changed.
    pub fn should_continue(
        &self,
        limits: &SearchLimits,
        side: Color,
        best_q: f32,
        last_eval: Option<(f32, Color)>
    ) -> bool
    {
        if limits.movetime.is_some() || limits.moves_to_go == Some(1) {
            return false;
        }

        match last_eval {
            Some((last_q, last_side)) => {
                let adjusted = if last_side == side { last_q } else { -last_q };

                best_q <= adjusted - 0.1
            },
            None => false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TimeManager {
        TimeManager::new(50)
    }

    #[test]
    fn movetime_is_the_budget() {
        let limits = SearchLimits::movetime(1_000);

        assert_eq!(
            manager().budget(&limits, Color::White, 0),
            Some(Duration::from_millis(950))
        );
    }

    #[test]
    fn infinite_has_no_budget() {
        let limits = SearchLimits { infinite: true, ..Default::default() };

        assert_eq!(manager().budget(&limits, Color::White, 0), None);
    }

    #[test]
    fn clock_is_divided_over_the_expected_game_length() {
        let limits = SearchLimits {
            wtime: Some(35_050),
            winc: Some(100),
            ..Default::default()
        };

        // 35000ms usable over 35 expected moves, plus the increment
        assert_eq!(
            manager().budget(&limits, Color::White, 0),
            Some(Duration::from_millis(1_100))
        );
    }

    #[test]
    fn budget_never_exceeds_the_clock() {
        let limits = SearchLimits {
            btime: Some(80),
            binc: Some(10_000),
            ..Default::default()
        };

        let budget = manager().budget(&limits, Color::Black, 100).unwrap();

        assert!(budget <= Duration::from_millis(80));
    }

    #[test]
    fn explicit_movestogo_wins_when_larger() {
        let limits = SearchLimits {
            wtime: Some(100_050),
            moves_to_go: Some(50),
            ..Default::default()
        };

        assert_eq!(
            manager().budget(&limits, Color::White, 0),
            Some(Duration::from_millis(2_000))
        );
    }

    #[test]
    fn early_stop_needs_commitment_and_agreement() {
        let tm = manager();
        let policy = [0.95, 0.03, 0.02];
        let prior = [0.4, 0.3, 0.3];

        assert!(tm.should_stop_early(&policy, &prior, &[0.5, 0.1, 0.0], &[90, 5, 5]));

        // q argmax disagrees with the policy argmax
        assert!(!tm.should_stop_early(&policy, &prior, &[0.1, 0.5, 0.0], &[90, 5, 5]));

        // nothing is committed
        assert!(!tm.should_stop_early(&[0.5, 0.3, 0.2], &prior, &[0.5, 0.1, 0.0], &[50, 30, 20]));
    }

    #[test]
    fn committed_prior_also_stops_early() {
        let tm = manager();

        assert!(tm.should_stop_early(
            &[0.6, 0.3, 0.1],
            &[0.95, 0.03, 0.02],
            &[0.5, 0.1, 0.0],
            &[60, 30, 10]
        ));
    }

    #[test]
    fn continue_on_a_collapsed_q() {
        let tm = manager();
        let limits = SearchLimits { wtime: Some(10_000), ..Default::default() };

        assert!(tm.should_continue(&limits, Color::White, 0.1, Some((0.3, Color::White))));
        assert!(!tm.should_continue(&limits, Color::White, 0.25, Some((0.3, Color::White))));
        assert!(!tm.should_continue(&limits, Color::White, 0.1, None));
    }

    #[test]
    fn continue_is_sign_corrected_across_sides() {
        let tm = manager();
        let limits = SearchLimits { btime: Some(10_000), ..Default::default() };

        // the previous search saw +0.3 for white; from black's side that
        // is -0.3, and -0.2 is no collapse
        assert!(!tm.should_continue(&limits, Color::Black, -0.2, Some((0.3, Color::White))));
        assert!(tm.should_continue(&limits, Color::Black, -0.45, Some((0.3, Color::White))));
    }

    #[test]
    fn fixed_movetime_never_extends() {
        let tm = manager();
        let limits = SearchLimits::movetime(500);

        assert!(!tm.should_continue(&limits, Color::White, -0.9, Some((0.5, Color::White))));
    }
}
