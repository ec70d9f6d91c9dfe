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

//! Deriving the final move from a finished search: the MCTS policy blend
//! of visit counts and Q values, temperature sampling in the opening, and
//! the centipawn conversion used for display.

use ordered_float::OrderedFloat;
use rand::Rng;

use crate::settings::{PlaySettings, SearchSettings};

/// Index of the largest value, ties towards the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values.iter()
        .enumerate()
        .max_by_key(|&(i, &v)| (OrderedFloat(v), std::cmp::Reverse(i)))
        .map(|(i, _)| i)
}

/// The MCTS policy over the root children. With `q_weight == 0` this is
/// exactly the normalized visit distribution; otherwise the visit share is
/// blended with the thresholded Q values.
pub fn mcts_policy(visits: &[u32], q: &[f32], q_weight: f32, q_thresh: f32) -> Vec<f32> {
    let nb = visits.len();

    if nb == 0 {
        return vec! [];
    }

    let visit_sum: u32 = visits.iter().sum();

    if visit_sum == 0 {
        return vec! [1.0 / nb as f32; nb];
    }

    let mut policy: Vec<f32> = visits.iter()
        .map(|&v| v as f32 / visit_sum as f32)
        .collect();

    if q_weight > 0.0 {
        let q_plus: Vec<f32> = q.iter().map(|&q| (q - q_thresh).max(0.0)).collect();
        let q_sum: f32 = q_plus.iter().sum();

        if q_sum > 0.0 {
            for i in 0..nb {
                policy[i] = (1.0 - q_weight) * policy[i] + q_weight * q_plus[i] / q_sum;
            }
        }

        let sum: f32 = policy.iter().sum();

        for p in policy.iter_mut() {
            *p /= sum;
        }
    }

    policy
}

/// The Q threshold grows with the size of the search, so that early on
/// only clearly good moves contribute their Q value to the policy.
pub fn dynamic_q_thresh(settings: &SearchSettings, total_visits: u64) -> f32 {
    let decay = (-(total_visits as f32) / settings.q_thresh_base).exp();

    settings.q_thresh_max - (settings.q_thresh_max - settings.q_thresh_init) * decay
}

/// Exponentially rescale a policy by `1 / temperature` and renormalize.
pub fn apply_temperature(policy: &mut [f32], temperature: f32) {
    for p in policy.iter_mut() {
        *p = p.powf(1.0 / temperature);
    }

    let sum: f32 = policy.iter().sum();

    if sum > 0.0 {
        for p in policy.iter_mut() {
            *p /= sum;
        }
    }
}

/// Draw an index from a categorical distribution.
pub fn sample_index<R: Rng>(policy: &[f32], rng: &mut R) -> usize {
    let sum: f32 = policy.iter().sum();
    let threshold = sum * rng.gen::<f32>();
    let mut so_far = 0.0;

    for (i, &p) in policy.iter().enumerate() {
        so_far += p;

        if so_far >= threshold {
            return i;
        }
    }

    policy.len().saturating_sub(1)
}

/// The final move of a search: sampled under temperature while the game is
/// young, the head of the principal variation afterwards.
pub fn final_move_index<R: Rng>(
    policy: &[f32],
    pv_index: usize,
    move_counter: u32,
    play: &PlaySettings,
    rng: &mut R
) -> usize
{
    if move_counter <= play.temperature_moves && play.temperature > 0.01 {
        let mut tempered = policy.to_vec();

        apply_temperature(&mut tempered, play.temperature);
        sample_index(&tempered, rng)
    } else {
        pv_index
    }
}

/// Convert a Q value in `[-1, 1]` to centipawns for display.
pub fn value_to_centipawn(q: f32) -> i32 {
    if q.abs() > 0.99 {
        return if q > 0.0 { 9999 } else { -9999 };
    }

    let cp = 290.680623072 * (1.548090806 * q as f64).tan();

    cp.round().max(-9999.0).min(9999.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn zero_q_weight_is_the_visit_distribution() {
        let policy = mcts_policy(&[10, 30, 60], &[0.1, 0.2, 0.3], 0.0, 0.5);

        assert_eq!(policy, vec! [0.1, 0.3, 0.6]);
    }

    #[test]
    fn q_weight_rewards_high_q_moves() {
        let visits = [50, 50];
        let q = [0.9, 0.1];

        let plain = mcts_policy(&visits, &q, 0.0, 0.5);
        let blended = mcts_policy(&visits, &q, 0.7, 0.5);

        assert_eq!(plain[0], plain[1]);
        assert!(blended[0] > blended[1]);
        assert!((blended.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn q_thresh_grows_with_visits() {
        let settings = SearchSettings::default();

        let early = dynamic_q_thresh(&settings, 0);
        let late = dynamic_q_thresh(&settings, 1_000_000);

        assert!((early - settings.q_thresh_init).abs() < 1e-4);
        assert!((late - settings.q_thresh_max).abs() < 1e-4);
    }

    #[test]
    fn temperature_one_is_identity() {
        let mut policy = vec! [0.7, 0.2, 0.1];
        let before = policy.clone();

        apply_temperature(&mut policy, 1.0);

        for (a, b) in policy.iter().zip(before) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn low_temperature_sharpens() {
        let mut policy = vec! [0.6, 0.4];

        apply_temperature(&mut policy, 0.1);

        assert!(policy[0] > 0.97);
    }

    #[test]
    fn zero_temperature_settings_pick_the_pv_move() {
        let play = PlaySettings { temperature: 0.0, temperature_moves: 30 };
        let mut rng = SmallRng::seed_from_u64(3);

        let index = final_move_index(&[0.1, 0.2, 0.7], 2, 0, &play, &mut rng);

        assert_eq!(index, 2);
    }

    #[test]
    fn sampling_is_reproducible_under_a_fixed_seed() {
        let play = PlaySettings { temperature: 1.0, temperature_moves: 30 };
        let policy = [0.25, 0.25, 0.25, 0.25];

        let a = final_move_index(&policy, 0, 4, &play, &mut SmallRng::seed_from_u64(11));
        let b = final_move_index(&policy, 0, 4, &play, &mut SmallRng::seed_from_u64(11));

        assert_eq!(a, b);
    }

    #[test]
    fn centipawn_conversion() {
        assert_eq!(value_to_centipawn(0.0), 0);
        assert!(value_to_centipawn(0.5) > 100);
        assert_eq!(value_to_centipawn(0.5), -value_to_centipawn(-0.5));
        assert_eq!(value_to_centipawn(1.0), 9999);
    }

    #[test]
    fn argmax_ties_towards_the_lowest_index() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), Some(0));
        assert_eq!(argmax(&[]), None);
    }
}
