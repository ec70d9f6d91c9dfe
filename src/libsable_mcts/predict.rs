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

use log::warn;
use std::error::Error;
use std::fmt;

use sable_chess::{labels, Color, GamePosition, Move};

/// The output of the network for a single position: a scalar value in
/// `[-1, 1]` from the side-to-move perspective, and the raw policy vector
/// over the full label space.
#[derive(Clone, Debug)]
pub struct PredictResponse {
    value: f32,
    policy: Vec<f32>,
}

impl PredictResponse {
    pub fn new(value: f32, policy: Vec<f32>) -> Self {
        Self { value, policy }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn policy(&self) -> &[f32] {
        &self.policy
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PredictError {
    /// The facade has been shut down.
    Closed,

    /// The executor rejected or failed the forward pass.
    InferenceFailed(String),

    /// The executor's policy head does not match the label space of the
    /// configured policy encoding.
    ShapeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PredictError::Closed => write!(f, "predictor has been shut down"),
            PredictError::InferenceFailed(reason) => write!(f, "inference failed: {}", reason),
            PredictError::ShapeMismatch { expected, actual } => {
                write!(f, "policy head is {} wide, the label space needs {}", actual, expected)
            }
        }
    }
}

impl Error for PredictError {}

/// An opaque batched executor. The search core never interprets the planes
/// or the raw policy; it only moves them between the game encoding and the
/// executor.
pub trait Predictor: Send + Sync {
    /// Width of the raw policy vector.
    fn policy_width(&self) -> usize;

    /// True if the policy head is laid out as move-type planes over the
    /// board rather than as the dense label list.
    fn is_policy_map(&self) -> bool;

    /// Evaluate `batch_size` positions at once. `planes` holds the encoded
    /// positions back to back.
    fn predict_batch(
        &self,
        planes: &[f32],
        batch_size: usize
    ) -> Result<Vec<PredictResponse>, PredictError>;
}

impl Predictor for sable_nn::Network {
    fn policy_width(&self) -> usize {
        sable_nn::Network::policy_width(self)
    }

    fn is_policy_map(&self) -> bool {
        sable_nn::Network::is_policy_map(self)
    }

    fn predict_batch(
        &self,
        planes: &[f32],
        batch_size: usize
    ) -> Result<Vec<PredictResponse>, PredictError>
    {
        let (values, policies) = self.forward_batch(planes, batch_size)
            .map_err(|reason| PredictError::InferenceFailed(reason.to_string()))?;

        Ok(values.into_iter()
            .zip(policies)
            .map(|(value, policy)| PredictResponse::new(value, policy))
            .collect())
    }
}

/// A stand-in executor producing a uniform policy and a small
/// deterministic value derived from the input planes. Used by the tests
/// and as the fallback when no model directory is present.
#[derive(Clone)]
pub struct RandomPredictor {
    policy_width: usize,
    policy_map: bool,
}

impl RandomPredictor {
    pub fn dense() -> Self {
        Self { policy_width: labels::dense_width(), policy_map: false }
    }

    pub fn policy_map() -> Self {
        Self { policy_width: labels::POLICY_MAP_WIDTH, policy_map: true }
    }
}

impl Predictor for RandomPredictor {
    fn policy_width(&self) -> usize {
        self.policy_width
    }

    fn is_policy_map(&self) -> bool {
        self.policy_map
    }

    fn predict_batch(
        &self,
        planes: &[f32],
        batch_size: usize
    ) -> Result<Vec<PredictResponse>, PredictError>
    {
        if batch_size == 0 {
            return Ok(vec! []);
        }

        let chunk = planes.len() / batch_size;

        Ok((0..batch_size).map(|b| {
            let mut hash = 0x9e3779b97f4a7c15u64;

            for &plane in &planes[b * chunk..(b + 1) * chunk] {
                hash = (hash ^ plane.to_bits() as u64).wrapping_mul(0xbf58476d1ce4e5b9);
            }

            // a value in roughly [-0.05, 0.05] so terminal results dominate
            let value = ((hash >> 40) as f32 / (1 << 24) as f32 - 0.5) * 0.1;
            let policy = vec! [1.0 / self.policy_width as f32; self.policy_width];

            PredictResponse::new(value, policy)
        }).collect())
    }
}

/// Gather the raw policy onto the legal moves of `pos` and renormalize.
/// Dense policies are looked up through the label table, mirrored when the
/// side to move is black; policy-map outputs are read directly. An
/// underflowing sum is replaced by the uniform distribution.
pub fn policy_over_moves(
    raw: &[f32],
    pos: &GamePosition,
    moves: &[Move],
    policy_map: bool
) -> Vec<f32>
{
    let mirror = pos.side_to_move() == Color::Black;
    let mut out = Vec::with_capacity(moves.len());

    for &mv in moves {
        let index = if policy_map {
            Some(labels::policy_map_index(&mv))
        } else {
            labels::dense_index(&pos.move_to_uci(mv), mirror)
        };
        let p = index.and_then(|i| raw.get(i)).copied().unwrap_or(0.0);

        out.push(if p.is_finite() { p.max(0.0) } else { 0.0 });
    }

    let sum: f32 = out.iter().sum();

    if sum < 1e-6 {
        warn!("degenerate_policy: falling back to the uniform distribution over {} moves", moves.len());

        let uniform = 1.0 / moves.len().max(1) as f32;

        for p in out.iter_mut() {
            *p = uniform;
        }
    } else {
        for p in out.iter_mut() {
            *p /= sum;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_chess::Variant;

    #[test]
    fn random_predictor_is_deterministic() {
        let predictor = RandomPredictor::dense();
        let planes = vec! [0.25f32; 64];

        let a = predictor.predict_batch(&planes, 1).unwrap();
        let b = predictor.predict_batch(&planes, 1).unwrap();

        assert_eq!(a[0].value(), b[0].value());
        assert!(a[0].value().abs() <= 0.05 + 1e-6);
    }

    #[test]
    fn policy_over_moves_sums_to_one() {
        let pos = GamePosition::startpos(Variant::Chess);
        let moves = pos.legal_moves();
        let raw = vec! [1.0 / labels::dense_width() as f32; labels::dense_width()];

        let policy = policy_over_moves(&raw, &pos, &moves, false);
        let sum: f32 = policy.iter().sum();

        assert_eq!(policy.len(), 20);
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zeroed_policy_falls_back_to_uniform() {
        let pos = GamePosition::startpos(Variant::Chess);
        let moves = pos.legal_moves();
        let raw = vec! [0.0f32; labels::dense_width()];

        let policy = policy_over_moves(&raw, &pos, &moves, false);

        for &p in &policy {
            assert!((p - 1.0 / 20.0).abs() < 1e-6);
        }
    }

    #[test]
    fn mirrored_lookup_is_used_for_black() {
        let mut pos = GamePosition::startpos(Variant::Chess);
        let mv = pos.parse_uci_move("e2e4").unwrap();
        pos.apply_move(mv);

        let moves = pos.legal_moves();
        let mut raw = vec! [0.0f32; labels::dense_width()];

        // weight only the mirrored label of e7e5, which is e2e4
        raw[labels::dense_index("e2e4", false).unwrap()] = 1.0;

        let policy = policy_over_moves(&raw, &pos, &moves, false);
        let e7e5 = moves.iter().position(|&m| pos.move_to_uci(m) == "e7e5").unwrap();

        assert!(policy[e7e5] > 0.99);
    }
}
