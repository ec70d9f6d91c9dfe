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

use std::collections::HashMap;
use std::path::Path;

use crate::loader::{self, GraphDef};
use crate::Error;

/// A loaded network with a single dense hidden layer, a tanh value head
/// and a softmax policy head. The forward pass runs on the CPU; the shape
/// of the policy head (dense labels or policy map) is recorded in the
/// graph definition.
pub struct Network {
    graph: GraphDef,
    hidden_w: Vec<f32>,
    hidden_b: Vec<f32>,
    value_w: Vec<f32>,
    value_b: f32,
    policy_w: Vec<f32>,
    policy_b: Vec<f32>,
}

fn take(
    tensors: &mut HashMap<String, Vec<f32>>,
    name: &str,
    expected: usize
) -> Result<Vec<f32>, Error>
{
    let tensor = tensors.remove(name)
        .ok_or_else(|| Error::ModelLoadFailed(format!("missing tensor {:?}", name)))?;

    if tensor.len() != expected {
        return Err(Error::ShapeMismatch {
            tensor: name.into(),
            expected,
            actual: tensor.len()
        });
    }

    Ok(tensor)
}

impl Network {
    /// Load the network from a directory containing a graph definition and
    /// a parameter file, discovered by suffix.
    pub fn load(dir: &Path) -> Result<Self, Error> {
        let (graph_path, params_path) = loader::discover(dir)?;
        let graph = GraphDef::load(&graph_path)?;
        let tensors = loader::load_tensors(&params_path)?;

        Self::from_parts(graph, tensors)
    }

    pub(crate) fn from_parts(
        graph: GraphDef,
        mut tensors: HashMap<String, Vec<f32>>
    ) -> Result<Self, Error>
    {
        let (input, hidden, policy) = (graph.input_size, graph.hidden_size, graph.policy_width);

        Ok(Self {
            hidden_w: take(&mut tensors, "hidden/weight", hidden * input)?,
            hidden_b: take(&mut tensors, "hidden/bias", hidden)?,
            value_w: take(&mut tensors, "value/weight", hidden)?,
            value_b: take(&mut tensors, "value/bias", 1)?[0],
            policy_w: take(&mut tensors, "policy/weight", policy * hidden)?,
            policy_b: take(&mut tensors, "policy/bias", policy)?,
            graph
        })
    }

    pub fn input_size(&self) -> usize {
        self.graph.input_size
    }

    pub fn policy_width(&self) -> usize {
        self.graph.policy_width
    }

    pub fn is_policy_map(&self) -> bool {
        self.graph.policy_map
    }

    /// Run the forward pass over a batch of `batch_size` encoded positions,
    /// returning one value in `[-1, 1]` and one policy distribution per
    /// position.
    pub fn forward_batch(
        &self,
        planes: &[f32],
        batch_size: usize
    ) -> Result<(Vec<f32>, Vec<Vec<f32>>), Error>
    {
        let input = self.graph.input_size;

        if planes.len() != batch_size * input {
            return Err(Error::ShapeMismatch {
                tensor: "input".into(),
                expected: batch_size * input,
                actual: planes.len()
            });
        }

        let hidden = self.graph.hidden_size;
        let policy_width = self.graph.policy_width;
        let mut values = Vec::with_capacity(batch_size);
        let mut policies = Vec::with_capacity(batch_size);

        for b in 0..batch_size {
            let x = &planes[b * input..(b + 1) * input];
            let mut h = vec! [0.0f32; hidden];

            for (j, h_j) in h.iter_mut().enumerate() {
                let row = &self.hidden_w[j * input..(j + 1) * input];
                let mut acc = self.hidden_b[j];

                for (w, v) in row.iter().zip(x.iter()) {
                    acc += w * v;
                }

                *h_j = acc.max(0.0);
            }

            let mut value = self.value_b;

            for (w, v) in self.value_w.iter().zip(h.iter()) {
                value += w * v;
            }

            values.push(value.tanh());

            let mut logits = vec! [0.0f32; policy_width];

            for (p, logit) in logits.iter_mut().enumerate() {
                let row = &self.policy_w[p * hidden..(p + 1) * hidden];
                let mut acc = self.policy_b[p];

                for (w, v) in row.iter().zip(h.iter()) {
                    acc += w * v;
                }

                *logit = acc;
            }

            policies.push(softmax(&logits));
        }

        Ok((values, policies))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut out: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = out.iter().sum();

    if sum > 0.0 {
        for p in out.iter_mut() {
            *p /= sum;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_network() -> Network {
        let graph = GraphDef {
            input_size: 4,
            hidden_size: 2,
            policy_width: 3,
            policy_map: false
        };
        let mut tensors = HashMap::new();

        tensors.insert("hidden/weight".into(), vec! [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        tensors.insert("hidden/bias".into(), vec! [0.0, 0.0]);
        tensors.insert("value/weight".into(), vec! [1.0, -1.0]);
        tensors.insert("value/bias".into(), vec! [0.0]);
        tensors.insert("policy/weight".into(), vec! [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        tensors.insert("policy/bias".into(), vec! [0.0, 0.0, 0.0]);

        Network::from_parts(graph, tensors).unwrap()
    }

    #[test]
    fn forward_produces_bounded_value_and_normalized_policy() {
        let network = tiny_network();
        let (values, policies) = network.forward_batch(&[1.0, 0.0, 0.5, 0.0], 1).unwrap();

        assert_eq!(values.len(), 1);
        assert!((-1.0..=1.0).contains(&values[0]));

        let sum: f32 = policies[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batched_forward_matches_single() {
        let network = tiny_network();
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        let mut batch = vec! [];
        batch.extend_from_slice(&a);
        batch.extend_from_slice(&b);

        let (batch_values, _) = network.forward_batch(&batch, 2).unwrap();
        let (single_a, _) = network.forward_batch(&a, 1).unwrap();
        let (single_b, _) = network.forward_batch(&b, 1).unwrap();

        assert_eq!(batch_values[0], single_a[0]);
        assert_eq!(batch_values[1], single_b[0]);
    }

    #[test]
    fn wrong_input_size_is_a_shape_mismatch() {
        let network = tiny_network();

        assert!(matches!(
            network.forward_batch(&[1.0, 2.0], 1),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn missing_tensor_fails_to_load() {
        let graph = GraphDef {
            input_size: 4,
            hidden_size: 2,
            policy_width: 3,
            policy_map: false
        };

        assert!(Network::from_parts(graph, HashMap::new()).is_err());
    }
}
