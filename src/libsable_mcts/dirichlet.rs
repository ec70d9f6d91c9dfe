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

use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

/// Mix Dirichlet noise into `prior` with weight `epsilon`, leaving the
/// distribution normalized. Lower `alpha` concentrates the noise on fewer
/// moves. A prior with fewer than two entries is left untouched.
pub fn add<R: Rng>(prior: &mut [f32], alpha: f32, epsilon: f32, rng: &mut R) {
    if prior.len() < 2 || epsilon <= 0.0 {
        return;
    }

    let dirichlet = match Dirichlet::new_with_size(alpha, prior.len()) {
        Ok(dirichlet) => dirichlet,
        Err(_) => { return; }
    };
    let noise = dirichlet.sample(rng);

    for (p, eta) in prior.iter_mut().zip(noise) {
        *p = *p * (1.0 - epsilon) + epsilon * eta;
    }

    let sum: f32 = prior.iter().sum();

    if sum > 1e-6 {
        for p in prior.iter_mut() {
            *p /= sum;
        }
    }
}
