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

#[macro_use] extern crate lazy_static;

mod loader;
mod network;

pub use self::network::Network;

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Error {
    /// The model directory does not exist or does not contain both a graph
    /// file and a parameter file.
    ModelNotFound(PathBuf),

    /// The artifacts exist but could not be parsed.
    ModelLoadFailed(String),

    /// A tensor does not have the size the graph definition promises.
    ShapeMismatch { tensor: String, expected: usize, actual: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ModelNotFound(dir) => {
                write!(f, "no .json and .params pair found in {:?}", dir)
            },
            Error::ModelLoadFailed(reason) => {
                write!(f, "could not load model: {}", reason)
            },
            Error::ShapeMismatch { tensor, expected, actual } => {
                write!(f, "tensor {} has {} values, expected {}", tensor, actual, expected)
            }
        }
    }
}

impl StdError for Error {}
