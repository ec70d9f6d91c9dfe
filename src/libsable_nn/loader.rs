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

use half::f16;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Error;

const BASE_85: [char; 85] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J',
    'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T',
    'U', 'V', 'W', 'X', 'Y', 'Z',
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j',
    'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't',
    'u', 'v', 'w', 'x', 'y', 'z',
    '!', '#', '$', '%', '&', '(', ')', '*', '+', '-',
    ';', '<', '=', '>', '?', '@', '^', '_', '`', '{',
    '|', '}', '~'
];

lazy_static! {
    /// Lookup table from alphabet characters to its bit value
    static ref DECODE_85: [i8; 256] = {
        let mut out = [-1; 256];

        for (i, b) in BASE_85.iter().enumerate() {
            out[*b as usize] = i as i8;
        }

        out
    };
}

/// Decode a RFC 1924 (Ascii85) encoded string of FP16 values and returns
/// an array of the FP32 numbers it represents.
pub fn decode_b85(input: &str) -> Option<Vec<f32>> {
    let mut output = vec! [];
    let mut iter = input.chars();

    'outer: loop {
        // decode the alphabet into raw bits
        let mut acc: u32 = 0;

        for _ in 0..5 {
            if let Some(ch) = iter.next() {
                let de = DECODE_85[ch as usize];
                if de < 0 {
                    return None;  // invalid character
                }

                acc = 85 * acc + de as u32;
            } else {
                break 'outer;
            }
        }

        // pull the bits apart into 16-bit floating point numbers
        let mut dst = [0u8; 4];

        for e in dst.iter_mut() {
            *e = acc as u8;
            acc >>= 8;
        }

        output.push(f16::from_bits(((dst[2] as u16) << 8) | (dst[3] as u16)).to_f32());
        output.push(f16::from_bits(((dst[0] as u16) << 8) | (dst[1] as u16)).to_f32());
    }

    Some(output)
}

fn skip_until<I>(iter: &mut I, stop: char) -> String
    where I: Iterator<Item=char>
{
    let mut out: String = String::new();

    loop {
        let ch = iter.next();

        if ch.is_none() || ch == Some(stop) {
            break
        }

        out.push(ch.unwrap());
    }

    out
}

/// Parse a file of `"name": "value"` pairs into a map, in file order. Both
/// the graph definition and the parameter file use this layout.
fn load_pairs(path: &Path) -> Result<Vec<(String, String)>, Error> {
    let content = fs::read_to_string(path)
        .map_err(|reason| Error::ModelLoadFailed(format!("{:?}: {}", path, reason)))?;
    let mut iter = content.chars();
    let mut out = vec! [];

    loop {
        skip_until(&mut iter, '"');
        let name = skip_until(&mut iter, '"');
        if name.is_empty() {
            break
        }

        skip_until(&mut iter, '"');
        let value = skip_until(&mut iter, '"');

        out.push((name, value));
    }

    Ok(out)
}

/// Find the graph definition and weight file in `dir`, discovered by their
/// `.json` and `.params` suffixes.
pub fn discover(dir: &Path) -> Result<(PathBuf, PathBuf), Error> {
    let entries = fs::read_dir(dir)
        .map_err(|_| Error::ModelNotFound(dir.to_path_buf()))?;
    let mut graph = None;
    let mut params = None;

    for entry in entries.flatten() {
        let path = entry.path();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => { graph = Some(path); },
            Some("params") => { params = Some(path); },
            _ => {}
        }
    }

    match (graph, params) {
        (Some(graph), Some(params)) => Ok((graph, params)),
        _ => Err(Error::ModelNotFound(dir.to_path_buf()))
    }
}

/// The architecture metadata stored next to the weights.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphDef {
    pub input_size: usize,
    pub hidden_size: usize,
    pub policy_width: usize,
    pub policy_map: bool,
}

impl GraphDef {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let pairs: HashMap<String, String> = load_pairs(path)?.into_iter().collect();
        let field = |name: &str| -> Result<usize, Error> {
            pairs.get(name)
                .and_then(|value| value.parse::<usize>().ok())
                .ok_or_else(|| Error::ModelLoadFailed(format!("missing or invalid field {:?}", name)))
        };

        Ok(Self {
            input_size: field("input_size")?,
            hidden_size: field("hidden_size")?,
            policy_width: field("policy_width")?,
            policy_map: pairs.get("policy_map").map(|v| v == "true").unwrap_or(false),
        })
    }
}

/// Load every tensor of the parameter file, b85-decoded to f32.
pub fn load_tensors(path: &Path) -> Result<HashMap<String, Vec<f32>>, Error> {
    let mut out = HashMap::new();

    for (name, value) in load_pairs(path)? {
        let tensor = decode_b85(&value)
            .ok_or_else(|| Error::ModelLoadFailed(format!("tensor {:?} is not valid b85", name)))?;

        for (i, element) in tensor.iter().enumerate() {
            if !element.is_finite() {
                return Err(Error::ModelLoadFailed(
                    format!("tensor {:?} has a non-finite element at {}", name, i)
                ));
            }
        }

        out.insert(name, tensor);
    }

    Ok(out)
}
