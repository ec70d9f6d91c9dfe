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

use log::debug;
use std::error::Error;
use std::fmt;

/// A single UCI option. Integer options that carry a `Centi_` prefix are
/// stored as integers and decoded to floats with [`UciOptions::centi`].
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Spin { value: i64, default: i64, min: i64, max: i64 },
    Check { value: bool, default: bool },
    Combo { value: String, default: String, choices: Vec<String> },
    Text { value: String, default: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionError {
    Unknown(String),
    OutOfRange { name: String, value: i64, min: i64, max: i64 },
    Invalid { name: String, value: String },
}

impl fmt::Display for OptionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionError::Unknown(name) => write!(f, "No such option: {}", name),
            OptionError::OutOfRange { name, value, min, max } => {
                write!(f, "Option {} = {} is outside [{}, {}]", name, value, min, max)
            },
            OptionError::Invalid { name, value } => {
                write!(f, "Invalid value {:?} for option {}", value, name)
            }
        }
    }
}

impl Error for OptionError {}

/// Ordered registry of all UCI options, with case-insensitive lookup as
/// demanded by the protocol.
#[derive(Clone, Debug)]
pub struct UciOptions {
    entries: Vec<(String, OptionValue)>
}

fn spin(value: i64, min: i64, max: i64) -> OptionValue {
    OptionValue::Spin { value, default: value, min, max }
}

fn check(value: bool) -> OptionValue {
    OptionValue::Check { value, default: value }
}

fn combo(value: &str, choices: &[&str]) -> OptionValue {
    OptionValue::Combo {
        value: value.into(),
        default: value.into(),
        choices: choices.iter().map(|&c| c.into()).collect()
    }
}

fn text(value: &str) -> OptionValue {
    OptionValue::Text { value: value.into(), default: value.into() }
}

impl Default for UciOptions {
    fn default() -> Self {
        let entries = vec! [
            ("UCI_Variant".into(), combo("chess", &[
                "chess", "crazyhouse", "atomic", "antichess",
                "kingofthehill", "3check", "racingkings", "horde"
            ])),
            ("Context".into(), combo("CPU", &["CPU", "GPU"])),
            ("Batch_Size".into(), spin(8, 1, 8192)),
            ("Threads".into(), spin(2, 1, 512)),
            ("Centi_CPuct_Init".into(), spin(250, 1, 99999)),
            ("CPuct_Base".into(), spin(19652, 1, 99999)),
            ("Centi_Dirichlet_Epsilon".into(), spin(25, 0, 99999)),
            ("Centi_Dirichlet_Alpha".into(), spin(20, 1, 99999)),
            ("Centi_U_Init".into(), spin(100, 0, 100)),
            ("Centi_U_Min".into(), spin(100, 0, 100)),
            ("U_Base".into(), spin(1965, 1, 99999)),
            ("Centi_U_Init_Divisor".into(), spin(100, 1, 99999)),
            ("Centi_Q_Value_Weight".into(), spin(70, 0, 99999)),
            ("Centi_Q_Thresh_Init".into(), spin(50, 0, 100)),
            ("Centi_Q_Thresh_Max".into(), spin(90, 0, 100)),
            ("Q_Thresh_Base".into(), spin(1965, 1, 99999)),
            ("Max_Search_Depth".into(), spin(99, 1, 99999)),
            ("Centi_Temperature".into(), spin(0, 0, 99999)),
            ("Temperature_Moves".into(), spin(0, 0, 99999)),
            ("Virtual_Loss".into(), spin(3, 0, 99999)),
            ("Nodes".into(), spin(0, 0, 999999999)),
            ("Move_Overhead".into(), spin(50, 0, 5000)),
            ("Search_Seed".into(), spin(0, 0, 999999999)),
            ("Use_Raw_Network".into(), check(false)),
            ("Enhance_Checks".into(), check(true)),
            ("Enhance_Captures".into(), check(false)),
            ("Use_Transposition_Table".into(), check(true)),
            ("Model_Directory".into(), text("model")),
        ];

        Self { entries }
    }
}

impl UciOptions {
    fn find(&self, name: &str) -> Option<&OptionValue> {
        self.entries.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Set an option from its textual UCI representation. Unknown names and
    /// out-of-range values are reported as errors and leave the registry
    /// untouched.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        let entry = self.entries.iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name));
        let (key, slot) = match entry {
            Some((key, slot)) => (key.clone(), slot),
            None => { return Err(OptionError::Unknown(name.into())); }
        };

        match slot {
            OptionValue::Spin { value: cur, min, max, .. } => {
                let parsed = value.trim().parse::<i64>().map_err(|_| {
                    OptionError::Invalid { name: key.clone(), value: value.into() }
                })?;

                if parsed < *min || parsed > *max {
                    return Err(OptionError::OutOfRange {
                        name: key, value: parsed, min: *min, max: *max
                    });
                }

                *cur = parsed;
            },
            OptionValue::Check { value: cur, .. } => {
                *cur = match value.trim() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(OptionError::Invalid { name: key, value: other.into() });
                    }
                };
            },
            OptionValue::Combo { value: cur, choices, .. } => {
                let trimmed = value.trim();

                match choices.iter().find(|c| c.eq_ignore_ascii_case(trimmed)) {
                    Some(choice) => { *cur = choice.clone(); },
                    None => {
                        return Err(OptionError::Invalid { name: key, value: trimmed.into() });
                    }
                }
            },
            OptionValue::Text { value: cur, .. } => {
                *cur = value.trim().into();
            }
        }

        debug!("updated option {} to {}", key, value);

        Ok(())
    }

    /// Integer value of a spin option. Panics on a name that is not in the
    /// table, since that is a programming error rather than user input.
    pub fn spin(&self, name: &str) -> i64 {
        match self.find(name) {
            Some(OptionValue::Spin { value, .. }) => *value,
            _ => panic!("not a spin option: {}", name)
        }
    }

    /// Centi-scaled spin option decoded to a float, e.g. `Centi_CPuct_Init
    /// = 250` becomes `2.5`.
    pub fn centi(&self, name: &str) -> f32 {
        self.spin(name) as f32 / 100.0
    }

    pub fn check(&self, name: &str) -> bool {
        match self.find(name) {
            Some(OptionValue::Check { value, .. }) => *value,
            _ => panic!("not a check option: {}", name)
        }
    }

    pub fn string(&self, name: &str) -> &str {
        match self.find(name) {
            Some(OptionValue::Combo { value, .. }) => value,
            Some(OptionValue::Text { value, .. }) => value,
            _ => panic!("not a string option: {}", name)
        }
    }

    /// The `option name … type …` declaration lines sent in response to the
    /// `uci` command, in table order.
    pub fn declarations(&self) -> Vec<String> {
        self.entries.iter().map(|(name, value)| {
            match value {
                OptionValue::Spin { default, min, max, .. } => {
                    format!("option name {} type spin default {} min {} max {}", name, default, min, max)
                },
                OptionValue::Check { default, .. } => {
                    format!("option name {} type check default {}", name, default)
                },
                OptionValue::Combo { default, choices, .. } => {
                    let vars = choices.iter()
                        .map(|c| format!(" var {}", c))
                        .collect::<String>();

                    format!("option name {} type combo default {}{}", name, default, vars)
                },
                OptionValue::Text { default, .. } => {
                    format!("option name {} type string default {}", name, default)
                }
            }
        }).collect()
    }
}
