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

//! Move-label tables for the two policy-head encodings.
//!
//! The *dense* head is a flat list of UCI move strings, generated for the
//! canonical (white-to-move) orientation; positions with black to move look
//! their moves up through [`mirror_move`]. The *policy-map* head is laid
//! out as move-type planes over the origin square and needs no mirroring.

use std::collections::HashMap;

use shakmaty::{Move, Role, Square};

const QUEEN_DIRS: [(i32, i32); 8] = [
    (0, 1), (1, 1), (1, 0), (1, -1), (0, -1), (-1, -1), (-1, 0), (-1, 1)
];

const KNIGHT_JUMPS: [(i32, i32); 8] = [
    (1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2)
];

const DROP_ROLES: [(char, Role); 5] = [
    ('P', Role::Pawn), ('N', Role::Knight), ('B', Role::Bishop),
    ('R', Role::Rook), ('Q', Role::Queen)
];

/// Number of move-type planes in the policy-map head: 56 queen rays,
/// 8 knight jumps, 9 underpromotions, 5 drop planes.
pub const POLICY_MAP_PLANES: usize = 78;

/// Output width of a policy-map network.
pub const POLICY_MAP_WIDTH: usize = POLICY_MAP_PLANES * 64;

fn square_name(file: i32, rank: i32) -> String {
    format!("{}{}", (b'a' + file as u8) as char, (b'1' + rank as u8) as char)
}

fn on_board(file: i32, rank: i32) -> bool {
    (0..8).contains(&file) && (0..8).contains(&rank)
}

fn generate_labels() -> Vec<String> {
    let mut labels = Vec::with_capacity(2304);

    for file in 0..8 {
        for rank in 0..8 {
            let from = square_name(file, rank);

            for &(df, dr) in &QUEEN_DIRS {
                for dist in 1..8 {
                    let (tf, tr) = (file + df * dist, rank + dr * dist);

                    if on_board(tf, tr) {
                        labels.push(format!("{}{}", from, square_name(tf, tr)));
                    }
                }
            }

            for &(df, dr) in &KNIGHT_JUMPS {
                let (tf, tr) = (file + df, rank + dr);

                if on_board(tf, tr) {
                    labels.push(format!("{}{}", from, square_name(tf, tr)));
                }
            }
        }
    }

    for file in 0..8 {
        for df in -1i32..=1 {
            let tf = file + df;

            if on_board(tf, 0) {
                for promo in ['q', 'r', 'b', 'n'] {
                    labels.push(format!("{}{}{}", square_name(file, 6), square_name(tf, 7), promo));
                    labels.push(format!("{}{}{}", square_name(file, 1), square_name(tf, 0), promo));
                }
            }
        }
    }

    for &(ch, _) in &DROP_ROLES {
        for file in 0..8 {
            for rank in 0..8 {
                labels.push(format!("{}@{}", ch, square_name(file, rank)));
            }
        }
    }

    labels
}

lazy_static! {
    /// All dense policy labels, in network output order.
    pub static ref DENSE_LABELS: Vec<String> = generate_labels();

    static ref DENSE_LOOKUP: HashMap<&'static str, usize> = {
        DENSE_LABELS.iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect()
    };
}

/// Output width of a dense-policy network.
pub fn dense_width() -> usize {
    DENSE_LABELS.len()
}

/// Mirror a UCI move string between the white and black orientation by
/// flipping every rank digit, e.g. `e2e4` becomes `e7e5`.
pub fn mirror_move(uci: &str) -> String {
    uci.chars()
        .map(|ch| {
            if ch.is_ascii_digit() {
                let rank = ch as u8 - b'0';
                (b'0' + (9 - rank)) as char
            } else {
                ch
            }
        })
        .collect()
}

/// Index of a move in the dense label space; `mirror` selects the
/// black-to-move orientation.
pub fn dense_index(uci: &str, mirror: bool) -> Option<usize> {
    if mirror {
        DENSE_LOOKUP.get(mirror_move(uci).as_str()).copied()
    } else {
        DENSE_LOOKUP.get(uci).copied()
    }
}

fn square_index(sq: Square) -> usize {
    sq.rank() as usize * 8 + sq.file() as usize
}

fn drop_channel(role: Role) -> usize {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        _ => 4,
    }
}

fn castle_destination(king: Square, rook: Square) -> (i32, i32) {
    let rank = king.rank() as i32;

    if (rook.file() as i32) > (king.file() as i32) {
        (6, rank)
    } else {
        (2, rank)
    }
}

fn move_coords(mv: &Move) -> ((i32, i32), (i32, i32), Option<Role>) {
    match *mv {
        Move::Normal { from, to, promotion, .. } => {
            ((from.file() as i32, from.rank() as i32), (to.file() as i32, to.rank() as i32), promotion)
        },
        Move::EnPassant { from, to } => {
            ((from.file() as i32, from.rank() as i32), (to.file() as i32, to.rank() as i32), None)
        },
        Move::Castle { king, rook } => {
            ((king.file() as i32, king.rank() as i32), castle_destination(king, rook), None)
        },
        Move::Put { .. } => unreachable!("drops carry no origin square"),
    }
}

/// Index of a move in the policy-map layout: `plane * 64 + origin`, where
/// the plane encodes the move type. Queen promotions share the plane of the
/// plain pawn move; underpromotions get their own planes.
pub fn policy_map_index(mv: &Move) -> usize {
    if let Move::Put { role, to } = *mv {
        let plane = 73 + drop_channel(role);
        return plane * 64 + square_index(to);
    }

    let ((ff, fr), (tf, tr), promotion) = move_coords(mv);
    let (df, dr) = (tf - ff, tr - fr);
    let from_index = (fr * 8 + ff) as usize;

    let plane = match promotion {
        Some(promo) if promo != Role::Queen => {
            let dir = (df + 1) as usize;
            let piece = match promo {
                Role::Knight => 0,
                Role::Bishop => 1,
                _ => 2,
            };

            64 + dir * 3 + piece
        },
        _ => {
            if let Some(jump) = KNIGHT_JUMPS.iter().position(|&j| j == (df, dr)) {
                56 + jump
            } else {
                let dir = QUEEN_DIRS.iter()
                    .position(|&d| d == (df.signum(), dr.signum()))
                    .expect("move does not follow a queen ray");
                let dist = df.abs().max(dr.abs()) as usize;

                dir * 7 + (dist - 1)
            }
        }
    };

    plane * 64 + from_index
}
