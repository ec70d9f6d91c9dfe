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

use shakmaty::{CastlingSide, Color, Position, Role, Square};

use crate::position::GamePosition;

/// Number of 8x8 input planes: six piece planes per side, four castling
/// planes, the halfmove clock, and a constant plane.
pub const NUM_PLANES: usize = 18;

/// Number of squares per plane.
pub const PLANE_SIZE: usize = 64;

/// Total number of values in one encoded position.
pub const FEATURE_SIZE: usize = NUM_PLANES * PLANE_SIZE;

fn role_channel(role: Role) -> usize {
    match role {
        Role::Pawn => 0,
        Role::Knight => 1,
        Role::Bishop => 2,
        Role::Rook => 3,
        Role::Queen => 4,
        Role::King => 5,
    }
}

fn square_index(sq: Square) -> usize {
    sq.rank() as usize * 8 + sq.file() as usize
}

/// Encode `pos` into the input planes of the network, always from the
/// perspective of the side to move. When black is to move the board is
/// flipped vertically so that the own pawns always advance towards higher
/// ranks, mirroring how the policy labels are interpreted.
///
/// Layout, plane-major:
///
/// * `0..6`   own pieces (P, N, B, R, Q, K)
/// * `6..12`  opponent pieces
/// * `12..16` castling rights (own king-side, own queen-side, theirs)
/// * `16`     halfmove clock, scaled by 1/100
/// * `17`     constant ones
pub fn board_to_planes(pos: &GamePosition) -> Vec<f32> {
    let mut planes = vec! [0.0f32; FEATURE_SIZE];
    let us = pos.side_to_move();
    let flip = us == Color::Black;
    let board = pos.inner().board();

    for sq in Square::ALL {
        if let Some(piece) = board.piece_at(sq) {
            let side_offset = if piece.color == us { 0 } else { 6 };
            let channel = side_offset + role_channel(piece.role);
            let oriented = if flip { sq.flip_vertical() } else { sq };

            planes[channel * PLANE_SIZE + square_index(oriented)] = 1.0;
        }
    }

    let castles = pos.inner().castles();
    let rights = [
        (us, CastlingSide::KingSide),
        (us, CastlingSide::QueenSide),
        (us.other(), CastlingSide::KingSide),
        (us.other(), CastlingSide::QueenSide),
    ];

    for (i, &(color, side)) in rights.iter().enumerate() {
        if castles.has(color, side) {
            let channel = 12 + i;

            for j in 0..PLANE_SIZE {
                planes[channel * PLANE_SIZE + j] = 1.0;
            }
        }
    }

    let halfmove = pos.halfmove_clock() as f32 / 100.0;

    for j in 0..PLANE_SIZE {
        planes[16 * PLANE_SIZE + j] = halfmove;
        planes[17 * PLANE_SIZE + j] = 1.0;
    }

    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::variant::Variant;

    #[test]
    fn startpos_piece_counts() {
        let pos = GamePosition::startpos(Variant::Chess);
        let planes = board_to_planes(&pos);

        let own: f32 = planes[0..6 * PLANE_SIZE].iter().sum();
        let theirs: f32 = planes[6 * PLANE_SIZE..12 * PLANE_SIZE].iter().sum();

        assert_eq!(own, 16.0);
        assert_eq!(theirs, 16.0);
        assert_eq!(planes.len(), FEATURE_SIZE);
    }

    #[test]
    fn startpos_is_symmetric_between_sides() {
        let white = GamePosition::startpos(Variant::Chess);
        let mut black = GamePosition::startpos(Variant::Chess);
        let mv = black.parse_uci_move("e2e4").unwrap();
        black.apply_move(mv);

        let white_planes = board_to_planes(&white);
        let black_planes = board_to_planes(&black);

        // after flipping, black's own back rank occupies the same plane
        // cells as white's did, apart from the e-pawn that moved
        let own_kings_white = &white_planes[5 * PLANE_SIZE..6 * PLANE_SIZE];
        let own_kings_black = &black_planes[5 * PLANE_SIZE..6 * PLANE_SIZE];

        assert_eq!(own_kings_white, own_kings_black);
    }

    #[test]
    fn all_castling_planes_set_at_startpos() {
        let pos = GamePosition::startpos(Variant::Chess);
        let planes = board_to_planes(&pos);

        for channel in 12..16 {
            assert_eq!(planes[channel * PLANE_SIZE], 1.0, "channel {}", channel);
        }
    }

    #[test]
    fn halfmove_plane_tracks_the_clock() {
        let pos = GamePosition::from_fen(
            Variant::Chess,
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 40 30"
        ).unwrap();
        let planes = board_to_planes(&pos);

        assert!((planes[16 * PLANE_SIZE] - 0.4).abs() < 1e-6);
    }
}
