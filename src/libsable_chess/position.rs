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

use std::error::Error;
use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::variant::{Variant, VariantPosition};
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Color, EnPassantMode, Move, Outcome, Position};

#[derive(Clone, Debug)]
pub enum PositionError {
    InvalidFen(String),
    IllegalSetup(String),
    IllegalMove(String),
    UnknownVariant(String),
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PositionError::InvalidFen(fen) => write!(f, "invalid fen {:?}", fen),
            PositionError::IllegalSetup(fen) => write!(f, "illegal position {:?}", fen),
            PositionError::IllegalMove(mv) => write!(f, "illegal move {:?}", mv),
            PositionError::UnknownVariant(name) => write!(f, "unknown variant {:?}", name),
        }
    }
}

impl Error for PositionError {}

/// Map a `UCI_Variant` option value to the game rules it selects.
pub fn variant_from_name(name: &str) -> Result<Variant, PositionError> {
    match name.to_ascii_lowercase().as_str() {
        "chess" | "standard" => Ok(Variant::Chess),
        "crazyhouse" => Ok(Variant::Crazyhouse),
        "atomic" => Ok(Variant::Atomic),
        "antichess" => Ok(Variant::Antichess),
        "kingofthehill" => Ok(Variant::KingOfTheHill),
        "3check" | "threecheck" => Ok(Variant::ThreeCheck),
        "racingkings" => Ok(Variant::RacingKings),
        "horde" => Ok(Variant::Horde),
        other => Err(PositionError::UnknownVariant(other.into())),
    }
}

/// UCI notation of a move, independent of the position it came from.
pub fn move_uci(mv: Move) -> String {
    mv.to_uci(CastlingMode::Standard).to_string()
}

/// A reached game position. This is the only type the search core sees;
/// all rules knowledge stays behind it.
#[derive(Clone)]
pub struct GamePosition {
    inner: VariantPosition
}

impl GamePosition {
    pub fn startpos(variant: Variant) -> Self {
        Self { inner: VariantPosition::new(variant) }
    }

    pub fn from_fen(variant: Variant, fen: &str) -> Result<Self, PositionError> {
        let parsed: Fen = fen.parse()
            .map_err(|_| PositionError::InvalidFen(fen.into()))?;
        let inner = VariantPosition::from_setup(variant, parsed.into_setup(), CastlingMode::Standard)
            .map_err(|_| PositionError::IllegalSetup(fen.into()))?;

        Ok(Self { inner })
    }

    pub fn variant(&self) -> Variant {
        self.inner.variant()
    }

    /// 64-bit identity of this position, used as the transposition key and
    /// for tree-reuse matching.
    pub fn hash_key(&self) -> u64 {
        self.inner.zobrist_hash::<Zobrist64>(EnPassantMode::Legal).0
    }

    pub fn side_to_move(&self) -> Color {
        self.inner.turn()
    }

    pub fn is_chess960(&self) -> bool {
        false
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        self.inner.legal_moves().to_vec()
    }

    /// `Some(v)` when the game is over, with `v` from the side-to-move
    /// perspective: `-1` checkmated, `0` drawn. The fifty-move rule counts
    /// as a draw even though move generation does not enforce it.
    pub fn terminal_value(&self) -> Option<f32> {
        if let Some(outcome) = self.inner.outcome() {
            Some(match outcome {
                Outcome::Draw => 0.0,
                Outcome::Decisive { winner } => {
                    if winner == self.inner.turn() { 1.0 } else { -1.0 }
                }
            })
        } else if self.inner.halfmoves() >= 100 {
            Some(0.0)
        } else {
            None
        }
    }

    /// Number of half-moves played since the start of the game.
    pub fn game_ply(&self) -> u32 {
        let fullmoves = self.inner.fullmoves().get();
        2 * (fullmoves - 1) + if self.inner.turn() == Color::Black { 1 } else { 0 }
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.inner.halfmoves()
    }

    pub fn apply_move(&mut self, mv: Move) {
        self.inner.play_unchecked(mv);
    }

    pub fn fen(&self) -> String {
        Fen::try_from_setup(self.inner.clone().to_setup(EnPassantMode::Legal)).unwrap().to_string()
    }

    pub fn parse_uci_move(&self, mv: &str) -> Result<Move, PositionError> {
        let uci: UciMove = mv.parse()
            .map_err(|_| PositionError::IllegalMove(mv.into()))?;

        uci.to_move(&self.inner)
            .map_err(|_| PositionError::IllegalMove(mv.into()))
    }

    pub fn move_to_uci(&self, mv: Move) -> String {
        mv.to_uci(CastlingMode::Standard).to_string()
    }

    pub fn is_check(&self) -> bool {
        self.inner.is_check()
    }

    /// True if playing `mv` puts the opponent in check.
    pub fn gives_check(&self, mv: Move) -> bool {
        let mut next = self.inner.clone();
        next.play_unchecked(mv);
        next.is_check()
    }

    pub fn is_capture(&self, mv: Move) -> bool {
        mv.is_capture()
    }

    pub(crate) fn inner(&self) -> &VariantPosition {
        &self.inner
    }
}

impl fmt::Debug for GamePosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GamePosition({})", self.fen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn startpos_basics() {
        let pos = GamePosition::startpos(Variant::Chess);

        assert_eq!(pos.legal_moves().len(), 20);
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.game_ply(), 0);
        assert_eq!(pos.terminal_value(), None);
    }

    #[test]
    fn fen_round_trip() {
        let pos = GamePosition::from_fen(Variant::Chess, STARTPOS).unwrap();

        assert_eq!(pos.fen(), STARTPOS);
        assert_eq!(pos.hash_key(), GamePosition::startpos(Variant::Chess).hash_key());
    }

    #[test]
    fn transpositions_share_the_key() {
        let mut a = GamePosition::startpos(Variant::Chess);
        let mut b = GamePosition::startpos(Variant::Chess);

        for mv in ["g1f3", "g8f6", "b1c3"] {
            let mv = a.parse_uci_move(mv).unwrap();
            a.apply_move(mv);
        }
        for mv in ["b1c3", "g8f6", "g1f3"] {
            let mv = b.parse_uci_move(mv).unwrap();
            b.apply_move(mv);
        }

        assert_eq!(a.hash_key(), b.hash_key());
    }

    #[test]
    fn checkmate_is_a_loss_for_the_side_to_move() {
        // fool's mate
        let pos = GamePosition::from_fen(
            Variant::Chess,
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3"
        ).unwrap();

        assert_eq!(pos.terminal_value(), Some(-1.0));
        assert_eq!(pos.legal_moves().len(), 0);
    }

    #[test]
    fn stalemate_is_a_draw() {
        let pos = GamePosition::from_fen(Variant::Chess, "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();

        assert_eq!(pos.terminal_value(), Some(0.0));
    }

    #[test]
    fn fifty_move_rule_is_a_draw() {
        let pos = GamePosition::from_fen(Variant::Chess, "8/8/4k3/8/4K3/8/8/4R3 w - - 100 80").unwrap();

        assert_eq!(pos.terminal_value(), Some(0.0));
    }

    #[test]
    fn uci_moves_round_trip() {
        let pos = GamePosition::startpos(Variant::Chess);
        let mv = pos.parse_uci_move("e2e4").unwrap();

        assert_eq!(pos.move_to_uci(mv), "e2e4");
        assert!(pos.parse_uci_move("e2e5").is_err());
    }

    #[test]
    fn checks_and_captures_are_recognized() {
        let pos = GamePosition::from_fen(
            Variant::Chess,
            "rnbqkbnr/ppp2ppp/8/3pp3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 0 3"
        ).unwrap();
        let capture = pos.parse_uci_move("e4d5").unwrap();
        let check = pos.parse_uci_move("f1b5").unwrap();

        assert!(pos.is_capture(capture));
        assert!(!pos.is_capture(check));
        assert!(pos.gives_check(check));
        assert!(!pos.gives_check(capture));
    }

    #[test]
    fn crazyhouse_startpos_parses() {
        let pos = GamePosition::startpos(Variant::Crazyhouse);

        assert_eq!(pos.legal_moves().len(), 20);
        assert_eq!(variant_from_name("crazyhouse").unwrap(), Variant::Crazyhouse);
        assert!(variant_from_name("shogi").is_err());
    }
}
