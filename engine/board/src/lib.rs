//! Board-layer types consumed by the search graph.
//!
//! This crate deliberately stops short of a full chess implementation: move
//! *generation* and legality checking belong to the caller. What the search
//! graph needs from the board layer is exactly what lives here:
//!
//! - a compact 16-bit [`Move`] with the rank-mirror transform used to store
//!   moves from the mover's point of view,
//! - a [`Position`] that can be parsed from FEN, advanced by an externally
//!   supplied move, and hashed for transposition keying,
//! - a [`PositionHistory`] that tracks the played line and repetition counts,
//! - the [`GameResult`] outcome lattice used for terminal bounds.

pub mod moves;
pub mod position;
pub mod zobrist;

pub use moves::{Move, MoveList, MoveParseError, Promotion, Square};
pub use position::{FenError, GameResult, Position, PositionHistory, STARTPOS_FEN};
