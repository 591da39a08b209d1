//! Positions, FEN parsing and the played-line history.
//!
//! `Position` keeps just enough board state to apply externally supplied
//! moves and produce a transposition-quality hash: a mailbox of pieces plus
//! side to move, castling rights, en-passant file and the half-move clocks.
//! It never generates or validates moves; the caller owns legality.

use std::fmt;

use thiserror::Error;

use crate::moves::{Move, Promotion, Square};
use crate::zobrist::ZOBRIST;

/// FEN for the standard starting position.
pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Error parsing a FEN string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FenError {
    #[error("FEN is missing the {0} field")]
    MissingField(&'static str),

    #[error("bad piece placement: {0}")]
    BadPlacement(String),

    #[error("bad side to move: {0:?}")]
    BadSideToMove(String),

    #[error("bad en passant square: {0:?}")]
    BadEnPassant(String),

    #[error("bad clock value: {0:?}")]
    BadClock(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

impl Color {
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    #[inline]
    fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl Piece {
    #[inline]
    fn index(self) -> usize {
        self as usize
    }

    fn from_fen_char(c: char) -> Option<(Color, Piece)> {
        let piece = match c.to_ascii_lowercase() {
            'p' => Piece::Pawn,
            'n' => Piece::Knight,
            'b' => Piece::Bishop,
            'r' => Piece::Rook,
            'q' => Piece::Queen,
            'k' => Piece::King,
            _ => return None,
        };
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some((color, piece))
    }
}

/// Game outcome from white's point of view. The derived ordering
/// (`BlackWon < Draw < WhiteWon`) is the lattice used by outcome bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GameResult {
    BlackWon,
    Draw,
    WhiteWon,
}

impl GameResult {
    /// The same outcome seen from the other side.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            GameResult::BlackWon => GameResult::WhiteWon,
            GameResult::Draw => GameResult::Draw,
            GameResult::WhiteWon => GameResult::BlackWon,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameResult::BlackWon => write!(f, "0-1"),
            GameResult::Draw => write!(f, "1/2-1/2"),
            GameResult::WhiteWon => write!(f, "1-0"),
        }
    }
}

type Cell = Option<(Color, Piece)>;

// Castling-rights bits.
const WHITE_OO: u8 = 1;
const WHITE_OOO: u8 = 2;
const BLACK_OO: u8 = 4;
const BLACK_OOO: u8 = 8;

/// One board position.
#[derive(Clone)]
pub struct Position {
    board: [Cell; 64],
    black_to_move: bool,
    castling: u8,
    ep_file: Option<u8>,
    rule50: u8,
    ply: u16,
    repetitions: u8,
    hash: u64,
}

impl Position {
    /// Parse a FEN string. The clock fields are optional and default to
    /// `0 1` when absent.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let mut fields = fen.split_whitespace();
        let placement = fields.next().ok_or(FenError::MissingField("placement"))?;
        let side = fields.next().ok_or(FenError::MissingField("side to move"))?;
        let castling = fields.next().unwrap_or("-");
        let ep = fields.next().unwrap_or("-");
        let halfmove = fields.next().unwrap_or("0");
        let fullmove = fields.next().unwrap_or("1");

        let mut board: [Cell; 64] = [None; 64];
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::BadPlacement(placement.to_string()));
        }
        for (i, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - i as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as u8;
                } else {
                    let piece = Piece::from_fen_char(c)
                        .ok_or_else(|| FenError::BadPlacement(rank_str.to_string()))?;
                    if file >= 8 {
                        return Err(FenError::BadPlacement(rank_str.to_string()));
                    }
                    board[Square::new(file, rank).index()] = Some(piece);
                    file += 1;
                }
            }
            if file != 8 {
                return Err(FenError::BadPlacement(rank_str.to_string()));
            }
        }

        let black_to_move = match side {
            "w" => false,
            "b" => true,
            _ => return Err(FenError::BadSideToMove(side.to_string())),
        };

        let mut rights = 0u8;
        if castling != "-" {
            for c in castling.chars() {
                rights |= match c {
                    'K' => WHITE_OO,
                    'Q' => WHITE_OOO,
                    'k' => BLACK_OO,
                    'q' => BLACK_OOO,
                    _ => 0,
                };
            }
        }

        let ep_file = if ep == "-" {
            None
        } else {
            let c = ep
                .chars()
                .next()
                .filter(|c| ('a'..='h').contains(c))
                .ok_or_else(|| FenError::BadEnPassant(ep.to_string()))?;
            Some(c as u8 - b'a')
        };

        let rule50: u8 = halfmove
            .parse()
            .map_err(|_| FenError::BadClock(halfmove.to_string()))?;
        let fullmove: u16 = fullmove
            .parse()
            .map_err(|_| FenError::BadClock(fullmove.to_string()))?;
        let ply = (fullmove.max(1) - 1) * 2 + u16::from(black_to_move);

        let mut position = Position {
            board,
            black_to_move,
            castling: rights,
            ep_file,
            rule50,
            ply,
            repetitions: 0,
            hash: 0,
        };
        position.hash = position.compute_hash();
        Ok(position)
    }

    /// Apply `mv` structurally and return the successor position. The move
    /// is taken at face value; passing an illegal move is a programming
    /// error on the caller's side.
    pub fn play(&self, mv: Move) -> Position {
        let from = mv.from();
        let to = mv.to();
        let (color, piece) = self.board[from.index()]
            .expect("move applied from an empty square");
        assert_eq!(
            color,
            if self.black_to_move { Color::Black } else { Color::White },
            "move applied for the side not on the move"
        );

        let mut next = self.clone();
        next.ep_file = None;
        next.rule50 = self.rule50.saturating_add(1);
        next.ply += 1;
        next.repetitions = 0;

        let capture = next.board[to.index()].is_some();
        if capture || piece == Piece::Pawn {
            next.rule50 = 0;
        }

        match piece {
            Piece::Pawn => {
                // Double push opens an en-passant file.
                if from.rank().abs_diff(to.rank()) == 2 {
                    next.ep_file = Some(from.file());
                }
                // Diagonal move to an empty square is an en-passant capture.
                if from.file() != to.file() && !capture {
                    next.board[Square::new(to.file(), from.rank()).index()] = None;
                }
            }
            Piece::King => {
                next.castling &= match color {
                    Color::White => !(WHITE_OO | WHITE_OOO),
                    Color::Black => !(BLACK_OO | BLACK_OOO),
                };
                // Castling is encoded as the two-file king hop; the rook
                // follows.
                if from.file().abs_diff(to.file()) == 2 {
                    let rank = from.rank();
                    let (rook_from, rook_to) = if to.file() == 6 {
                        (Square::new(7, rank), Square::new(5, rank))
                    } else {
                        (Square::new(0, rank), Square::new(3, rank))
                    };
                    let rook = next.board[rook_from.index()].take();
                    next.board[rook_to.index()] = rook;
                }
            }
            _ => {}
        }

        // Moving a rook off its corner, or capturing one on it, kills the
        // matching right.
        for sq in [from, to] {
            next.castling &= match sq.index() {
                0 => !WHITE_OOO,
                7 => !WHITE_OO,
                56 => !BLACK_OOO,
                63 => !BLACK_OO,
                _ => u8::MAX,
            };
        }

        let placed = match mv.promotion() {
            Promotion::None => piece,
            Promotion::Queen => Piece::Queen,
            Promotion::Rook => Piece::Rook,
            Promotion::Bishop => Piece::Bishop,
            Promotion::Knight => Piece::Knight,
        };
        next.board[from.index()] = None;
        next.board[to.index()] = Some((color, placed));

        next.black_to_move = !self.black_to_move;
        next.hash = next.compute_hash();
        next
    }

    fn compute_hash(&self) -> u64 {
        let z = &*ZOBRIST;
        let mut hash = 0u64;
        for (sq, cell) in self.board.iter().enumerate() {
            if let Some((color, piece)) = cell {
                hash ^= z.pieces[color.index()][piece.index()][sq];
            }
        }
        if self.black_to_move {
            hash ^= z.black_to_move;
        }
        hash ^= z.castling[self.castling as usize];
        if let Some(file) = self.ep_file {
            hash ^= z.ep_file[file as usize];
        }
        hash
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn is_black_to_move(&self) -> bool {
        self.black_to_move
    }

    #[inline]
    pub fn get_game_ply(&self) -> u16 {
        self.ply
    }

    #[inline]
    pub fn get_rule50_ply(&self) -> u8 {
        self.rule50
    }

    /// How many earlier positions in the line had the same hash.
    #[inline]
    pub fn get_repetitions(&self) -> u8 {
        self.repetitions
    }

    pub fn piece_at(&self, sq: Square) -> Option<(Color, Piece)> {
        self.board[sq.index()]
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("hash", &format_args!("{:#018x}", self.hash))
            .field("black_to_move", &self.black_to_move)
            .field("ply", &self.ply)
            .field("rule50", &self.rule50)
            .field("repetitions", &self.repetitions)
            .finish()
    }
}

/// The line of positions from the game start to the current head.
#[derive(Debug, Clone, Default)]
pub struct PositionHistory {
    positions: Vec<Position>,
}

impl PositionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Throw away the line and start over from `start`.
    pub fn reset(&mut self, start: Position) {
        self.positions.clear();
        self.positions.push(start);
    }

    /// Extend the line by one move, updating the repetition count of the
    /// new tail. Repetitions are only sought within the half-move-clock
    /// window, where they are at all possible.
    pub fn append(&mut self, mv: Move) {
        let mut next = self.last().play(mv);
        let window = next.get_rule50_ply() as usize;
        next.repetitions = self
            .positions
            .iter()
            .rev()
            .take(window)
            .filter(|p| p.hash() == next.hash())
            .count() as u8;
        self.positions.push(next);
    }

    pub fn pop(&mut self) {
        assert!(self.positions.len() > 1, "cannot pop the starting position");
        self.positions.pop();
    }

    pub fn starting(&self) -> &Position {
        self.positions.first().expect("history is empty")
    }

    pub fn last(&self) -> &Position {
        self.positions.last().expect("history is empty")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }
}
