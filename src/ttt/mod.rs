use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::game::{Game, GameColor, GameStatus, IllegalMove, Move, Position};

pub const BOARD_SIZE: usize = 3;
const FULL_BOARD: u16 = (1u16 << (BOARD_SIZE * BOARD_SIZE)) - 1;
const WINNING_SEQUENCES: [u16; 8] = [
    0b111000000, // row 1
    0b000111000, // row 2
    0b000000111, // row 3
    0b100100100, // col 1
    0b010010010, // col 2
    0b001001001, // col 3
    0b100010001, // diagonal 1
    0b001010100, // diagonal 2
];

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TttMove {
    idx: u8,
}

impl TttMove {
    pub fn new(r: usize, c: usize) -> Self {
        TttMove::from_idx(r * BOARD_SIZE + c)
    }

    pub fn from_idx(idx: usize) -> Self {
        assert!(idx < BOARD_SIZE * BOARD_SIZE);
        Self { idx: idx as u8 }
    }

    pub fn to_idx(&self) -> usize {
        self.idx as usize
    }

    pub fn row(&self) -> usize {
        self.idx as usize / BOARD_SIZE
    }

    pub fn column(&self) -> usize {
        self.idx as usize % BOARD_SIZE
    }
}

impl Move for TttMove {
    type Game = TttGame;

    fn to_nn_idx(&self) -> usize {
        self.idx as usize
    }
}

impl Display for TttMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row(), self.column())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TttBitboard {
    bitmap: u16,
}

impl TttBitboard {
    pub fn get_raw(&self) -> u16 {
        self.bitmap
    }

    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < BOARD_SIZE * BOARD_SIZE);
        (self.bitmap & (1u16 << idx)) != 0
    }

    pub fn set(&mut self, idx: usize, val: bool) {
        assert!(idx < BOARD_SIZE * BOARD_SIZE);
        if val {
            self.bitmap |= 1u16 << idx;
        } else {
            self.bitmap &= !(1u16 << idx);
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct TttPosition {
    pub board_x: TttBitboard,
    pub board_o: TttBitboard,
    pub turn: GameColor,
    pub winner: Option<GameColor>,
}

impl TttPosition {
    pub fn get_tile(&self, r: usize, c: usize) -> Option<GameColor> {
        assert!(r < BOARD_SIZE && c < BOARD_SIZE);
        let idx = r * BOARD_SIZE + c;
        if self.board_x.get(idx) {
            return Some(GameColor::Player1);
        }
        if self.board_o.get(idx) {
            return Some(GameColor::Player2);
        }
        None
    }

    pub fn is_valid_move(&self, m: TttMove) -> bool {
        if self.status().is_finished() {
            return false;
        }
        let idx = m.to_idx();
        !self.board_x.get(idx) && !self.board_o.get(idx)
    }

    fn make_move(&mut self, m: TttMove) {
        match self.turn {
            GameColor::Player1 => &mut self.board_x,
            GameColor::Player2 => &mut self.board_o,
        }
        .set(m.to_idx(), true);

        self.turn = self.turn.opposite();
        self.check_winner();
    }

    pub fn check_winner(&mut self) {
        self.winner = None;
        for seq in WINNING_SEQUENCES {
            if (self.board_x.get_raw() & seq) == seq {
                self.winner = Some(GameColor::Player1);
                return;
            }
            if (self.board_o.get_raw() & seq) == seq {
                self.winner = Some(GameColor::Player2);
                return;
            }
        }
    }

    /// Number of lines still winnable by `color`.
    fn open_lines(&self, color: GameColor) -> usize {
        let opponent = match color {
            GameColor::Player1 => self.board_o,
            GameColor::Player2 => self.board_x,
        };
        WINNING_SEQUENCES
            .iter()
            .filter(|seq| opponent.get_raw() & **seq == 0)
            .count()
    }
}

impl Position for TttPosition {
    type Game = TttGame;

    fn new() -> Self {
        TttPosition {
            board_x: TttBitboard::default(),
            board_o: TttBitboard::default(),
            turn: GameColor::Player1,
            winner: None,
        }
    }

    fn turn(&self) -> GameColor {
        self.turn
    }

    fn legal_moves(&self) -> Vec<TttMove> {
        if self.status().is_finished() {
            return Vec::new();
        }
        (0..BOARD_SIZE * BOARD_SIZE)
            .map(TttMove::from_idx)
            .filter(|m| self.is_valid_move(*m))
            .collect()
    }

    fn status(&self) -> GameStatus {
        if let Some(winner) = self.winner {
            return GameStatus::Finished(Some(winner));
        }
        if (self.board_x.get_raw() | self.board_o.get_raw()) == FULL_BOARD {
            return GameStatus::Finished(None);
        }
        GameStatus::Ongoing
    }
}

pub struct TttGame {
    pos_history: Vec<TttPosition>,
    adjudicated: Option<Option<GameColor>>,
}

impl TttGame {
    pub fn pos_history(&self) -> &[TttPosition] {
        &self.pos_history
    }
}

impl Game for TttGame {
    type Position = TttPosition;
    type Move = TttMove;
    const MOVES_NUM: usize = BOARD_SIZE * BOARD_SIZE;

    fn new() -> Self {
        Self {
            pos_history: vec![TttPosition::new()],
            adjudicated: None,
        }
    }

    fn position(&self) -> &TttPosition {
        self.pos_history.last().unwrap()
    }

    fn ply_count(&self) -> usize {
        self.pos_history.len() - 1
    }

    fn status(&self) -> GameStatus {
        match self.adjudicated {
            Some(winner) => GameStatus::Finished(winner),
            None => self.position().status(),
        }
    }

    fn try_play(&mut self, m: TttMove) -> Result<(), IllegalMove> {
        if self.adjudicated.is_some() || !self.position().is_valid_move(m) {
            return Err(IllegalMove(m.to_string()));
        }
        let mut pos = *self.position();
        pos.make_move(m);
        self.pos_history.push(pos);
        Ok(())
    }

    /// The side with strictly more winnable lines left is awarded the game, otherwise a draw.
    fn adjudicate(&mut self) {
        if self.adjudicated.is_some() {
            return;
        }
        let pos = self.position();
        let winner = match pos.status() {
            GameStatus::Finished(winner) => winner,
            GameStatus::Ongoing => {
                let x_lines = pos.open_lines(GameColor::Player1);
                let o_lines = pos.open_lines(GameColor::Player2);
                match x_lines.cmp(&o_lines) {
                    std::cmp::Ordering::Greater => Some(GameColor::Player1),
                    std::cmp::Ordering::Less => Some(GameColor::Player2),
                    std::cmp::Ordering::Equal => None,
                }
            }
        };
        self.adjudicated = Some(winner);
    }

    fn is_adjudicated(&self) -> bool {
        self.adjudicated.is_some()
    }
}

#[cfg(test)]
pub(crate) fn ttt_position_from_str(s: &str) -> TttPosition {
    use std::cmp::Ordering;

    assert_eq!(
        s.chars().count(),
        BOARD_SIZE * BOARD_SIZE + 1,
        "unexpected string length"
    );
    let mut pos = TttPosition::new();
    for (idx, c) in s.chars().enumerate() {
        match idx.cmp(&(BOARD_SIZE * BOARD_SIZE)) {
            Ordering::Less => match c {
                'x' => pos.board_x.set(idx, true),
                'o' => pos.board_o.set(idx, true),
                '_' => {}
                _ => panic!("unknown board char: {:?}", c),
            },
            Ordering::Equal => {
                pos.turn = match c {
                    'x' => GameColor::Player1,
                    'o' => GameColor::Player2,
                    _ => panic!("unknown turn char: {:?}", c),
                }
            }
            Ordering::Greater => panic!("too many turn chars: {:?}", c),
        }
    }
    pos.check_winner();
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_game_and_mate() {
        let to_pos = ttt_position_from_str;
        assert_eq!(
            to_pos("xxxoo____o").status(),
            GameStatus::Finished(Some(GameColor::Player1))
        );
        assert_eq!(
            to_pos("oo____xxxo").status(),
            GameStatus::Finished(Some(GameColor::Player1))
        );
        assert_eq!(
            to_pos("oxxo__ox_x").status(),
            GameStatus::Finished(Some(GameColor::Player2))
        );
        assert_eq!(
            to_pos("xxo__o_xox").status(),
            GameStatus::Finished(Some(GameColor::Player2))
        );
        assert_eq!(to_pos("xxoooxxxoo").status(), GameStatus::Finished(None));
        assert_eq!(to_pos("xo_______x").status(), GameStatus::Ongoing);
    }

    #[test]
    fn play_until_win() {
        let mut game = TttGame::new();
        for idx in [0, 3, 1, 4, 2] {
            assert!(!game.is_over());
            game.try_play(TttMove::from_idx(idx)).unwrap();
        }
        assert_eq!(game.ply_count(), 5);
        assert_eq!(game.winner(), Some(GameColor::Player1));
        assert!(!game.is_adjudicated());
        assert!(game.position().legal_moves().is_empty());
    }

    #[test]
    fn illegal_move_leaves_game_untouched() {
        let mut game = TttGame::new();
        game.try_play(TttMove::new(1, 1)).unwrap();
        let before = *game.position();

        let err = game.try_play(TttMove::new(1, 1)).unwrap_err();
        assert_eq!(err.to_string(), "illegal move (1, 1)");
        assert_eq!(*game.position(), before);
        assert_eq!(game.ply_count(), 1);
        assert_eq!(game.position().turn(), GameColor::Player2);
    }

    #[test]
    fn adjudication() {
        /* Empty board, both sides have all 8 lines */
        let mut game = TttGame::new();
        game.adjudicate();
        assert!(game.is_adjudicated());
        assert_eq!(game.status(), GameStatus::Finished(None));
        assert!(game.try_play(TttMove::new(0, 0)).is_err());

        /* X in the center blocks 4 of O's lines */
        let mut game = TttGame::new();
        game.try_play(TttMove::new(1, 1)).unwrap();
        game.adjudicate();
        assert_eq!(game.winner(), Some(GameColor::Player1));
    }

    #[test]
    fn legal_moves_are_empty_squares() {
        let pos = ttt_position_from_str("xo_x_o___x");
        let moves = pos.legal_moves();
        assert_eq!(moves.len(), 5);
        assert!(moves.iter().all(|m| pos.get_tile(m.row(), m.column()).is_none()));
    }
}
