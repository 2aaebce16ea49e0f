//! State, move and change types shared by host and worker

use serde::{Deserialize, Serialize};

use crate::CubeError;

/// One of the six cube faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Face {
    Front,
    Back,
    Left,
    Right,
    Up,
    Down,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::Front,
        Face::Back,
        Face::Left,
        Face::Right,
        Face::Up,
        Face::Down,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Up => 4,
            Self::Down => 5,
        }
    }

    /// Single-letter notation (`F`, `B`, `L`, `R`, `U`, `D`)
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Front => 'F',
            Self::Back => 'B',
            Self::Left => 'L',
            Self::Right => 'R',
            Self::Up => 'U',
            Self::Down => 'D',
        }
    }

    /// Parse a face from its letter or its full name, case-insensitive
    pub fn parse(s: &str) -> Result<Self, CubeError> {
        match s.to_lowercase().as_str() {
            "f" | "front" => Ok(Self::Front),
            "b" | "back" => Ok(Self::Back),
            "l" | "left" => Ok(Self::Left),
            "r" | "right" => Ok(Self::Right),
            "u" | "up" => Ok(Self::Up),
            "d" | "down" => Ok(Self::Down),
            _ => Err(CubeError::UnknownFace(s.to_string())),
        }
    }
}

/// Rotation angle of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CubeAngle {
    /// Quarter turn clockwise
    Cw90,
    /// Half turn
    Cw180,
    /// Quarter turn counter-clockwise
    Ccw90,
}

impl CubeAngle {
    /// Clockwise quarter turns this angle amounts to (1..=3)
    #[must_use]
    pub const fn quarter_turns(self) -> u8 {
        match self {
            Self::Cw90 => 1,
            Self::Cw180 => 2,
            Self::Ccw90 => 3,
        }
    }

    /// Map script-level angle numbers to an angle
    pub fn from_turns(turns: i64) -> Result<Self, CubeError> {
        match turns {
            1 => Ok(Self::Cw90),
            2 | -2 => Ok(Self::Cw180),
            -1 | 3 => Ok(Self::Ccw90),
            other => Err(CubeError::UnsupportedAngle(other)),
        }
    }
}

/// A single discrete move: turn the `slices` outermost layers of `face`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeMove {
    pub face: Face,
    pub slices: u8,
    pub angle: CubeAngle,
}

impl CubeMove {
    #[must_use]
    pub const fn new(face: Face, slices: u8, angle: CubeAngle) -> Self {
        Self { face, slices, angle }
    }

    /// Outer layer quarter turn clockwise
    #[must_use]
    pub const fn quarter(face: Face) -> Self {
        Self::new(face, 1, CubeAngle::Cw90)
    }
}

impl std::fmt::Display for CubeMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.slices > 1 {
            write!(f, "{}", self.slices)?;
        }
        write!(f, "{}", self.face.letter())?;
        if self.slices > 1 {
            write!(f, "w")?;
        }
        match self.angle {
            CubeAngle::Cw90 => Ok(()),
            CubeAngle::Cw180 => write!(f, "2"),
            CubeAngle::Ccw90 => write!(f, "'"),
        }
    }
}

/// Snapshot of a cube
///
/// Holds one quarter-turn counter (mod 4) per face and layer depth, face-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CubeState {
    pub edge_length: u8,
    pub layers: Vec<u8>,
}

impl CubeState {
    pub const MIN_EDGE_LENGTH: u8 = 1;
    pub const MAX_EDGE_LENGTH: u8 = 32;

    /// Solved state for a cube of the given size
    pub fn solved(edge_length: u8) -> Result<Self, CubeError> {
        if !(Self::MIN_EDGE_LENGTH..=Self::MAX_EDGE_LENGTH).contains(&edge_length) {
            return Err(CubeError::InvalidEdgeLength {
                min: Self::MIN_EDGE_LENGTH,
                max: Self::MAX_EDGE_LENGTH,
                actual: edge_length,
            });
        }
        Ok(Self {
            edge_length,
            layers: vec![0; Face::ALL.len() * edge_length as usize],
        })
    }

    #[must_use]
    pub fn is_solved(&self) -> bool {
        self.layers.iter().all(|turns| *turns == 0)
    }

    /// Quarter turns currently applied to a layer, `None` if out of range
    #[must_use]
    pub fn layer(&self, face: Face, depth: u8) -> Option<u8> {
        if depth >= self.edge_length {
            return None;
        }
        self.layers
            .get(face.index() * self.edge_length as usize + depth as usize)
            .copied()
    }

    pub(crate) fn validate(&self) -> Result<(), CubeError> {
        let expected = Face::ALL.len() * self.edge_length as usize;
        if self.layers.len() != expected {
            return Err(CubeError::MalformedState {
                expected,
                actual: self.layers.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn rotate(&mut self, mv: &CubeMove) -> Result<(), CubeError> {
        if mv.slices == 0 || mv.slices > self.edge_length {
            return Err(CubeError::InvalidSlices {
                slices: mv.slices,
                edge_length: self.edge_length,
            });
        }
        let base = mv.face.index() * self.edge_length as usize;
        for layer in &mut self.layers[base..base + mv.slices as usize] {
            *layer = (*layer + mv.angle.quarter_turns()) % 4;
        }
        Ok(())
    }
}

/// One state transition: `mv` is `None` for a full-state replacement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub old_state: CubeState,
    pub new_state: CubeState,
    #[serde(rename = "move", skip_serializing_if = "Option::is_none", default)]
    pub mv: Option<CubeMove>,
}
