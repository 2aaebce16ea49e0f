//! Cubescript Cube
//!
//! The rotation model scripts drive. Host and worker each own a private
//! [`Cube`] and keep them in sync by exchanging [`StateChange`]s.

mod error;
mod types;

pub use error::*;
pub use types::*;

/// A cube holding its current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cube {
    state: CubeState,
}

impl Cube {
    pub const DEFAULT_EDGE_LENGTH: u8 = 3;

    /// Solved cube of the given size
    pub fn new(edge_length: u8) -> Result<Self, CubeError> {
        Ok(Self {
            state: CubeState::solved(edge_length)?,
        })
    }

    /// Cube starting from an existing snapshot
    pub fn from_state(state: CubeState) -> Result<Self, CubeError> {
        CubeState::solved(state.edge_length)?;
        state.validate()?;
        Ok(Self { state })
    }

    /// Current snapshot
    #[must_use]
    pub fn state(&self) -> &CubeState {
        &self.state
    }

    #[must_use]
    pub fn edge_length(&self) -> u8 {
        self.state.edge_length
    }

    /// Apply one move. The cube is left untouched if the move is invalid.
    pub fn apply(&mut self, mv: &CubeMove) -> Result<StateChange, CubeError> {
        let mut next = self.state.clone();
        next.rotate(mv)?;
        let old_state = std::mem::replace(&mut self.state, next);
        Ok(StateChange {
            old_state,
            new_state: self.state.clone(),
            mv: Some(*mv),
        })
    }

    /// Replace the whole state
    pub fn set_state(&mut self, state: CubeState) -> Result<StateChange, CubeError> {
        if state.edge_length != self.state.edge_length {
            return Err(CubeError::EdgeLengthMismatch {
                expected: self.state.edge_length,
                actual: state.edge_length,
            });
        }
        state.validate()?;
        let old_state = std::mem::replace(&mut self.state, state);
        Ok(StateChange {
            old_state,
            new_state: self.state.clone(),
            mv: None,
        })
    }

    /// Replace the state with the solved one
    pub fn reset(&mut self) -> Result<StateChange, CubeError> {
        let solved = CubeState::solved(self.state.edge_length)?;
        self.set_state(solved)
    }
}

impl Default for Cube {
    fn default() -> Self {
        Self {
            state: CubeState {
                edge_length: Self::DEFAULT_EDGE_LENGTH,
                layers: vec![0; Face::ALL.len() * Self::DEFAULT_EDGE_LENGTH as usize],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turns_wrap_around() {
        let mut cube = Cube::default();
        for _ in 0..4 {
            cube.apply(&CubeMove::quarter(Face::Front)).unwrap();
        }
        assert!(cube.state().is_solved());
    }

    #[test]
    fn wide_move_turns_inner_layers() {
        let mut cube = Cube::default();
        let change = cube
            .apply(&CubeMove::new(Face::Right, 2, CubeAngle::Ccw90))
            .unwrap();

        assert!(change.old_state.is_solved());
        assert_eq!(change.new_state.layer(Face::Right, 0), Some(3));
        assert_eq!(change.new_state.layer(Face::Right, 1), Some(3));
        assert_eq!(change.new_state.layer(Face::Right, 2), Some(0));
        assert_eq!(change.mv, Some(CubeMove::new(Face::Right, 2, CubeAngle::Ccw90)));
    }

    #[test]
    fn invalid_slices_leave_state_untouched() {
        let mut cube = Cube::default();
        let err = cube
            .apply(&CubeMove::new(Face::Up, 4, CubeAngle::Cw90))
            .unwrap_err();
        assert_eq!(
            err,
            CubeError::InvalidSlices {
                slices: 4,
                edge_length: 3
            }
        );
        assert!(cube.state().is_solved());
    }

    #[test]
    fn replaying_a_change_reproduces_the_new_state() {
        let mut worker = Cube::default();
        let mut host = Cube::default();
        let moves = [
            CubeMove::quarter(Face::Up),
            CubeMove::new(Face::Left, 3, CubeAngle::Cw180),
            CubeMove::new(Face::Down, 1, CubeAngle::Ccw90),
        ];
        for mv in &moves {
            let change = worker.apply(mv).unwrap();
            let replayed = host.apply(&change.mv.unwrap()).unwrap();
            assert_eq!(replayed.new_state, change.new_state);
        }
        assert_eq!(host, worker);
    }

    #[test]
    fn set_state_rejects_other_sizes() {
        let mut cube = Cube::default();
        let other = CubeState::solved(2).unwrap();
        assert!(matches!(
            cube.set_state(other),
            Err(CubeError::EdgeLengthMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn reset_is_a_full_replacement() {
        let mut cube = Cube::default();
        cube.apply(&CubeMove::quarter(Face::Back)).unwrap();
        let change = cube.reset().unwrap();
        assert!(change.mv.is_none());
        assert!(change.new_state.is_solved());
        assert!(!change.old_state.is_solved());
    }

    #[test]
    fn parse_faces_and_angles() {
        assert_eq!(Face::parse("F").unwrap(), Face::Front);
        assert_eq!(Face::parse("down").unwrap(), Face::Down);
        assert!(Face::parse("x").is_err());
        assert_eq!(CubeAngle::from_turns(-1).unwrap(), CubeAngle::Ccw90);
        assert_eq!(CubeAngle::from_turns(3).unwrap(), CubeAngle::Ccw90);
        assert!(matches!(
            CubeAngle::from_turns(5),
            Err(CubeError::UnsupportedAngle(5))
        ));
    }

    #[test]
    fn move_notation() {
        assert_eq!(CubeMove::quarter(Face::Right).to_string(), "R");
        assert_eq!(
            CubeMove::new(Face::Up, 2, CubeAngle::Ccw90).to_string(),
            "2Uw'"
        );
        assert_eq!(
            CubeMove::new(Face::Front, 1, CubeAngle::Cw180).to_string(),
            "F2"
        );
    }

    #[test]
    fn state_change_serialization() {
        let mut cube = Cube::default();
        let change = cube.apply(&CubeMove::quarter(Face::Front)).unwrap();
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"move\""));
        assert!(json.contains("cw90"));

        let change = cube.reset().unwrap();
        let json = serde_json::to_string(&change).unwrap();
        assert!(!json.contains("\"move\""));
    }
}
