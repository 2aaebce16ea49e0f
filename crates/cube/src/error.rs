//! Cube error types

use thiserror::Error;

/// Errors raised when a move or state does not fit the cube
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CubeError {
    #[error("Edge length must be between {min} and {max}, got {actual}")]
    InvalidEdgeLength { min: u8, max: u8, actual: u8 },

    #[error("Move turns {slices} slices but the cube only has {edge_length} layers")]
    InvalidSlices { slices: u8, edge_length: u8 },

    #[error("State is for a {actual}x{actual} cube, expected {expected}x{expected}")]
    EdgeLengthMismatch { expected: u8, actual: u8 },

    #[error("State has {actual} layer entries, expected {expected}")]
    MalformedState { expected: usize, actual: usize },

    #[error("Unknown face: {0}")]
    UnknownFace(String),

    #[error("Unsupported angle: {0} (use 1, 2, -1 or 3)")]
    UnsupportedAngle(i64),
}
