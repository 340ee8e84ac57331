//! Error types for reflector frame parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing a datagram
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Datagram was empty
    #[error("empty datagram")]
    Empty,

    /// Frame length does not match what its tag requires
    #[error("invalid length for {frame}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Unknown or unsupported frame tag
    #[error("unknown frame: {0}")]
    UnknownFrame(String),

    /// Frame is only ever sent by a reflector
    #[error("unexpected frame from client: {0}")]
    UnexpectedFrame(&'static str),

    /// Callsign field is empty or not printable ASCII
    #[error("invalid callsign: {0}")]
    InvalidCallsign(String),

    /// Frame addresses a talk group this reflector does not serve
    #[error("foreign talk group: expected {expected}, got {actual}")]
    ForeignTalkGroup { expected: u16, actual: u16 },

    /// Frame addresses a module this reflector does not serve
    #[error("foreign module: expected {expected}, got {actual}")]
    ForeignModule { expected: char, actual: char },

    /// Checksum does not match the frame contents
    #[error("bad checksum in {frame}: expected {expected:04X}, got {actual:04X}")]
    BadChecksum {
        frame: &'static str,
        expected: u16,
        actual: u16,
    },
}
