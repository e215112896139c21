use std::fmt;

/// Framing-level failures (spec taxonomy: `malformed_frame`). Parsing of a
/// message *body* is deliberately lenient — only framing violations are
/// fatal for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    BadHeader,
    BadTrailer,
    LengthOverflow { declared: usize, max: usize },
    CrcMismatch { expected: u16, actual: u16 },
    TooShort,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BadHeader => write!(f, "malformed_frame: unrecognized header bytes"),
            FrameError::BadTrailer => write!(f, "malformed_frame: missing 0D 0A trailer"),
            FrameError::LengthOverflow { declared, max } => write!(
                f,
                "malformed_frame: declared length {declared} exceeds max frame size {max}"
            ),
            FrameError::CrcMismatch { expected, actual } => write!(
                f,
                "malformed_frame: crc mismatch, expected {expected:#06x}, computed {actual:#06x}"
            ),
            FrameError::TooShort => write!(f, "malformed_frame: frame shorter than its header implies"),
        }
    }
}

impl std::error::Error for FrameError {}
