// Error taxonomy for the decode and filter stages.

use thiserror::Error;

/// A frame could not be decoded because the captured bytes end before the
/// header of the named layer does.
///
/// This is the only decode failure: unrecognized-but-structurally-valid
/// layer types terminate the decode chain with a partial result instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("truncated frame at {layer} layer: need {needed} bytes, captured {captured}")]
pub struct DecodeError {
    /// Layer at which the length violation occurred ("link", "network", "transport").
    pub layer: &'static str,
    /// Total bytes the layer needed from the start of the frame.
    pub needed: usize,
    /// Bytes actually captured.
    pub captured: usize,
}

impl DecodeError {
    pub fn truncated(layer: &'static str, needed: usize, captured: usize) -> Self {
        Self {
            layer,
            needed,
            captured,
        }
    }
}

/// Errors raised while compiling a filter expression.
///
/// Both variants are session-startup errors: a filter either compiles before
/// the pipeline starts or the session does not start at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("syntax error at byte {pos}: {detail}")]
    Syntax { pos: usize, detail: String },

    #[error("unknown field `{0}` in filter expression")]
    UnknownField(String),
}

impl FilterError {
    pub fn syntax(pos: usize, detail: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            detail: detail.into(),
        }
    }
}
