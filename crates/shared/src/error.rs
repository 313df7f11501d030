//! Error types shared across Inkline crates

use thiserror::Error;

/// Failure to parse a stored enum column back into its Rust type.
#[derive(Debug, Error)]
#[error("unrecognized {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
