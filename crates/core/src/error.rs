//! Error type for host-facing operations.
//!
//! Nothing the emulated chip does at run time is an error to the host: a
//! failed bind or connect only leaves the socket in its previous state. The
//! variants here cover save states and model selection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChipError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("invalid save state file (bad magic)")]
    BadMagic,

    #[error("save state file too small")]
    Truncated,

    #[error("unsupported save state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("chip model mismatch: save={saved} current={current}")]
    ModelMismatch { saved: String, current: String },

    #[error("unknown chip model {0:?} (expected 5100 or 5500)")]
    UnknownModel(String),
}

pub type Result<T> = std::result::Result<T, ChipError>;
