//! Error taxonomy shared between the daemon and the shell.
//!
//! Per-goal problems (unknown predicates, wrapper failures, bad modes) are
//! NOT represented here - those surface as `error/2` claims so derivations
//! stay introspectable. This type covers the synchronous failures: parsing,
//! wire decoding, configuration and I/O.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtbError {
    /// Malformed rule or goal text. Reported synchronously; nothing is
    /// admitted to the engine.
    #[error("parse error at offset {position}: {message}")]
    Parse { message: String, position: usize },

    /// A JSON payload that does not decode to a term, literal, substitution
    /// or claim.
    #[error("wire decode error: {0}")]
    Wire(String),

    /// Malformed wrapper signature string.
    #[error("bad signature: {0}")]
    Signature(String),

    /// Configuration file problems.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EtbError {
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        EtbError::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn wire(message: impl Into<String>) -> Self {
        EtbError::Wire(message.into())
    }
}
