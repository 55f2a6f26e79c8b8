use thiserror::Error;

/// Narrow error for the one fallible operation `shared` itself exposes:
/// parsing a [`crate::Hash256`] from hex. The full ledger error taxonomy
/// lives in `ledger-core`, which wraps this variant via `From`.
#[derive(Error, Debug)]
pub enum HashFormatError {
    #[error("invalid hex hash: {0}")]
    InvalidHex(String),

    #[error("hash must be 32 bytes, got {0}")]
    WrongLength(usize),
}
