//! Error taxonomy for the message spool.
//!
//! Local recovery is attempted only for identity exhaustion and interval
//! overflow (see `repository.rs`); every other backend fault rolls back the
//! current transaction and surfaces here as [`SpoolError::Backend`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("capacity reached ({capacity} rows, priority {priority} does not bypass the cap)")]
    CapacityReached { capacity: u64, priority: i64 },

    #[error("identity sequence exhausted and reset retry also failed: {0}")]
    IdentityExhausted(String),

    #[error("backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("corruption detected and repair failed: {0}")]
    Corruption(String),

    #[error("message {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, SpoolError>;
