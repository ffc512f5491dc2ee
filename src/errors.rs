//! Error types for the wagering core.
//!
//! Admission and cancellation failures are user-recoverable and returned
//! synchronously. Settlement races are not errors at all: the loser of a
//! claim race receives the recorded result. Storage failures abort the
//! whole commit and propagate for retry.

use thiserror::Error;

/// Failures of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("corrupted record: {0}")]
    Corrupt(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Write(e.to_string())
    }
}

/// Failures loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Everything the engine can return to a caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },

    #[error("stake {stake} below minimum {min}")]
    BelowMinimumStake { stake: u64, min: u64 },

    #[error("stake {stake} above maximum {max}")]
    AboveMaximumStake { stake: u64, max: u64 },

    #[error("amount {amount} exceeds the ledger's signed range")]
    AmountOutOfRange { amount: u64 },

    #[error("betting window is closed")]
    WindowClosed,

    #[error("round is still open for admission")]
    RoundStillOpen,

    #[error("account already holds an active wager on this target")]
    DuplicateWager,

    #[error("already settled")]
    AlreadySettled,

    #[error("unknown target: {0}")]
    InvalidTarget(String),

    #[error("invalid pick: {0}")]
    InvalidPick(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type StoreResult<T> = Result<T, StoreError>;
