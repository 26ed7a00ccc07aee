//! # Error Types
//!
//! Errors raised by the persistence port and the identity helpers.

use thiserror::Error;

/// Key-value store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },

    /// Stored bytes could not be decoded.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },

    /// Value could not be encoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A guarded write found a key with a different value than expected.
    #[error("Condition failed on key {key}")]
    ConditionFailed { key: String },

    /// An identifier cannot be used as a key component.
    #[error("Invalid key component {id:?}: {reason}")]
    InvalidKey { id: String, reason: String },

    /// The store lock was poisoned or the backing handle is gone.
    #[error("KV store unavailable: {message}")]
    Unavailable { message: String },
}

impl KVStoreError {
    /// Only guarded-write conflicts are expected in normal operation.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, KVStoreError::ConditionFailed { .. })
    }
}

/// Key material and signature errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Key bytes were not valid hex of the right length.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Public key in the keys file does not match the secret key.
    #[error("Public key does not match secret key")]
    KeyMismatch,

    /// Signature bytes malformed.
    #[error("Malformed signature")]
    MalformedSignature,

    /// Signature did not verify.
    #[error("Signature verification failed")]
    BadSignature,
}
