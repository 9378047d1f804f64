//! Error types and wire status codes for the key-custody service

use crate::provider::{Handle, ObjectId};
use thiserror::Error;

/// Status code reported to the caller on success.
pub const STATUS_SUCCESS: u32 = 0;

/// Errors surfaced to the untrusted caller.
///
/// Every variant maps to a stable non-zero status code via [`CustodyError::status`];
/// the caller never sees more than that code plus any populated output slots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CustodyError {
    /// The declared parameter-type vector does not match the shape the
    /// command expects. Raised before any side effect.
    #[error("declared parameter types do not match the expected shape")]
    InvalidParameters,

    /// The command identifier is not one of the recognized commands.
    #[error("unsupported command identifier {0:#x}")]
    UnsupportedCommand(u32),

    /// No persistent object could be opened under the given id.
    #[error("no persistent object under id {0}")]
    ObjectNotFound(ObjectId),

    /// The caller's output buffer cannot hold the actual result.
    #[error("output buffer too small: {required} bytes required, {capacity} available")]
    BufferTooSmall { required: usize, capacity: usize },

    /// A provider call failed; the provider's own code is preserved.
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),
}

impl CustodyError {
    /// Numeric status code for the invocation result.
    pub fn status(&self) -> u32 {
        match self {
            CustodyError::InvalidParameters => 0xFFFF_0006,
            CustodyError::UnsupportedCommand(_) => 0xFFFF_000A,
            CustodyError::ObjectNotFound(_) => 0xFFFF_0008,
            CustodyError::BufferTooSmall { .. } => 0xFFFF_0010,
            CustodyError::Provider(e) => e.code(),
        }
    }
}

/// Errors reported by a [`Provider`](crate::provider::Provider) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No persistent object exists under the requested id.
    #[error("object not found in persistent storage")]
    NotFound,

    /// The destination buffer is smaller than the result.
    #[error("output buffer too small, {required} bytes required")]
    ShortBuffer { required: usize },

    /// The handle does not reference a live object or operation.
    #[error("handle {0:#x} does not reference a live object")]
    BadHandle(Handle),

    /// The referenced object or operation is not in a usable state.
    #[error("object is not in a usable state: {0}")]
    BadState(&'static str),

    /// A cryptographic primitive failed.
    #[error("crypto operation failed: {0}")]
    CryptoFailed(String),

    /// Persistent storage failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ProviderError {
    /// Numeric status code, stable per variant.
    pub fn code(&self) -> u32 {
        match self {
            ProviderError::NotFound => 0xFFFF_0008,
            ProviderError::ShortBuffer { .. } => 0xFFFF_0010,
            ProviderError::BadHandle(_) => 0xFFFF_0005,
            ProviderError::BadState(_) => 0xFFFF_0007,
            ProviderError::CryptoFailed(_) => 0xFFFF_000F,
            ProviderError::Storage(_) => 0xFFFF_3024,
        }
    }
}

pub type Result<T> = std::result::Result<T, CustodyError>;
