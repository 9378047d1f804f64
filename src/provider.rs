//! Capability contract for the trusted cryptographic/storage provider
//!
//! The command handlers never touch key material or storage directly; they
//! drive an injected [`Provider`] capability. That keeps the service testable
//! against a mock and keeps every primitive behind one seam.
//!
//! Handles returned by a provider are runtime-scoped and private to the
//! invocation that acquired them. Persistent objects are addressed by an
//! [`ObjectId`] instead, which is a bearer token: the service performs no
//! authentication beyond "the provider can open an object under this id".

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};

/// Runtime handle to a transient object, an opened persistent object, or an
/// operation. Meaningful only to the provider that issued it.
pub type Handle = u32;

/// The null handle. [`Provider::release`] ignores it.
pub const HANDLE_NULL: Handle = 0;

/// Identifier of a persistent object, assigned at creation and presented by
/// callers on later invocations.
pub type ObjectId = u32;

/// Read access to an object's contents.
pub const ACCESS_READ: u32 = 0x1;
/// Write access to an object's contents.
pub const ACCESS_WRITE: u32 = 0x2;
/// Concurrent readers may hold the object open.
pub const SHARE_READ: u32 = 0x10;

/// The kind of key material an object holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Full RSA keypair, public and private components.
    RsaKeypair,
}

/// The storage area persistent objects live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageId {
    /// Storage private to this service.
    Private,
}

/// The single supported asymmetric scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Raw RSA with no padding; plaintext and ciphertext are big-endian
    /// integers below the modulus.
    RsaNoPad,
}

/// Direction of a cryptographic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Decrypt,
}

/// Metadata describing a key object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub object_type: KeyType,
    /// Key size in bits.
    pub object_size: u32,
}

/// The trusted crypto/storage capability consumed by the command handlers.
///
/// All calls are synchronous and non-cancelable: each either completes or
/// fails atomically. Implementations serialize access to persistent state
/// internally; the handlers hold no shared mutable state of their own.
pub trait Provider {
    /// Allocates an empty transient key object able to hold keys of up to
    /// `max_size` bits.
    fn allocate_keypair_object(
        &self,
        object_type: KeyType,
        max_size: u32,
    ) -> Result<Handle, ProviderError>;

    /// Generates fresh key material of `size` bits into a transient object.
    fn generate_key(&self, object: Handle, size: u32) -> Result<(), ProviderError>;

    /// Persists the key material of `source` as a new object and returns its
    /// freshly assigned id. Either fully succeeds or leaves no object behind.
    fn create_persistent_object(
        &self,
        storage: StorageId,
        access_flags: u32,
        source: Handle,
    ) -> Result<ObjectId, ProviderError>;

    /// Opens the persistent object stored under `object_id`.
    fn open_persistent_object(
        &self,
        storage: StorageId,
        object_id: ObjectId,
        access_flags: u32,
    ) -> Result<Handle, ProviderError>;

    /// Metadata of a live object.
    fn object_info(&self, object: Handle) -> Result<ObjectInfo, ProviderError>;

    /// Copies the key attributes of `source` (an opened persistent object)
    /// into `dest` (a transient object of matching type and size).
    fn copy_attributes(&self, dest: Handle, source: Handle) -> Result<(), ProviderError>;

    /// Allocates an operation for `algorithm` in `mode`, accepting keys of up
    /// to `max_key_size` bits.
    fn allocate_operation(
        &self,
        algorithm: Algorithm,
        mode: Mode,
        max_key_size: u32,
    ) -> Result<Handle, ProviderError>;

    /// Binds the key held by `key` to `operation`.
    fn set_operation_key(&self, operation: Handle, key: Handle) -> Result<(), ProviderError>;

    /// Runs the asymmetric decrypt bound to `operation` and returns the
    /// number of plaintext bytes written. Fails with
    /// [`ProviderError::ShortBuffer`] when `plaintext` cannot hold the result.
    fn asymmetric_decrypt(
        &self,
        operation: Handle,
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<usize, ProviderError>;

    /// Releases any runtime handle. Idempotent; ignores [`HANDLE_NULL`] and
    /// handles that are already gone.
    fn release(&self, handle: Handle);
}
