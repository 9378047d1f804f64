//! Key lifecycle handlers: keypair generation and decryption
//!
//! Each handler validates its expected parameter shape before any side
//! effect, then drives the provider through a sequence of fallible steps.
//! Every acquired handle sits in a [`ReleaseGuard`] so it is released on
//! every exit path, in reverse acquisition order.

use crate::error::{CustodyError, ProviderError, Result};
use crate::params::{ParamType, ParamTypes, Params};
use crate::provider::{
    Algorithm, Handle, KeyType, Mode, Provider, StorageId, ACCESS_READ, ACCESS_WRITE, SHARE_READ,
};
use tracing::debug;

/// Size of every generated keypair, in bits.
pub(crate) const RSA_KEYPAIR_BITS: u32 = 2048;

const GENERATE_SHAPE: ParamTypes = ParamTypes::new(
    ParamType::ValueOutput,
    ParamType::None,
    ParamType::None,
    ParamType::None,
);

const DECRYPT_SHAPE: ParamTypes = ParamTypes::new(
    ParamType::ValueInput,
    ParamType::MemrefInput,
    ParamType::MemrefOutput,
    ParamType::None,
);

/// Releases a provider handle when dropped.
///
/// Guards declared later drop earlier, which yields the release order the
/// handlers need: operation, then transient object, then persistent object.
struct ReleaseGuard<'p, P: Provider> {
    provider: &'p P,
    handle: Handle,
}

impl<'p, P: Provider> ReleaseGuard<'p, P> {
    fn new(provider: &'p P, handle: Handle) -> Self {
        Self { provider, handle }
    }

    fn handle(&self) -> Handle {
        self.handle
    }
}

impl<P: Provider> Drop for ReleaseGuard<'_, P> {
    fn drop(&mut self) {
        self.provider.release(self.handle);
    }
}

/// Generates a fresh persistent keypair and writes its object id into the
/// value-output slot.
pub(crate) fn generate_keypair<P: Provider>(
    provider: &P,
    param_types: ParamTypes,
    params: &mut Params<'_>,
) -> Result<()> {
    if param_types != GENERATE_SHAPE {
        return Err(CustodyError::InvalidParameters);
    }

    let transient = ReleaseGuard::new(
        provider,
        provider.allocate_keypair_object(KeyType::RsaKeypair, RSA_KEYPAIR_BITS)?,
    );
    provider.generate_key(transient.handle(), RSA_KEYPAIR_BITS)?;

    let object_id = provider.create_persistent_object(
        StorageId::Private,
        ACCESS_READ | ACCESS_WRITE,
        transient.handle(),
    )?;

    params.set_value(0, object_id);
    debug!(object_id, "persisted generated keypair");
    Ok(())
}

/// Decrypts the input memref under the keypair selected by the value-input
/// slot, writing plaintext into the output memref.
///
/// An output memref without a buffer is the size probe: the required output
/// size lands in the slot's length field and no key material is touched
/// beyond the read-only open.
pub(crate) fn decrypt_data<P: Provider>(
    provider: &P,
    param_types: ParamTypes,
    params: &mut Params<'_>,
) -> Result<()> {
    if param_types != DECRYPT_SHAPE {
        return Err(CustodyError::InvalidParameters);
    }

    let object_id = params.value(0);
    let ciphertext = params.memref_in(1);

    // The id is a bearer token; the caller learns nothing beyond "not openable".
    let persistent = match provider.open_persistent_object(
        StorageId::Private,
        object_id,
        ACCESS_READ | SHARE_READ,
    ) {
        Ok(handle) => ReleaseGuard::new(provider, handle),
        Err(err) => {
            debug!(object_id, %err, "persistent object not openable");
            return Err(CustodyError::ObjectNotFound(object_id));
        }
    };

    let info = provider.object_info(persistent.handle())?;
    let required = info.object_size as usize / 8;

    let (buffer, out_len) = params.memref_out(2).split_mut();
    let Some(plaintext) = buffer else {
        debug!(object_id, required, "size probe, skipping decrypt");
        *out_len = required;
        return Ok(());
    };

    let transient = ReleaseGuard::new(
        provider,
        provider.allocate_keypair_object(info.object_type, info.object_size)?,
    );
    provider.copy_attributes(transient.handle(), persistent.handle())?;

    let operation = ReleaseGuard::new(
        provider,
        provider.allocate_operation(Algorithm::RsaNoPad, Mode::Decrypt, info.object_size)?,
    );
    provider.set_operation_key(operation.handle(), transient.handle())?;

    let written = match provider.asymmetric_decrypt(operation.handle(), ciphertext, plaintext) {
        Ok(written) => written,
        Err(ProviderError::ShortBuffer { required }) => {
            return Err(CustodyError::BufferTooSmall {
                required,
                capacity: plaintext.len(),
            });
        }
        Err(err) => return Err(err.into()),
    };

    *out_len = written;
    debug!(object_id, written, "decrypted ciphertext");
    Ok(())
}
