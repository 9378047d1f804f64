//! Software provider backed by the `rsa` crate
//!
//! This provider keeps the repository self-contained: key generation and the
//! raw (no-padding) RSA decrypt run in-process, and persistent key objects
//! are JSON records holding the PKCS#8 DER of the keypair, either in memory
//! or under a storage directory.
//!
//! All state sits behind one mutex; the provider is the serialization point
//! for persistent objects, so concurrent invocations cannot interleave
//! create/open against half-written state. Creation writes a temp file and
//! renames it, so a failed create leaves no object behind.

use crate::error::ProviderError;
use crate::provider::{
    Algorithm, Handle, KeyType, Mode, ObjectId, ObjectInfo, Provider, StorageId, HANDLE_NULL,
};
use rsa::hazmat::{rsa_decrypt_and_check, rsa_encrypt};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Persistent key object record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    object_type: KeyType,
    /// Key size in bits.
    object_size: u32,
    /// PKCS#8 DER of the keypair, hex encoded.
    private_key: String,
}

struct TransientObject {
    object_type: KeyType,
    max_size: u32,
    key: Option<RsaPrivateKey>,
}

struct OpenedObject {
    object_type: KeyType,
    object_size: u32,
    key: RsaPrivateKey,
}

struct Operation {
    algorithm: Algorithm,
    mode: Mode,
    max_key_size: u32,
    key: Option<RsaPrivateKey>,
}

enum Slot {
    Transient(TransientObject),
    Opened(OpenedObject),
    Operation(Operation),
}

struct State {
    next_handle: Handle,
    next_object_id: ObjectId,
    slots: HashMap<Handle, Slot>,
    /// Backing store when no storage directory is configured.
    memory: HashMap<ObjectId, KeyRecord>,
}

/// In-process crypto/storage provider.
pub struct SoftwareProvider {
    storage_dir: Option<PathBuf>,
    state: Mutex<State>,
}

impl SoftwareProvider {
    /// Provider with purely in-memory storage; key objects die with it.
    pub fn in_memory() -> Self {
        Self {
            storage_dir: None,
            state: Mutex::new(State {
                next_handle: 1,
                next_object_id: 1,
                slots: HashMap::new(),
                memory: HashMap::new(),
            }),
        }
    }

    /// Provider persisting key objects as `key-<id>.json` files under `dir`.
    ///
    /// Object ids resume above the highest id already present, so ids stay
    /// unique across provider restarts.
    pub fn with_storage_dir(dir: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| ProviderError::Storage(format!("create {}: {e}", dir.display())))?;

        let mut next_object_id = 1;
        let entries = fs::read_dir(dir)
            .map_err(|e| ProviderError::Storage(format!("read {}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| ProviderError::Storage(e.to_string()))?;
            if let Some(id) = object_id_from_file_name(&entry.file_name().to_string_lossy()) {
                next_object_id = next_object_id.max(id + 1);
            }
        }

        info!(dir = %dir.display(), next_object_id, "opened key storage directory");
        Ok(Self {
            storage_dir: Some(dir.to_path_buf()),
            state: Mutex::new(State {
                next_handle: 1,
                next_object_id,
                slots: HashMap::new(),
                memory: HashMap::new(),
            }),
        })
    }

    /// The public half of a stored keypair, for the encryption side of the
    /// exchange. The private half never leaves the provider.
    pub fn public_key(&self, object_id: ObjectId) -> Result<RsaPublicKey, ProviderError> {
        let state = self.state();
        let record = self.load_record(&state.memory, object_id)?;
        Ok(decode_key(&record)?.to_public_key())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, dir: &Path, object_id: ObjectId) -> PathBuf {
        dir.join(format!("key-{object_id}.json"))
    }

    fn load_record(
        &self,
        memory: &HashMap<ObjectId, KeyRecord>,
        object_id: ObjectId,
    ) -> Result<KeyRecord, ProviderError> {
        let Some(dir) = &self.storage_dir else {
            return memory.get(&object_id).cloned().ok_or(ProviderError::NotFound);
        };
        let path = self.record_path(dir, object_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ProviderError::NotFound),
            Err(e) => return Err(ProviderError::Storage(format!("read {}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(object_id, %e, "corrupt key record");
            ProviderError::Storage(format!("corrupt key record {object_id}: {e}"))
        })
    }

    fn store_record(
        &self,
        memory: &mut HashMap<ObjectId, KeyRecord>,
        object_id: ObjectId,
        record: KeyRecord,
    ) -> Result<(), ProviderError> {
        let Some(dir) = &self.storage_dir else {
            memory.insert(object_id, record);
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| ProviderError::Storage(format!("encode key record: {e}")))?;
        let path = self.record_path(dir, object_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .map_err(|e| ProviderError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| ProviderError::Storage(format!("rename {}: {e}", path.display())))
    }
}

fn object_id_from_file_name(name: &str) -> Option<ObjectId> {
    name.strip_prefix("key-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn decode_key(record: &KeyRecord) -> Result<RsaPrivateKey, ProviderError> {
    let der = hex::decode(&record.private_key)
        .map_err(|e| ProviderError::Storage(format!("corrupt key record: {e}")))?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| ProviderError::Storage(format!("corrupt key record: {e}")))
}

/// Raw RSA encryption of `message` under `public_key`, producing a
/// modulus-sized ciphertext. This is the encryption side of the fixed
/// no-padding scheme and uses only the public half; it exists for the host
/// and for test oracles, not as a service command.
pub fn raw_encrypt(public_key: &RsaPublicKey, message: &[u8]) -> Result<Vec<u8>, ProviderError> {
    if message.is_empty() {
        return Err(ProviderError::CryptoFailed("empty message".into()));
    }
    let m = BigUint::from_bytes_be(message);
    if &m >= public_key.n() {
        return Err(ProviderError::CryptoFailed(
            "message not below the modulus".into(),
        ));
    }
    let c = rsa_encrypt(public_key, &m).map_err(|e| ProviderError::CryptoFailed(e.to_string()))?;
    let k = public_key.size();
    let bytes = c.to_bytes_be();
    let mut out = vec![0u8; k];
    out[k - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

impl Provider for SoftwareProvider {
    fn allocate_keypair_object(
        &self,
        object_type: KeyType,
        max_size: u32,
    ) -> Result<Handle, ProviderError> {
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.slots.insert(
            handle,
            Slot::Transient(TransientObject {
                object_type,
                max_size,
                key: None,
            }),
        );
        Ok(handle)
    }

    fn generate_key(&self, object: Handle, size: u32) -> Result<(), ProviderError> {
        let mut state = self.state();
        let transient = match state.slots.get_mut(&object) {
            Some(Slot::Transient(t)) => t,
            _ => return Err(ProviderError::BadHandle(object)),
        };
        if size > transient.max_size {
            return Err(ProviderError::BadState(
                "requested key size exceeds the allocated object",
            ));
        }
        debug!(size, "generating keypair");
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), size as usize)
            .map_err(|e| ProviderError::CryptoFailed(e.to_string()))?;
        transient.key = Some(key);
        Ok(())
    }

    fn create_persistent_object(
        &self,
        _storage: StorageId,
        _access_flags: u32,
        source: Handle,
    ) -> Result<ObjectId, ProviderError> {
        let mut state = self.state();
        let (object_type, key) = match state.slots.get(&source) {
            Some(Slot::Transient(t)) => match &t.key {
                Some(key) => (t.object_type, key.clone()),
                None => {
                    return Err(ProviderError::BadState(
                        "source object has no key material",
                    ))
                }
            },
            _ => return Err(ProviderError::BadHandle(source)),
        };

        let der = key
            .to_pkcs8_der()
            .map_err(|e| ProviderError::CryptoFailed(e.to_string()))?;
        let record = KeyRecord {
            object_type,
            object_size: (key.size() * 8) as u32,
            private_key: hex::encode(der.as_bytes()),
        };

        let object_id = state.next_object_id;
        self.store_record(&mut state.memory, object_id, record)?;
        state.next_object_id += 1;
        info!(object_id, "stored persistent key object");
        Ok(object_id)
    }

    fn open_persistent_object(
        &self,
        _storage: StorageId,
        object_id: ObjectId,
        _access_flags: u32,
    ) -> Result<Handle, ProviderError> {
        let mut state = self.state();
        let record = self.load_record(&state.memory, object_id)?;
        let key = decode_key(&record)?;

        let handle = state.next_handle;
        state.next_handle += 1;
        state.slots.insert(
            handle,
            Slot::Opened(OpenedObject {
                object_type: record.object_type,
                object_size: record.object_size,
                key,
            }),
        );
        debug!(object_id, handle, "opened persistent key object");
        Ok(handle)
    }

    fn object_info(&self, object: Handle) -> Result<ObjectInfo, ProviderError> {
        let state = self.state();
        match state.slots.get(&object) {
            Some(Slot::Opened(o)) => Ok(ObjectInfo {
                object_type: o.object_type,
                object_size: o.object_size,
            }),
            Some(Slot::Transient(t)) => Ok(ObjectInfo {
                object_type: t.object_type,
                object_size: t
                    .key
                    .as_ref()
                    .map(|k| (k.size() * 8) as u32)
                    .unwrap_or(t.max_size),
            }),
            _ => Err(ProviderError::BadHandle(object)),
        }
    }

    fn copy_attributes(&self, dest: Handle, source: Handle) -> Result<(), ProviderError> {
        let mut state = self.state();
        let (object_type, object_size, key) = match state.slots.get(&source) {
            Some(Slot::Opened(o)) => (o.object_type, o.object_size, o.key.clone()),
            Some(Slot::Transient(t)) => match &t.key {
                Some(key) => (t.object_type, (key.size() * 8) as u32, key.clone()),
                None => {
                    return Err(ProviderError::BadState(
                        "source object has no key material",
                    ))
                }
            },
            _ => return Err(ProviderError::BadHandle(source)),
        };
        let transient = match state.slots.get_mut(&dest) {
            Some(Slot::Transient(t)) => t,
            _ => return Err(ProviderError::BadHandle(dest)),
        };
        if transient.object_type != object_type {
            return Err(ProviderError::BadState("object types differ"));
        }
        if transient.max_size < object_size {
            return Err(ProviderError::BadState(
                "destination object too small for the source key",
            ));
        }
        transient.key = Some(key);
        Ok(())
    }

    fn allocate_operation(
        &self,
        algorithm: Algorithm,
        mode: Mode,
        max_key_size: u32,
    ) -> Result<Handle, ProviderError> {
        let mut state = self.state();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.slots.insert(
            handle,
            Slot::Operation(Operation {
                algorithm,
                mode,
                max_key_size,
                key: None,
            }),
        );
        Ok(handle)
    }

    fn set_operation_key(&self, operation: Handle, key: Handle) -> Result<(), ProviderError> {
        let mut state = self.state();
        let bound = match state.slots.get(&key) {
            Some(Slot::Transient(t)) => match &t.key {
                Some(key) => key.clone(),
                None => {
                    return Err(ProviderError::BadState(
                        "source object has no key material",
                    ))
                }
            },
            _ => return Err(ProviderError::BadHandle(key)),
        };
        let op = match state.slots.get_mut(&operation) {
            Some(Slot::Operation(op)) => op,
            _ => return Err(ProviderError::BadHandle(operation)),
        };
        if (bound.size() * 8) as u32 > op.max_key_size {
            return Err(ProviderError::BadState(
                "key larger than the operation allows",
            ));
        }
        op.key = Some(bound);
        Ok(())
    }

    fn asymmetric_decrypt(
        &self,
        operation: Handle,
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<usize, ProviderError> {
        let state = self.state();
        let op = match state.slots.get(&operation) {
            Some(Slot::Operation(op)) => op,
            _ => return Err(ProviderError::BadHandle(operation)),
        };
        let key = op
            .key
            .as_ref()
            .ok_or(ProviderError::BadState("no key bound to the operation"))?;

        if ciphertext.len() > key.size() {
            return Err(ProviderError::CryptoFailed(
                "ciphertext longer than the modulus".into(),
            ));
        }
        let c = BigUint::from_bytes_be(ciphertext);
        if &c >= key.n() {
            return Err(ProviderError::CryptoFailed(
                "ciphertext out of range".into(),
            ));
        }

        debug!(
            algorithm = ?op.algorithm,
            mode = ?op.mode,
            ciphertext_len = ciphertext.len(),
            "running asymmetric decrypt"
        );
        let m = rsa_decrypt_and_check(key, Some(&mut rand::thread_rng()), &c)
            .map_err(|e| ProviderError::CryptoFailed(e.to_string()))?;

        // raw big-number semantics: leading zero bytes are stripped
        let bytes = m.to_bytes_be();
        if plaintext.len() < bytes.len() {
            return Err(ProviderError::ShortBuffer {
                required: bytes.len(),
            });
        }
        plaintext[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn release(&self, handle: Handle) {
        if handle == HANDLE_NULL {
            return;
        }
        let mut state = self.state();
        state.slots.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CustodyError;
    use crate::params::{MemrefOut, Param, ParamType, ParamTypes, Params};
    use crate::processor::{CommandProcessor, CMD_DECRYPT_DATA, CMD_GENERATE_KEYPAIR};

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

    fn generate(processor: &CommandProcessor<SoftwareProvider>) -> u32 {
        let session = processor.open_session(ParamTypes::NONE).expect("open");
        let mut params =
            Params::new([Param::Value(0), Param::None, Param::None, Param::None]);
        processor
            .invoke(&session, CMD_GENERATE_KEYPAIR, GENERATE_SHAPE, &mut params)
            .expect("generate");
        processor.close_session(session);
        params.value(0)
    }

    fn decrypt(
        processor: &CommandProcessor<SoftwareProvider>,
        object_id: u32,
        ciphertext: &[u8],
        out_buf: &mut [u8],
    ) -> crate::error::Result<usize> {
        let session = processor.open_session(ParamTypes::NONE).expect("open");
        let mut params = Params::new([
            Param::Value(object_id),
            Param::MemrefIn(ciphertext),
            Param::MemrefOut(MemrefOut::new(out_buf)),
            Param::None,
        ]);
        let result = processor.invoke(&session, CMD_DECRYPT_DATA, DECRYPT_SHAPE, &mut params);
        processor.close_session(session);
        result.map(|()| params.memref_out(2).len())
    }

    #[test]
    fn generate_probe_decrypt_round_trip() {
        let processor = CommandProcessor::new(SoftwareProvider::in_memory());
        let object_id = generate(&processor);
        assert_ne!(object_id, 0);

        let public_key = processor.provider().public_key(object_id).expect("pubkey");
        let ciphertext = raw_encrypt(&public_key, b"hello-world").expect("encrypt");
        assert_eq!(ciphertext.len(), 256);

        // size probe: no buffer, no decryption, required size reported
        let session = processor.open_session(ParamTypes::NONE).expect("open");
        let mut params = Params::new([
            Param::Value(object_id),
            Param::MemrefIn(&ciphertext),
            Param::MemrefOut(MemrefOut::probe()),
            Param::None,
        ]);
        processor
            .invoke(&session, CMD_DECRYPT_DATA, DECRYPT_SHAPE, &mut params)
            .expect("probe");
        assert_eq!(params.memref_out(2).len(), 256);
        processor.close_session(session);

        let mut out_buf = [0u8; 256];
        let written =
            decrypt(&processor, object_id, &ciphertext, &mut out_buf).expect("decrypt");
        assert_eq!(&out_buf[..written], b"hello-world");
    }

    #[test]
    fn unknown_object_id_is_not_found() {
        let processor = CommandProcessor::new(SoftwareProvider::in_memory());
        let object_id = generate(&processor);

        let mut out_buf = [0u8; 256];
        let err = decrypt(&processor, object_id + 1, &[1, 2, 3], &mut out_buf).unwrap_err();
        assert_eq!(err, CustodyError::ObjectNotFound(object_id + 1));
    }

    #[test]
    fn short_output_buffer_is_rejected() {
        let processor = CommandProcessor::new(SoftwareProvider::in_memory());
        let object_id = generate(&processor);

        let public_key = processor.provider().public_key(object_id).expect("pubkey");
        let ciphertext = raw_encrypt(&public_key, b"hello-world").expect("encrypt");

        let mut out_buf = [0u8; 4];
        let err = decrypt(&processor, object_id, &ciphertext, &mut out_buf).unwrap_err();
        assert_eq!(
            err,
            CustodyError::BufferTooSmall {
                required: b"hello-world".len(),
                capacity: 4,
            }
        );
    }

    #[test]
    fn keys_persist_across_provider_instances() {
        let dir = tempfile::tempdir().expect("tempdir");

        let processor = CommandProcessor::new(
            SoftwareProvider::with_storage_dir(dir.path()).expect("provider"),
        );
        let object_id = generate(&processor);
        let public_key = processor.provider().public_key(object_id).expect("pubkey");
        let ciphertext = raw_encrypt(&public_key, b"persisted").expect("encrypt");
        drop(processor);

        let processor = CommandProcessor::new(
            SoftwareProvider::with_storage_dir(dir.path()).expect("reopen"),
        );
        let mut out_buf = [0u8; 256];
        let written =
            decrypt(&processor, object_id, &ciphertext, &mut out_buf).expect("decrypt");
        assert_eq!(&out_buf[..written], b"persisted");

        // ids keep increasing after a restart
        let next_id = generate(&processor);
        assert!(next_id > object_id);
    }

    #[test]
    fn create_without_generated_key_is_rejected() {
        let provider = SoftwareProvider::in_memory();
        let transient = provider
            .allocate_keypair_object(KeyType::RsaKeypair, 2048)
            .expect("allocate");
        let err = provider
            .create_persistent_object(StorageId::Private, 0x3, transient)
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::BadState("source object has no key material")
        );
        provider.release(transient);
        provider.release(HANDLE_NULL); // no-op
    }

    #[test]
    fn raw_encrypt_rejects_out_of_range_messages() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).expect("keygen");
        let public_key = key.to_public_key();
        assert!(raw_encrypt(&public_key, &[]).is_err());
        assert!(raw_encrypt(&public_key, &[0xFF; 65]).is_err());
        assert!(raw_encrypt(&public_key, b"ok").is_ok());
    }
}
