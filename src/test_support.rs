//! Test doubles shared by the unit tests
//!
//! [`MockProvider`] records every provider call, tracks live handles, and can
//! be told to fail a single named method, so handler tests can assert both
//! "no side effect before validation" and "releases balance allocations on
//! every exit path".

use crate::error::ProviderError;
use crate::provider::{
    Algorithm, Handle, KeyType, Mode, ObjectId, ObjectInfo, Provider, StorageId, HANDLE_NULL,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Transient,
    Opened,
    Operation,
}

#[derive(Default)]
struct Inner {
    next_handle: Handle,
    next_object_id: ObjectId,
    live: HashMap<Handle, SlotKind>,
    persistent: HashSet<ObjectId>,
    plaintext: Vec<u8>,
    fail_on: Option<&'static str>,
    calls: usize,
    allocations: usize,
    releases: usize,
    decrypt_calls: usize,
}

/// An in-memory provider double with call accounting and failure injection.
pub(crate) struct MockProvider {
    inner: RefCell<Inner>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_handle: 1,
                next_object_id: 1,
                plaintext: b"mock-plaintext".to_vec(),
                ..Inner::default()
            }),
        }
    }

    /// Makes the named provider method fail with an injected error.
    pub(crate) fn fail_on(&self, method: &'static str) {
        self.inner.borrow_mut().fail_on = Some(method);
    }

    /// Sets what a successful decrypt writes.
    pub(crate) fn set_plaintext(&self, plaintext: &[u8]) {
        self.inner.borrow_mut().plaintext = plaintext.to_vec();
    }

    /// Registers a persistent object without going through generation.
    pub(crate) fn seed_object(&self) -> ObjectId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_object_id;
        inner.next_object_id += 1;
        inner.persistent.insert(id);
        id
    }

    /// Total provider calls, `release` included.
    pub(crate) fn calls(&self) -> usize {
        self.inner.borrow().calls
    }

    /// Successful handle acquisitions (transient, opened, operation).
    pub(crate) fn allocations(&self) -> usize {
        self.inner.borrow().allocations
    }

    /// Releases that actually retired a live handle.
    pub(crate) fn releases(&self) -> usize {
        self.inner.borrow().releases
    }

    /// Handles still alive — zero after any well-behaved invocation.
    pub(crate) fn live_handles(&self) -> usize {
        self.inner.borrow().live.len()
    }

    pub(crate) fn decrypt_calls(&self) -> usize {
        self.inner.borrow().decrypt_calls
    }
}

impl Inner {
    fn enter(&mut self, method: &'static str) -> Result<(), ProviderError> {
        self.calls += 1;
        if self.fail_on == Some(method) {
            return Err(ProviderError::CryptoFailed(format!(
                "injected failure in {method}"
            )));
        }
        Ok(())
    }

    fn acquire(&mut self, kind: SlotKind) -> Handle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle, kind);
        self.allocations += 1;
        handle
    }

    fn expect(&self, handle: Handle, kind: SlotKind) -> Result<(), ProviderError> {
        match self.live.get(&handle) {
            Some(live) if *live == kind => Ok(()),
            _ => Err(ProviderError::BadHandle(handle)),
        }
    }
}

impl Provider for MockProvider {
    fn allocate_keypair_object(
        &self,
        _object_type: KeyType,
        _max_size: u32,
    ) -> Result<Handle, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("allocate_keypair_object")?;
        Ok(inner.acquire(SlotKind::Transient))
    }

    fn generate_key(&self, object: Handle, _size: u32) -> Result<(), ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("generate_key")?;
        inner.expect(object, SlotKind::Transient)
    }

    fn create_persistent_object(
        &self,
        _storage: StorageId,
        _access_flags: u32,
        source: Handle,
    ) -> Result<ObjectId, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("create_persistent_object")?;
        inner.expect(source, SlotKind::Transient)?;
        let id = inner.next_object_id;
        inner.next_object_id += 1;
        inner.persistent.insert(id);
        Ok(id)
    }

    fn open_persistent_object(
        &self,
        _storage: StorageId,
        object_id: ObjectId,
        _access_flags: u32,
    ) -> Result<Handle, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("open_persistent_object")?;
        if !inner.persistent.contains(&object_id) {
            return Err(ProviderError::NotFound);
        }
        Ok(inner.acquire(SlotKind::Opened))
    }

    fn object_info(&self, object: Handle) -> Result<ObjectInfo, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("object_info")?;
        inner.expect(object, SlotKind::Opened)?;
        Ok(ObjectInfo {
            object_type: KeyType::RsaKeypair,
            object_size: 2048,
        })
    }

    fn copy_attributes(&self, dest: Handle, source: Handle) -> Result<(), ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("copy_attributes")?;
        inner.expect(dest, SlotKind::Transient)?;
        inner.expect(source, SlotKind::Opened)
    }

    fn allocate_operation(
        &self,
        _algorithm: Algorithm,
        _mode: Mode,
        _max_key_size: u32,
    ) -> Result<Handle, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("allocate_operation")?;
        Ok(inner.acquire(SlotKind::Operation))
    }

    fn set_operation_key(&self, operation: Handle, key: Handle) -> Result<(), ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.enter("set_operation_key")?;
        inner.expect(operation, SlotKind::Operation)?;
        inner.expect(key, SlotKind::Transient)
    }

    fn asymmetric_decrypt(
        &self,
        operation: Handle,
        _ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<usize, ProviderError> {
        let mut inner = self.inner.borrow_mut();
        inner.decrypt_calls += 1;
        inner.enter("asymmetric_decrypt")?;
        inner.expect(operation, SlotKind::Operation)?;
        let result = inner.plaintext.clone();
        if plaintext.len() < result.len() {
            return Err(ProviderError::ShortBuffer {
                required: result.len(),
            });
        }
        plaintext[..result.len()].copy_from_slice(&result);
        Ok(result.len())
    }

    fn release(&self, handle: Handle) {
        let mut inner = self.inner.borrow_mut();
        inner.calls += 1;
        if handle == HANDLE_NULL {
            return;
        }
        if inner.live.remove(&handle).is_some() {
            inner.releases += 1;
        }
    }
}
