//! Key-custody service core for an isolated execution context
//!
//! This library implements a small command processor that owns long-lived
//! RSA key material on behalf of an untrusted caller:
//! - [`processor`]: session lifecycle and dispatch over the two commands
//! - [`params`]: the four-slot typed parameter vector crossing the boundary
//! - [`provider`]: the injected crypto/storage capability contract
//! - [`software`]: an in-process provider built on the `rsa` crate, with
//!   optional on-disk persistence
//! - [`error`]: the error taxonomy and its wire status codes
//!
//! Private key material never crosses the command boundary. Callers refer to
//! keypairs only through opaque numeric object ids, and those ids are bearer
//! tokens: presenting a valid id is the only access check performed.

pub mod error;
mod lifecycle;
pub mod params;
pub mod processor;
pub mod provider;
pub mod software;

#[cfg(test)]
mod test_support;
