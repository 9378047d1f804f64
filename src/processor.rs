//! Session lifecycle and command dispatch
//!
//! The processor is the only entry point an untrusted caller reaches. It is
//! stateless across invocations: it owns nothing but the injected provider,
//! so concurrent invocations serialized by the hosting context cannot corrupt
//! shared state.
//!
//! ## Commands
//!
//! - [`Command::GenerateKeypair`] (`0x1`): generate and persist an RSA
//!   keypair, return its object id.
//! - [`Command::DecryptData`] (`0x2`): decrypt a ciphertext under a
//!   previously generated keypair selected by object id.
//!
//! Object ids are bearer tokens: whoever presents a valid id may decrypt
//! with that key. That is a deliberate property of this design, not an
//! oversight; callers needing stricter policy must gate access before the
//! command boundary.

use crate::error::{CustodyError, Result};
use crate::lifecycle;
use crate::params::{ParamTypes, Params};
use crate::provider::Provider;
use tracing::debug;

/// Command identifier for keypair generation.
pub const CMD_GENERATE_KEYPAIR: u32 = 0x1;
/// Command identifier for decryption.
pub const CMD_DECRYPT_DATA: u32 = 0x2;

/// The closed set of recognized commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GenerateKeypair,
    DecryptData,
}

impl Command {
    /// Maps a wire identifier to a command, if recognized.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            CMD_GENERATE_KEYPAIR => Some(Command::GenerateKeypair),
            CMD_DECRYPT_DATA => Some(Command::DecryptData),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Command::GenerateKeypair => CMD_GENERATE_KEYPAIR,
            Command::DecryptData => CMD_DECRYPT_DATA,
        }
    }
}

/// Proof of an accepted session open.
///
/// Constructible only through [`CommandProcessor::open_session`]; carries no
/// state because the service retains nothing between invocations.
#[derive(Debug)]
pub struct Session {
    _context: (),
}

/// The command processor hosting the two key-custody operations.
pub struct CommandProcessor<P> {
    provider: P,
}

impl<P: Provider> CommandProcessor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The injected provider (the encryption side of a test oracle lives
    /// next to it, outside the command boundary).
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Opens a session. The caller must declare an all-`None` parameter
    /// vector; anything else is rejected with no side effect.
    pub fn open_session(&self, param_types: ParamTypes) -> Result<Session> {
        if param_types != ParamTypes::NONE {
            return Err(CustodyError::InvalidParameters);
        }
        debug!("session opened");
        Ok(Session { _context: () })
    }

    /// Closes a session. No state survives it.
    pub fn close_session(&self, session: Session) {
        drop(session);
        debug!("session closed");
    }

    /// Invokes one command within an open session.
    ///
    /// Dispatches to exactly one handler; each handler validates the declared
    /// parameter shape against its own expected shape before any side effect.
    pub fn invoke(
        &self,
        _session: &Session,
        command_id: u32,
        param_types: ParamTypes,
        params: &mut Params<'_>,
    ) -> Result<()> {
        let Some(command) = Command::from_id(command_id) else {
            debug!(command_id, "unknown command identifier");
            return Err(CustodyError::UnsupportedCommand(command_id));
        };

        debug!(?command, "dispatching command");
        match command {
            Command::GenerateKeypair => {
                lifecycle::generate_keypair(&self.provider, param_types, params)
            }
            Command::DecryptData => lifecycle::decrypt_data(&self.provider, param_types, params),
        }
    }
}
