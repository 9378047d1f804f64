//! Host driver for the key-custody service
//!
//! This binary is the untrusted caller: it wires the software provider into
//! the command processor, opens a session, marshals exactly one command, and
//! prints the result. It holds no key material beyond the printed output.
//!
//! ```bash
//! key-custody generate
//! key-custody encrypt --key 1 --data "hello-world"
//! key-custody decrypt --key 1 --ciphertext 0x<hex> --probe
//! key-custody decrypt --key 1 --ciphertext 0x<hex>
//! ```
//!
//! Exit code is 0 on success and non-zero on any failure, whether during
//! provider init, session open, or command invocation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use key_custody::params::{MemrefOut, Param, ParamType, ParamTypes, Params};
use key_custody::processor::{CommandProcessor, CMD_DECRYPT_DATA, CMD_GENERATE_KEYPAIR};
use key_custody::software::{raw_encrypt, SoftwareProvider};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(about = "Drive the key-custody service against a local key store")]
struct Cli {
    /// Directory holding the persistent key objects
    #[arg(long, default_value = "keystore")]
    store: PathBuf,

    #[command(subcommand)]
    command: HostCommand,
}

#[derive(Subcommand)]
enum HostCommand {
    /// Generate a persistent RSA keypair and print its object id
    Generate,
    /// Encrypt data under a stored keypair's public half (test input for decrypt)
    Encrypt {
        /// Object id returned by generate
        #[arg(long)]
        key: u32,
        /// Plaintext to encrypt
        #[arg(long)]
        data: String,
    },
    /// Decrypt a hex ciphertext with a stored keypair
    Decrypt {
        /// Object id returned by generate
        #[arg(long)]
        key: u32,
        /// Ciphertext, hex encoded (with or without 0x prefix)
        #[arg(long)]
        ciphertext: String,
        /// Only report the required output buffer size
        #[arg(long)]
        probe: bool,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let provider = SoftwareProvider::with_storage_dir(&cli.store)
        .with_context(|| format!("initializing key store at {}", cli.store.display()))?;
    let processor = CommandProcessor::new(provider);
    let session = processor
        .open_session(ParamTypes::NONE)
        .context("opening session")?;

    match cli.command {
        HostCommand::Generate => {
            let mut params =
                Params::new([Param::Value(0), Param::None, Param::None, Param::None]);
            let types = ParamTypes::new(
                ParamType::ValueOutput,
                ParamType::None,
                ParamType::None,
                ParamType::None,
            );
            processor
                .invoke(&session, CMD_GENERATE_KEYPAIR, types, &mut params)
                .context("generating keypair")?;
            let object_id = params.value(0);
            info!(object_id, "keypair generated");
            println!("{object_id}");
        }
        HostCommand::Encrypt { key, data } => {
            let public_key = processor
                .provider()
                .public_key(key)
                .with_context(|| format!("loading public key for object {key}"))?;
            let ciphertext =
                raw_encrypt(&public_key, data.as_bytes()).context("encrypting data")?;
            println!("0x{}", hex::encode(ciphertext));
        }
        HostCommand::Decrypt {
            key,
            ciphertext,
            probe,
        } => {
            let ciphertext_hex = ciphertext.strip_prefix("0x").unwrap_or(&ciphertext);
            let ciphertext = hex::decode(ciphertext_hex).context("decoding hex ciphertext")?;
            let types = ParamTypes::new(
                ParamType::ValueInput,
                ParamType::MemrefInput,
                ParamType::MemrefOutput,
                ParamType::None,
            );

            // probe first so the output buffer is always big enough
            let mut params = Params::new([
                Param::Value(key),
                Param::MemrefIn(&ciphertext),
                Param::MemrefOut(MemrefOut::probe()),
                Param::None,
            ]);
            processor
                .invoke(&session, CMD_DECRYPT_DATA, types, &mut params)
                .context("querying required output size")?;
            let required = params.memref_out(2).len();
            if probe {
                println!("{required}");
                processor.close_session(session);
                return Ok(());
            }

            let mut out_buf = vec![0u8; required];
            let mut params = Params::new([
                Param::Value(key),
                Param::MemrefIn(&ciphertext),
                Param::MemrefOut(MemrefOut::new(&mut out_buf)),
                Param::None,
            ]);
            processor
                .invoke(&session, CMD_DECRYPT_DATA, types, &mut params)
                .context("decrypting")?;
            let written = params.memref_out(2).len();
            println!("0x{}", hex::encode(&out_buf[..written]));
        }
    }

    processor.close_session(session);
    Ok(())
}
