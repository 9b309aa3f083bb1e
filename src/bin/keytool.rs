//! # keytool
//!
//! Operator tooling for encrypted API-key files. Run ahead of deployment:
//!
//! ```text
//! MICROKIT_KEY_PASSPHRASE=... keytool encrypt keys.txt keys.enc
//! MICROKIT_KEY_PASSPHRASE=... keytool decrypt keys.enc
//! ```
//!
//! The passphrase comes from the environment only — passing secrets as CLI
//! arguments leaks them through the process table and shell history.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use microkit::crypto;

/// Encrypt and inspect microkit API-key files.
#[derive(Parser)]
#[command(name = "keytool", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a newline-delimited key file.
    Encrypt {
        /// Plaintext key file, one key per line.
        src: PathBuf,
        /// Destination for the armored ciphertext.
        dst: PathBuf,
    },
    /// Decrypt a key file and print the plaintext to stdout.
    Decrypt {
        /// Encrypted key file.
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Ok(passphrase) = std::env::var(crypto::PASSPHRASE_ENV) else {
        eprintln!("error: {} is not set", crypto::PASSPHRASE_ENV);
        return ExitCode::FAILURE;
    };

    let result = match cli.command {
        Commands::Encrypt { src, dst } => {
            crypto::encrypt_file(&src, &dst, &passphrase).map(|()| {
                eprintln!("encrypted {} -> {}", src.display(), dst.display());
            })
        }
        Commands::Decrypt { path } => crypto::decrypt_file(&path, &passphrase).map(|plaintext| {
            print!("{plaintext}");
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
