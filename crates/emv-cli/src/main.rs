use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod formatters;
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "emv-terminal")]
#[command(about = "EMV terminal - certificate trust store and transaction preparation")]
#[command(version)]
struct Args {
    /// Output format mode
    #[arg(short, long, value_enum, default_value_t = FormatMode::Human, global = true)]
    format: FormatMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a CA public key file and list its keys
    Keys {
        /// Trust anchor JSON file
        #[arg(short, long)]
        trust_store: PathBuf,

        /// Only list keys of this RID (10 hex digits)
        #[arg(long)]
        rid: Option<String>,
    },

    /// Run a transaction against the card in the first PC/SC reader
    Transact {
        /// Trust anchor JSON file; without it offline data authentication is not performed
        #[arg(short, long)]
        trust_store: Option<PathBuf>,

        /// Terminal configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Amount, authorised in minor units
        #[arg(short, long)]
        amount: u64,

        /// Application to select (hex); tries the known payment AIDs otherwise
        #[arg(long)]
        aid: Option<String>,

        /// Merchant forces the transaction online
        #[arg(long)]
        force_online: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug shows every decision the terminal takes, trace adds APDUs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Keys { trust_store, rid } => commands::keys::cmd_keys(&trust_store, rid.as_deref(), args.format),
        Command::Transact {
            trust_store,
            config,
            amount,
            aid,
            force_online,
        } => commands::cmd_transact(
            commands::TransactOptions {
                trust_store,
                config,
                amount,
                aid,
                force_online,
            },
            args.format,
        ),
    }
}
