//! The Monad execution runloop binary.
//!
//! Exit codes: 0 on success, 1 for usage errors, 2 for invalid input
//! blocks, 3 for fatal internal errors.

use alloy_primitives::{Address, U256};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode};
use tracing::error;

mod runloop;
use runloop::{Runloop, RunloopError};

#[derive(Parser)]
#[command(name = "monad", about = "Monad execution runloop", version)]
struct Cli {
    /// Chain id transactions must carry.
    #[arg(long, default_value_t = 1)]
    chain_id: u64,

    /// Directory holding RLP-encoded consensus blocks.
    #[arg(long)]
    ledger_path: PathBuf,

    /// Path of the trie storage pool file.
    #[arg(long)]
    db_path: PathBuf,

    /// Log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute and finalize a number of blocks.
    Run {
        /// How many blocks to execute.
        #[arg(long, default_value_t = 1)]
        blocks: u64,
    },
    /// Overwrite an account balance (local-chain setup).
    SetBalance {
        /// The account address.
        address: Address,
        /// The new balance in wei.
        #[arg(value_parser = parse_u256)]
        balance: U256,
    },
    /// Print an account balance at the head version.
    GetBalance {
        /// The account address.
        address: Address,
    },
    /// Print the committed root of the head version.
    GetStateRoot,
}

fn parse_u256(s: &str) -> Result<U256, String> {
    s.parse::<U256>().map_err(|e| e.to_string())
}

fn init_tracing_subscriber(verbosity_level: u8) {
    let level = match verbosity_level {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Render clap's own help/usage output, but exit 1 for misuse.
            let _ = err.print();
            return if err.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };
    init_tracing_subscriber(cli.verbosity);

    let mut runloop = match Runloop::new(cli.chain_id, &cli.ledger_path, &cli.db_path) {
        Ok(runloop) => runloop,
        Err(err) => {
            error!(target: "runloop", %err, "failed to start");
            return ExitCode::from(3);
        }
    };

    let result = match cli.command {
        Command::Run { blocks } => runloop.run(blocks),
        Command::SetBalance { address, balance } => runloop.set_balance(&address, balance),
        Command::GetBalance { address } => {
            println!("{}", runloop.get_balance(&address));
            Ok(())
        }
        Command::GetStateRoot => {
            println!("{}", runloop.get_state_root());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ RunloopError::InvalidBlock(_)) => {
            error!(target: "runloop", %err, "invalid input block");
            ExitCode::from(2)
        }
        Err(err @ RunloopError::Rejected(_)) => {
            error!(target: "runloop", %err, "block rejected");
            ExitCode::from(2)
        }
        Err(err @ RunloopError::Fatal(_)) => {
            error!(target: "runloop", %err, "fatal error");
            ExitCode::from(3)
        }
    }
}
