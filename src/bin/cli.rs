use std::{net::SocketAddr, process::exit};

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use serde_json::json;

use replikv::{NodeClient, Result};

const DEFAULT_ADDR: &str = "127.0.0.1:4001";

/// Args for replikv-cli
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ClientArgs {
    /// Subcommand
    #[clap(subcommand)]
    command: Commands,
}

/// Enum type of subcommand for replikv-cli
#[derive(Debug, Subcommand)]
enum Commands {
    /// Store a value under an integer key
    Set {
        /// Key
        key: i64,
        /// Value; integers, floats and booleans are sent typed,
        /// anything else as a string
        value: String,
        /// Node address, default is 127.0.0.1:4001
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
    /// Fetch the value stored under an integer key
    Get {
        /// Key
        key: i64,
        /// Node address, default is 127.0.0.1:4001
        #[clap(short, long, value_parser)]
        addr: Option<SocketAddr>,
    },
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = ClientArgs::parse();

    match cli.command {
        Commands::Set { key, value, addr } => {
            let addr = addr.unwrap_or(DEFAULT_ADDR.parse().unwrap());
            let mut client = NodeClient::connect(addr)?;
            let reply = client.set(key, sniff_value(&value))?;
            println!("{}", reply);
        }

        Commands::Get { key, addr } => {
            let addr = addr.unwrap_or(DEFAULT_ADDR.parse().unwrap());
            let mut client = NodeClient::connect(addr)?;
            let result = client.get(key)?;
            let value: serde_json::Value = serde_json::from_slice(&result.value)?;
            println!("{} (from {})", value, result.source);
        }
    }

    Ok(())
}

/// Mirror the loose typing of the interactive client: values that parse
/// as an integer, float or boolean are sent as such.
fn sniff_value(raw: &str) -> serde_json::Value {
    if let Ok(n) = raw.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return json!(f);
    }
    if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        return json!(raw.eq_ignore_ascii_case("true"));
    }
    json!(raw)
}
