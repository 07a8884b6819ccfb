//! relaymesh-cli — a small operator tool for probing a running relay instance
//!
//! Command-line interface for interacting with a `relaymeshd` instance.

use clap::{Parser, Subcommand};

/// relaymesh-cli — command-line interface for the relay fabric.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// `POST /ping` against an instance, to confirm it is answering.
    Ping {
        /// `host:port` of the instance to probe.
        addr: String,
    },
    /// `POST /getuniversalid` against an instance, printing the carved CustomerID, if any.
    GetUniversalId {
        /// `host:port` of the instance to probe.
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        Command::Ping { addr } => {
            let response = client.post(format!("http://{addr}/ping")).send().await?;
            println!("{}", response.status());
        }
        Command::GetUniversalId { addr } => {
            let response = client.post(format!("http://{addr}/getuniversalid")).send().await?;
            match response.headers().get("x-iwp-productunivid") {
                Some(value) => println!("{}", value.to_str().unwrap_or("<non-ascii>")),
                None => println!("no CustomerID range available"),
            }
        }
    }

    Ok(())
}
