//! etbsh - the interactive shell for an evidential tool bus node.
//!
//! Usage:
//!   etbsh                         REPL against the local daemon
//!   etbsh --host h --port p       REPL against a remote daemon
//!   etbsh script.etb              run a script, then enter the REPL
//!   etbsh --batch script.etb      run a script and exit

mod client;
mod repl;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "etbsh", about = "Evidential tool bus shell", version)]
struct Args {
    /// Daemon address.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port.
    #[arg(long, default_value_t = 26532)]
    port: u16,

    /// Run the script and exit instead of entering the REPL.
    #[arg(long)]
    batch: bool,

    /// Script executed before the prompt.
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "etbsh=warn".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false),
        )
        .init();

    let args = Args::parse();
    let client = client::RpcClient::connect(&args.host, args.port).await?;
    let mut repl = repl::Repl::new(client);

    if let Some(script) = &args.script {
        repl.run_script(script).await?;
        if args.batch {
            return Ok(());
        }
    } else if args.batch {
        anyhow::bail!("--batch requires a script file");
    }

    repl.run_interactive().await
}
