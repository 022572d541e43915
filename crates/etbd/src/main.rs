//! Daemon entry point.
//!
//! Flag handling, configuration precedence (home config, cwd config,
//! `--conf` file, then flags), logging setup and node startup. Exit code is
//! zero on normal shutdown; any startup failure exits non-zero through the
//! anyhow error path.

use anyhow::Result;
use clap::Parser;
use etb_core::config::EtbConfig;
use etbd::{node::Node, server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "etbd", about = "Evidential tool bus node daemon", version)]
struct Args {
    /// Address to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Extra configuration file, read after the discovered ones.
    #[arg(long)]
    conf: Option<PathBuf>,

    /// Log file; stderr when unset.
    #[arg(long)]
    log: Option<String>,

    /// Directory of tool wrapper manifests.
    #[arg(long)]
    wrappers_dir: Option<String>,

    /// Rule file to load at startup; repeatable.
    #[arg(long = "rule-files", value_name = "FILE")]
    rule_files: Vec<String>,
}

impl Args {
    /// Command-line arguments override file settings field by field.
    fn apply(self, config: &mut EtbConfig) {
        if let Some(host) = self.host {
            config.etb.host = host;
        }
        if let Some(port) = self.port {
            config.etb.port = port;
        }
        if let Some(log) = self.log {
            config.etb.log = Some(log);
        }
        if let Some(dir) = self.wrappers_dir {
            config.etb.wrappers_dir = Some(dir);
        }
        if !self.rule_files.is_empty() {
            config.etb.rule_files = self.rule_files;
        }
    }
}

fn init_logging(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "etbd=info,etb_core=info".into()),
    );
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        eprintln!("[!!!] panic in etbd at {}: {}", location, panic_info);
        default_hook(panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_hook();
    let args = Args::parse();
    let mut config = EtbConfig::load(args.conf.as_deref());
    args.apply(&mut config);
    init_logging(config.etb.log.as_deref())?;

    tracing::info!("etbd v{}", env!("CARGO_PKG_VERSION"));
    let node = Node::start(config)?;
    node.spawn_ping_loop();
    server::run(node).await
}
