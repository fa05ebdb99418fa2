//! Confab session broker

#![forbid(unsafe_code)]

mod logging;

use anyhow::Context;
use clap::{Parser, Subcommand};

use confab_broker::{Broker, BrokerConfig};

#[derive(Parser)]
#[command(name = "confab")]
#[command(version, about = "Session broker for real-time collaborative editing")]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker
    Start {
        /// Port to listen on
        #[arg(long, default_value_t = 8100)]
        port: u16,

        /// Hostname to bind
        #[arg(long, default_value = "localhost")]
        hostname: String,

        /// Externally reachable base URL used in login links
        #[arg(long, env = "CONFAB_PUBLIC_URL")]
        public_url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Start { port, hostname, public_url } => {
            serve(BrokerConfig { hostname, port, public_url }).await
        }
    };

    if let Err(err) = result {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

async fn serve(config: BrokerConfig) -> anyhow::Result<()> {
    let broker = Broker::new(config);
    let addr = broker.config().bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "broker listening");

    axum::serve(listener, confab_broker::router(broker))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("broker stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Errors here mean no signal handler could be installed; run until killed.
    let _ = tokio::signal::ctrl_c().await;
}
