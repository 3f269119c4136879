//! 🚀 symx-cli: the front door. Loads config, connects, listens, says goodbye.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! Inbound chat traffic gets logged, which is handy for poking at a pod before
//! a real dataflow host is wired in. Ctrl-C or a dead feed ends the show. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use symx::{Adapter, Presence, SubscribeOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🎛️ Listen to chat rooms and log what people say.
#[derive(Debug, Parser)]
#[command(name = "symx-cli", version)]
struct Cli {
    /// TOML config file, merged over `SYMX_` env vars. The file wins on conflicts.
    #[arg(default_value = "symx.toml")]
    config: PathBuf,

    /// Room to listen to, by name or stream id. Repeatable. None = every room.
    #[arg(long = "room", env = "SYMX_ROOMS", value_delimiter = ',')]
    rooms: Vec<String>,

    /// Posted to each room on the way out.
    #[arg(long)]
    exit_message: Option<String>,

    /// Also log our own messages.
    #[arg(long)]
    include_own: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("certificate")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: the pod isn't reachable. Check the auth host and endpoint URLs, \
                and that the client certificate and CA are the ones the pod expects. \
                `ssl_verify = false` is there for test pods only. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 a missing file is fine when everything comes from the environment
    let config_file = cli
        .config
        .try_exists()
        .with_context(|| format!("💀 could not check for config file '{}'", cli.config.display()))?
        .then_some(cli.config.as_path());
    let app_config = symx::load_config(config_file).context("💀 could not load the config, take a look at the file and the SYMX_ env vars")?;

    let mut adapter = Adapter::connect(app_config).await?;
    let inbound = adapter
        .subscribe(SubscribeOptions {
            rooms: cli.rooms,
            exit_message: cli.exit_message,
            skip_own: !cli.include_own,
        })
        .await?;
    adapter.publish_presence(Presence::Available).await;

    let listener = tokio::spawn(async move {
        while let Ok(batch) = inbound.recv().await {
            for message in batch {
                if message.is_form_submission() {
                    info!("📝 [{}] {} submitted form '{}'", message.room, message.author_display_name, message.form_id);
                } else {
                    info!("💬 [{}] {}: {}", message.room, message.author_display_name, message.body);
                }
            }
        }
    });

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Ctrl-C, wrapping up");
            Ok(())
        }
        closed = adapter.closed() => closed.context("💀 the datafeed is gone"),
    };

    adapter.publish_presence(Presence::Offline).await;
    adapter.shutdown().await?;
    listener.abort();
    outcome
}
