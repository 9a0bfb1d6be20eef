use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

use wirb::PromptMode;
use wirb_server::{Config, RcHooks, Server};

#[derive(Parser, Debug)]
#[command(name = "wirb-server")]
#[command(about = "Serves an interactive wirb console over TCP")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Prompt style: default, simple or null
    #[arg(long)]
    prompt: Option<PromptMode>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Script evaluated at the start of every session
    #[arg(long)]
    rc: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(mode) = cli.prompt {
        config.prompt_mode = mode;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(rc) = cli.rc {
        config.rc_file = Some(rc);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    fmt().with_env_filter(filter).init();

    let hooks = RcHooks::load(config.rc_file.as_deref()).context("cannot read init script")?;
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("cannot listen on {}", config.bind))?;

    let server = Server::new(config.session_options(), Arc::new(hooks));
    server.run(listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
