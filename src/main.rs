//! Capstan binary entry point.

use std::sync::Arc;

use anyhow::Context;
use prometheus::Registry;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capstan::cli::Cli;
use capstan::{config, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse_args();

    let path = config::resolve_path(args.config.as_deref())?;
    let mut cfg =
        config::load(&path).with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(listen_addr) = args.listen_addr {
        cfg.listen_address = listen_addr;
    }

    init_tracing(args.verbose, cfg.log_level.as_deref());
    info!(config = %path.display(), "configuration loaded");

    let registry = Registry::new();
    let state = Arc::new(server::AppState::from_config(cfg, registry)?);
    server::run(state).await?;
    Ok(())
}

/// Install the global subscriber.
///
/// Precedence: `RUST_LOG` if set, then `-v`/`-vv` flags, then the config
/// file's `log_level`, then `info`.
fn init_tracing(verbosity: u8, config_level: Option<&str>) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = match verbosity {
                0 => config_level.unwrap_or("info"),
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::new(level)
        }
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
