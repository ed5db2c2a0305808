//! cli
//!
//! Command-line interface layer for Capstan.
//!
//! The CLI is thin: it parses flags, overlays `CAPSTAN_*` environment
//! variables onto flags that were not given explicitly, and hands off to
//! `main`. All behavior lives behind the config and server layers.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

/// Flags that may also be supplied as `CAPSTAN_<FLAG>` environment
/// variables. Kept to an allowlist so unrelated `CAPSTAN_*` variables
/// (e.g. those referenced by `env:` config indirection) don't turn into
/// unknown flags.
const ENV_FLAGS: &[&str] = &["config", "listen-addr"];

/// Capstan - webhook server that bumps image tags in GitOps manifests
#[derive(Parser, Debug)]
#[command(name = "capstan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default is $HOME/.capstan.toml or /etc/capstan.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the configured HTTP listen address
    #[arg(short, long)]
    pub listen_addr: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse command-line arguments with the environment overlay applied.
    ///
    /// A flag given on the command line always wins over its environment
    /// variable.
    pub fn parse_args() -> Self {
        let args = std::env::args_os().collect();
        let env: Vec<(String, String)> = std::env::vars().collect();
        Self::parse_from_with_env(args, &env)
    }

    fn parse_from_with_env(mut args: Vec<OsString>, env: &[(String, String)]) -> Self {
        for (key, value) in env {
            let Some(suffix) = key.strip_prefix("CAPSTAN_") else {
                continue;
            };
            let flag = format!("--{}", suffix.to_ascii_lowercase().replace('_', "-"));
            if !ENV_FLAGS.contains(&&flag[2..]) {
                continue;
            }
            let already_given = args
                .iter()
                .any(|arg| arg.to_string_lossy().split('=').next() == Some(flag.as_str()));
            if !already_given {
                args.push(flag.clone().into());
                args.push(value.into());
            }
        }
        Self::parse_from(args)
    }
}
