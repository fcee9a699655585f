//! # Detour CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run the agent with a primary and one mirror
//! detour serve -b 127.0.0.1:8080 -e https://app.example -e https://mirror.example
//!
//! # Load settings from a file, overriding the version tag
//! detour serve --config agent.json --version-tag 2024.06.1
//!
//! # Talk to a running agent (outputs raw JSON)
//! detour version http://127.0.0.1:8080
//! detour sweep http://127.0.0.1:8080 | jq '.domains'
//! detour purge http://127.0.0.1:8080
//! detour activate http://127.0.0.1:8080
//! ```
//!
//! ## URL Format
//!
//! All URLs must include the `http://` or `https://` prefix:
//! - ✅ `http://127.0.0.1:8080`
//! - ✅ `https://app.example`
//! - ❌ `127.0.0.1:8080`

use anyhow::Result;
use argh::FromArgs;
use detour_cli::{resolve_config, run_control, ServeOverrides};
use detour_common::ControlMessage;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(FromArgs)]
/// detour: client-side failover agent
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Version(VersionArgs),
    Sweep(SweepArgs),
    Purge(PurgeArgs),
    Activate(ActivateArgs),
}

/// Arguments for running the agent.
///
/// # Example
///
/// ```bash
/// detour serve -b 0.0.0.0:8080 \
///   -e https://app.example \
///   -e https://eu.app.example \
///   --ttl-secs 60
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the detour agent as an HTTP proxy
struct ServeArgs {
    /// address to bind the agent's HTTP server to
    #[argh(option, short = 'b', default = "\"127.0.0.1:8080\".into()")]
    bind: String,

    /// candidate endpoint origins in priority order
    ///
    /// Can be specified multiple times; the first is the primary.
    /// Must include the http:// or https:// prefix.
    #[argh(option, short = 'e', long = "endpoint")]
    endpoints: Vec<String>,

    /// origin of the application (defaults to the primary endpoint)
    #[argh(option, long = "origin")]
    origin: Option<String>,

    /// version tag used to name this deployment's cache
    ///
    /// Overrides DETOUR_VERSION and the config file.
    #[argh(option, long = "version-tag")]
    version_tag: Option<String>,

    /// directory for on-disk caches (in-memory when unset)
    #[argh(option, long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// path probed on each endpoint (default /favicon.ico)
    #[argh(option, long = "health-path")]
    health_path: Option<String>,

    /// seconds a health verdict is trusted (default 300)
    #[argh(option, long = "ttl-secs")]
    ttl_secs: Option<u64>,

    /// timeout for a single probe in milliseconds (default 5000)
    #[argh(option, long = "probe-timeout-ms")]
    probe_timeout_ms: Option<u64>,

    /// also fail over for localhost and private-network origins
    #[argh(switch, long = "no-bypass-local")]
    no_bypass_local: bool,

    /// path to a JSON configuration file
    #[argh(option, long = "config")]
    config: Option<PathBuf>,
}

impl From<ServeArgs> for ServeOverrides {
    fn from(args: ServeArgs) -> Self {
        ServeOverrides {
            config: args.config,
            origin: args.origin,
            endpoints: args.endpoints,
            version: args.version_tag,
            cache_dir: args.cache_dir,
            health_path: args.health_path,
            ttl_secs: args.ttl_secs,
            probe_timeout_ms: args.probe_timeout_ms,
            no_bypass_local: args.no_bypass_local,
        }
    }
}

#[derive(FromArgs)]
#[argh(subcommand, name = "version")]
/// print the version tag of a running agent
struct VersionArgs {
    /// address of the agent, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    agent_address: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "sweep")]
/// probe every endpoint now and print their availability
struct SweepArgs {
    /// address of the agent, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    agent_address: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "purge")]
/// clear the agent's health records and caches
struct PurgeArgs {
    /// address of the agent, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    agent_address: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "activate")]
/// make the agent's version take over immediately
struct ActivateArgs {
    /// address of the agent, e.g. http://127.0.0.1:8080
    #[argh(positional)]
    agent_address: String,
}

impl Commands {
    /// The control message and target of a one-shot command.
    fn control(&self) -> Option<(&str, ControlMessage)> {
        let (address, message) = match self {
            Commands::Serve(_) => return None,
            Commands::Version(args) => (&args.agent_address, ControlMessage::VersionQuery),
            Commands::Sweep(args) => (&args.agent_address, ControlMessage::EndpointSweep),
            Commands::Purge(args) => (&args.agent_address, ControlMessage::Purge),
            Commands::Activate(args) => (&args.agent_address, ControlMessage::ForceActivate),
        };
        Some((address.as_str(), message))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Control commands keep stdout clean for piping into other tools.
    if let Some((agent_address, message)) = cli.command.control() {
        if let Some(reply) = run_control(agent_address, message).await? {
            println!("{}", reply);
        }
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        _ => Ok(()),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {}", args.bind, e))?;

    let config = resolve_config(args.into(), |key| std::env::var(key).ok())?;
    tracing::info!("Starting detour agent {}", config.version);
    tracing::info!("Endpoints: {:?}", config.candidates);

    let agent = Arc::new(detour_agent::Agent::new(config).await?);
    let report = agent.start().await?;
    tracing::info!(
        "Activated cache {} ({} stale removed)",
        agent.lifecycle().namespace().name,
        report.deleted.len()
    );

    detour_agent::HttpServer::new(agent).run(addr).await?;

    Ok(())
}
