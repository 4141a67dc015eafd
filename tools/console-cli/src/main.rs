//! netconsole: command-line front-end for the NetConsole management server.
//!
//! Stands in for the desktop window: it owns the caller context, drains the
//! completion queue, and talks to the server through one persistent
//! connection.
//!
//! ## Usage
//!
//! ```bash
//! # Log in and remember the credential
//! echo 'secret' | netconsole login --login alice --remember
//!
//! # Issue a request (logs in with the stored credential first)
//! netconsole request list_models
//! netconsole request file_get --params '{"path": "maps/site.json"}'
//!
//! # Follow connectivity for a minute
//! netconsole --endpoint ws://10.0.0.5:8765 watch --seconds 60
//! ```

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console_link::{completion_bridge, ClientConfig, ConsoleClient, CredentialStore};
use console_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};
use tracing::debug;

/// NetConsole command-line client
#[derive(Parser, Debug)]
#[command(name = "netconsole")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint, overrides the config file and NETCONSOLE_ENDPOINT
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Credential record location
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// How long to wait for the first connection, in milliseconds
    #[arg(long, global = true, default_value = "10000")]
    connect_wait_ms: u64,

    /// Print Prometheus metrics on exit
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with a password read from stdin
    Login {
        /// Login name
        #[arg(long)]
        login: String,

        /// Keep the credential for later commands
        #[arg(long)]
        remember: bool,
    },
    /// Issue one request and print the response
    Request {
        /// Action name, e.g. list_models
        action: String,

        /// Action parameters as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Per-request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print connectivity changes as they happen
    Watch {
        #[arg(long, default_value = "30")]
        seconds: u64,
    },
    /// Measure a round trip
    Ping,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _telemetry = init_telemetry(TelemetryConfig::from_env()).context("telemetry setup")?;

    let config = load_config(&args)?;
    let store = credential_store(&args)?;
    debug!(endpoint = %config.endpoint, credentials = %store.path().display(), "Starting");

    let (bridge, mut queue) = completion_bridge();
    let client = ConsoleClient::new(config, bridge).context("invalid client configuration")?;
    let session = commands::Session {
        client: client.clone(),
        store,
        connect_wait: Duration::from_millis(args.connect_wait_ms),
    };

    client.start().context("failed to start client")?;

    let outcome = match args.command {
        Command::Login { login, remember } => session.login(login, remember).await,
        Command::Request {
            action,
            params,
            timeout_ms,
        } => {
            session
                .request(&action, params.as_deref(), timeout_ms.map(Duration::from_millis))
                .await
        }
        Command::Watch { seconds } => {
            session
                .watch(&mut queue, Duration::from_secs(seconds))
                .await
        }
        Command::Ping => session.ping().await,
    };

    tokio::task::block_in_place(|| client.stop());
    queue.run_pending();

    if args.metrics {
        print!("{}", encode_metrics().context("failed to encode metrics")?);
    }

    outcome
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let config = match &args.config {
        Some(path) => ClientConfig::from_toml_file(path)?,
        None => ClientConfig::default(),
    };
    let mut config = config.apply_env();
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    Ok(config)
}

fn credential_store(args: &Args) -> Result<CredentialStore> {
    let path = match &args.credentials {
        Some(path) => path.clone(),
        None => CredentialStore::default_path()
            .context("no platform config directory, pass --credentials")?,
    };
    Ok(CredentialStore::new(path))
}
