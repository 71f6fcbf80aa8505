use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use deckhand_cli::ops::{self, DiscoverResponse};
use deckhand_cli::{DiscoverScope, ProcessStatus, StartOptions, Supervisor, SupervisorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "deckhand",
    version,
    about = "Supervise debuggable GUI application processes and bridge their remote-debugging protocol"
)]
struct Cli {
    /// Log filter, e.g. `info` or `supervisor=debug`.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Probe well-known debugging ports and list managed processes.
    Discover {
        /// One of `managed`, `network`, `all`.
        #[arg(long, default_value = "all")]
        scope: String,
    },
    /// List the inspectable targets served on a debug port.
    Targets {
        #[arg(long)]
        port: u16,
    },
    /// Execute one protocol command against a target on a debug port.
    Exec {
        #[arg(long)]
        port: u16,
        /// Target id; defaults to the first page target.
        #[arg(long)]
        target: Option<String>,
        /// Fully-qualified method, e.g. `Runtime.evaluate`.
        #[arg(long)]
        method: String,
        /// Command parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Start an app, tail its log buffer until Ctrl-C, then stop it.
    Run {
        app: PathBuf,
        #[arg(long)]
        port: Option<u16>,
        /// Reload automatically after abnormal exits.
        #[arg(long)]
        reconnect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .with_target(true)
        .init();

    let supervisor = Supervisor::new(SupervisorConfig::from_env());

    match cli.command {
        CliCommand::Discover { scope } => {
            let scope = parse_scope(&scope)?;
            let response: DiscoverResponse = ops::discover_apps(&supervisor, scope).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        CliCommand::Targets { port } => {
            let timeout = supervisor.config().discovery_timeout;
            let targets = cdp_bridge::fetch_targets(port, timeout)
                .await
                .with_context(|| format!("no target list on port {port}"))?;
            println!("{}", serde_json::to_string_pretty(&targets)?);
        }
        CliCommand::Exec {
            port,
            target,
            method,
            params,
        } => {
            let (domain, command) = method
                .split_once('.')
                .ok_or_else(|| anyhow!("method must look like Domain.command"))?;
            let params: serde_json::Value =
                serde_json::from_str(&params).context("params must be a JSON document")?;

            let record = supervisor.adopt(port).await?;
            let target_id = match target {
                Some(id) => id,
                None => {
                    let targets = record.cached_targets().await;
                    targets
                        .iter()
                        .find(|t| t.kind == "page")
                        .or_else(|| targets.first())
                        .map(|t| t.id.clone())
                        .ok_or_else(|| anyhow!("port {port} exposes no targets"))?
                }
            };

            let result = supervisor
                .execute(record.id.as_str(), &target_id, domain, command, params)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        CliCommand::Run {
            app,
            port,
            reconnect,
        } => {
            let record = supervisor
                .start(
                    &app,
                    StartOptions {
                        debug_port: port,
                        reconnect,
                    },
                )
                .await?;
            let id = record.id.as_str().to_string();
            println!(
                "started {} on debug port {} (Ctrl-C to stop)",
                id, record.debug_port
            );

            let mut printed = 0usize;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }

                let Ok(snapshot) = supervisor.logs(&id, false) else {
                    break;
                };
                for entry in snapshot.entries.iter().skip(printed) {
                    println!(
                        "[{:?}/{:?}] {} {}",
                        entry.category, entry.level, entry.source, entry.message
                    );
                }
                printed = snapshot.entries.len();

                if record.status() != ProcessStatus::Running && !reconnect {
                    println!("process left running state: {:?}", record.status());
                    break;
                }
            }

            supervisor.stop(&id).await;
            supervisor.shutdown().await;
        }
    }

    Ok(())
}

fn parse_scope(raw: &str) -> Result<DiscoverScope> {
    match raw {
        "managed" => Ok(DiscoverScope::Managed),
        "network" => Ok(DiscoverScope::Network),
        "all" => Ok(DiscoverScope::All),
        other => bail!("unknown scope {other:?} (expected managed, network or all)"),
    }
}
