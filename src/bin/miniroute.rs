//! Discovery node binary

use clap::{Parser, Subcommand};
use miniroute::common::{parse_duration, StoreBackend};
use miniroute::coordination::connector_for;
use miniroute::discovery::AdminStatus;
use miniroute::{Config, DiscoveryNode};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "miniroute")]
#[command(about = "Service discovery and client-side load balancing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a discovery node on the configured store
    Serve {
        /// TOML config file (MINIROUTE__* env vars override it)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Admin HTTP bind address
        #[arg(long)]
        bind: Option<String>,

        /// Watch retry backoff, e.g. 500ms or 5s
        #[arg(long)]
        watch_retry: Option<String>,
    },

    /// Print the status of a running node
    Status {
        /// Admin endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:7070")]
        admin: String,

        /// Request timeout, e.g. 2s
        #[arg(long, default_value = "5s")]
        timeout: String,
    },
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            watch_retry,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.admin.bind_addr = bind.parse()?;
            }
            if let Some(retry) = watch_retry {
                let retry = parse_duration(&retry)?;
                let retry_ms = u64::try_from(retry.as_millis())
                    .map_err(|_| anyhow::anyhow!("watch retry out of range: {:?}", retry))?;
                if let Some(monitor) = config.monitor.as_mut() {
                    monitor.watch_retry_ms = retry_ms;
                }
            }
            config.validate()?;
            init_tracing(&config.log_level);

            if config.store.backend == StoreBackend::Memory {
                tracing::warn!(
                    "Running on the in-process store; state is not shared with other nodes"
                );
            }
            let connector = connector_for(&config.store)?;
            let node = DiscoveryNode::new(config, connector);
            node.serve().await?;
        }

        Commands::Status { admin, timeout } => {
            init_tracing("warn");
            let client = reqwest::Client::builder()
                .timeout(parse_duration(&timeout)?)
                .build()?;
            let url = format!("{}/admin/status", admin.trim_end_matches('/'));
            let status: AdminStatus = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_status(&status);
        }
    }

    Ok(())
}

fn print_status(status: &AdminStatus) {
    println!("miniroute {}", status.version);

    match &status.registrar {
        Some(registrar) => {
            println!("\nRegistrar {}", registrar.path);
            for addr in &registrar.registered {
                println!("  {}", addr);
            }
        }
        None => println!("\nRegistrar: not configured"),
    }

    match &status.monitor {
        Some(monitor) => {
            println!("\nMonitor {}", monitor.path);
            println!("  Available:    {}", monitor.avail_addrs);
            println!("  Changes:      {}", monitor.addr_changes);
            if let Some(ts) = monitor.last_change_ms {
                let when = chrono::DateTime::from_timestamp_millis(ts)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| ts.to_string());
                println!("  Last change:  {}", when);
            }
            for handle in &monitor.handles {
                println!(
                    "  {} {:<24} enable={} disable={} alloc={} [{}]",
                    if handle.valid { "✓" } else { "✗" },
                    handle.addr,
                    handle.enable_count,
                    handle.disable_count,
                    handle.alloc_count,
                    handle.backend_status
                );
            }
        }
        None => println!("\nMonitor: not configured"),
    }
}
