use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docflow_guard::config::GuardConfig;
use docflow_guard::ratelimit::RateLimiter;

#[derive(Parser)]
#[command(name = "docflow-guard", version, about = "Rate limiting and realtime feed tooling for DocFlow")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a realtime endpoint and print every message as a JSON line
    Watch {
        /// Endpoint to connect to; overrides `realtime.url`
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the effective rate limit policies as YAML
    Policies,
    /// Push requests through a policy and print each decision
    Simulate {
        #[arg(long)]
        policy: String,
        #[arg(long)]
        identifier: String,
        #[arg(long, default_value_t = 1)]
        requests: u64,
        /// Pause between requests, letting windows expire and be swept
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GuardConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level, cli.json_logs || config.logging.json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Watch { url } => watch(&config, url).await,
        Command::Policies => policies(&config),
        Command::Simulate {
            policy,
            identifier,
            requests,
            delay_ms,
        } => simulate(&config, &policy, &identifier, requests, Duration::from_millis(delay_ms)).await,
    }
}

/// Logs go to stderr so stdout carries only command output.
fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn watch(config: &GuardConfig, url: Option<String>) -> anyhow::Result<()> {
    let url = url
        .or_else(|| config.realtime.url.clone())
        .context("No realtime URL; pass --url or set realtime.url")?;

    let connection = config.realtime.connection_builder(url).spawn()?;
    if !config.realtime.auto_connect {
        // The watch command always needs an open connection
        connection.connect();
    }
    let mut messages = connection.subscribe();

    let stop = termination();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            signal = &mut stop => {
                let signal = signal.context("Failed to listen for termination signals")?;
                info!(signal = signal, "Stopping watch");
                break;
            }
            received = messages.recv() => match received {
                Ok(message) => println!("{}", serde_json::to_string(&message)?),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Output fell behind the feed; messages skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    connection.shutdown().await;
    info!("Watch stopped");
    Ok(())
}

fn policies(config: &GuardConfig) -> anyhow::Result<()> {
    let set = config.rate_limiting.policy_set()?;
    print!("{}", serde_yaml::to_string(&set)?);
    Ok(())
}

async fn simulate(
    config: &GuardConfig,
    name: &str,
    identifier: &str,
    requests: u64,
    delay: Duration,
) -> anyhow::Result<()> {
    let set = config.rate_limiting.policy_set()?;
    let policy = set
        .get(name)
        .with_context(|| format!("Unknown policy {:?}", name))?;

    let limiter = Arc::new(RateLimiter::new());
    let (stop_sweeper, sweeper_shutdown) = watch::channel(());
    let sweeper = config.rate_limiting.spawn_sweeper(limiter.clone(), sweeper_shutdown);

    for request in 1..=requests {
        if request > 1 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let decision = limiter.consume_policy(policy, identifier)?;
        let headers: BTreeMap<String, String> = decision
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();

        let line = json!({
            "request": request,
            "allowed": decision.allowed,
            "count": decision.count,
            "limit": decision.limit,
            "remaining": decision.remaining,
            "resetAt": decision.reset_at().to_rfc3339(),
            "retryAfter": decision.retry_after_seconds,
            "headers": headers,
        });
        println!("{}", line);
    }

    let _ = stop_sweeper.send(());
    sweeper.await?;
    Ok(())
}

/// Resolves with the name of the first termination signal delivered.
async fn termination() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| "SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}
