use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use throttler::config::ThrottlerConfig;
use throttler::ratelimit::{DiscriminatingKey, MemoryStore, Overrides, Throttler};
use throttler::ThrottleError;

/// Fixed-window throttling over an in-memory counter store.
#[derive(Debug, Parser)]
#[command(name = "throttler", version, about)]
struct Cli {
    /// YAML file with limit definitions and engine settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the registered limit definitions
    Limits,

    /// Run a number of throttle calls and print each outcome
    Check {
        /// Handle to throttle
        handle: String,

        /// Discriminating key; integers are keyed as numbers. Repeat to build a sequence key
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Number of calls to make
        #[arg(short = 'n', long, default_value_t = 1)]
        times: u32,

        #[arg(long)]
        threshold: Option<u64>,

        #[arg(long)]
        interval: Option<u64>,

        #[arg(long)]
        increment: Option<u64>,
    },
}

/// Outcome of one `check` call, printed as a JSON line.
#[derive(Debug, Serialize)]
struct CallOutcome {
    call: u32,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottlerConfig::load(cli.config.as_deref())?;
    let engine = config.build_throttler(Arc::new(MemoryStore::new()))?;
    info!(
        limits = engine.registry().len(),
        prefix = %engine.settings().key_prefix,
        "Throttler initialized"
    );

    match cli.command {
        Command::Limits => print_limits(&engine)?,
        Command::Check {
            handle,
            keys,
            times,
            threshold,
            interval,
            increment,
        } => {
            let overrides = Overrides {
                threshold,
                interval,
                increment,
            };
            run_check(&engine, &handle, key_from_args(keys), times, &overrides).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Keys that parse as integers become `Int`, everything else `Str`.
fn key_from_args(keys: Vec<String>) -> DiscriminatingKey {
    let mut parts: Vec<DiscriminatingKey> = keys.into_iter().map(key_part).collect();
    match parts.len() {
        0 => DiscriminatingKey::Absent,
        1 => parts.remove(0),
        _ => DiscriminatingKey::Seq(parts),
    }
}

fn key_part(raw: String) -> DiscriminatingKey {
    match raw.parse::<i64>() {
        Ok(n) => DiscriminatingKey::Int(n),
        Err(_) => DiscriminatingKey::Str(raw),
    }
}

fn print_limits(engine: &Throttler) -> anyhow::Result<()> {
    for handle in engine.registry().handles() {
        if let Some(definition) = engine.registry().get(&handle) {
            let line = serde_json::json!({ "handle": handle, "limit": definition });
            println!("{}", line);
        }
    }
    Ok(())
}

async fn run_check(
    engine: &Throttler,
    handle: &str,
    key: DiscriminatingKey,
    times: u32,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    for call in 1..=times {
        let outcome = match engine.throttle_with(handle, key.clone(), overrides).await {
            Ok(count) => CallOutcome {
                call,
                allowed: true,
                count: Some(count),
                retry_after: None,
                message: None,
            },
            Err(ThrottleError::Exceeded(exceeded)) => CallOutcome {
                call,
                allowed: false,
                count: None,
                retry_after: Some(exceeded.retry_after),
                message: Some(exceeded.to_string()),
            },
            Err(e) => return Err(e.into()),
        };
        println!("{}", serde_json::to_string(&outcome)?);
    }

    let status = engine.status_with(handle, key, overrides).await?;
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}
