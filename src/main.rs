use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::clock::SystemClock;
use slidegate::config::SlidegateConfig;
use slidegate::{MemoryStore, RateLimiter};

/// Check keys read from stdin, one per line, against a sliding-window limit.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Override the number of buckets per window
    #[arg(long)]
    buckets: Option<u64>,

    /// Override the number of events admitted per window
    #[arg(long)]
    limit: Option<u64>,

    /// Override the store TTL in seconds
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<SlidegateConfig> {
        let mut config = match &self.config {
            Some(path) => SlidegateConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path))?,
            None => SlidegateConfig::default(),
        };

        if let Some(window_secs) = self.window_secs {
            config.limiter.window_secs = window_secs;
        }
        if let Some(buckets) = self.buckets {
            config.limiter.bucket_count = buckets;
        }
        if let Some(limit) = self.limit {
            config.limiter.limit = limit;
        }
        if let Some(ttl_secs) = self.ttl_secs {
            config.store.ttl_secs = ttl_secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct Decision<'a> {
    key: &'a str,
    admitted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing; logs go to stderr so stdout stays machine-readable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Slidegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = args.load_config()?;
    let policy = config.policy()?;
    info!(
        window_secs = policy.window_secs(),
        bucket_secs = policy.bucket_secs(),
        limit = policy.limit(),
        ttl_secs = config.store.ttl_secs,
        "Configuration loaded"
    );

    let (stop_sweeper, stopped) = oneshot::channel::<()>();
    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::with_clock(
        config.store.ttl_secs,
        clock.clone(),
        config.store.sweep_interval(),
        async move {
            let _ = stopped.await;
        },
    ));
    let limiter = RateLimiter::with_clock(policy, store, clock);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            info!("Input closed");
            break;
        };

        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        match limiter.attempt(key).await {
            Ok(admitted) => {
                let mut out = serde_json::to_vec(&Decision { key, admitted })?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            Err(e) => warn!(key = %key, error = %e, "Rate limit check failed"),
        }
    }

    let _ = stop_sweeper.send(());
    info!("Slidegate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
