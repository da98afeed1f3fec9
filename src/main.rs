use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use slidewin::config::SlidewinConfig;
use slidewin::{logging, Counter, RateLimiter, RollingWindow};

/// Drive a rolling window with concurrent callers and report its totals.
#[derive(Debug, Parser)]
#[command(name = "slidewin", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// How long to run before stopping the window
    #[arg(long, default_value_t = 10, global = true)]
    seconds: u64,

    /// Number of concurrent callers
    #[arg(long, default_value_t = 5, global = true)]
    workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Request admission from a rate limiter
    Limiter,
    /// Add to a windowed counter
    Counter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SlidewinConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging)?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        window_ms = config.window.window_ms,
        num_buckets = config.window.num_buckets,
        "Configuration loaded"
    );

    let window = config.window.build();
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    match cli.command {
        Command::Limiter => {
            let limiter = Arc::new(config.limiter.build());
            window.add_metric(limiter.clone())?;
            window.start()?;
            spawn_acquirers(&mut tasks, &limiter, cli.workers, &shutdown);
        }
        Command::Counter => {
            let counter = Arc::new(Counter::new());
            window.add_metric(counter.clone())?;
            window.start()?;
            spawn_adders(&mut tasks, &counter, cli.workers, &shutdown);
        }
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.seconds)) => {
            info!(seconds = cli.seconds, "Run finished");
        }
        _ = shutdown_signal() => {}
    }

    shutdown.cancel();
    while tasks.join_next().await.is_some() {}
    stop(&window).await?;

    Ok(())
}

async fn stop(window: &RollingWindow) -> anyhow::Result<()> {
    window.stop()?;
    window.join().await;
    info!(rotations = window.rotations(), "Rolling window drained");
    Ok(())
}

/// Random pause between calls, 10..30ms.
fn caller_period() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(10..30))
}

fn spawn_acquirers(
    tasks: &mut JoinSet<()>,
    limiter: &Arc<RateLimiter>,
    workers: usize,
    shutdown: &CancellationToken,
) {
    let admitted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));

    for worker in 0..workers {
        let limiter = Arc::clone(limiter);
        let admitted = Arc::clone(&admitted);
        let rejected = Arc::clone(&rejected);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let period = caller_period();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(period) => {
                        let (ok, value) = limiter.acquire();
                        debug!(worker = worker, admitted = ok, value = value, "Acquire");
                        if ok {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        } else {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        });
    }

    let limiter = Arc::clone(limiter);
    let shutdown = shutdown.clone();
    tasks.spawn(report(shutdown, move |second| {
        info!(
            second = second,
            total = limiter.total(),
            admitted = admitted.load(Ordering::Relaxed),
            rejected = rejected.load(Ordering::Relaxed),
            "Limiter window total"
        );
    }));
}

fn spawn_adders(
    tasks: &mut JoinSet<()>,
    counter: &Arc<Counter>,
    workers: usize,
    shutdown: &CancellationToken,
) {
    for _ in 0..workers {
        let counter = Arc::clone(counter);
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let period = caller_period();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(period) => {
                        counter.add(1);
                    }
                }
            }
        });
    }

    let counter = Arc::clone(counter);
    let shutdown = shutdown.clone();
    tasks.spawn(report(shutdown, move |second| {
        info!(second = second, total = counter.total(), "Counter window total");
    }));
}

/// Call `emit` once per second until cancelled.
async fn report<F>(shutdown: CancellationToken, emit: F)
where
    F: Fn(u64) + Send + 'static,
{
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    let mut second = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                second += 1;
                emit(second);
            }
        }
    }
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
            info!("Received Ctrl+C, stopping early");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping early");
        }
    }
}
