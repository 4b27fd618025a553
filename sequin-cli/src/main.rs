mod server;
mod handlers;

use std::sync::{Arc, Mutex};
use std::thread;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sequin_core::client::LocalCoordinator;
use sequin_core::RecipeError;

type DemoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(
    name = "sequin",
    about = "Fair locks and FIFO queues over sequential coordination nodes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sequin HTTP coordination server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3200")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "memory" or "sqlite:<path>"
        #[arg(long, default_value = "memory", env = "SEQUIN_STORAGE")]
        storage: String,

        /// Maximum concurrent requests on the lock routes
        #[arg(long, default_value = "64", env = "SEQUIN_MAX_LOCK_REQUESTS")]
        max_lock_requests: usize,
    },

    /// Run N contenders against one lock and print the grant order
    DemoLock {
        /// Number of contending threads
        #[arg(short, long, default_value = "5")]
        contenders: usize,

        /// Lock directory to contend on
        #[arg(long, default_value = "/locks/demo")]
        dir: String,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            max_lock_requests,
        } => {
            if let Err(e) = server::run(&host, port, &storage, max_lock_requests.max(1)).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::DemoLock { contenders, dir } => {
            let result = tokio::task::spawn_blocking(move || demo_lock(contenders, &dir)).await;
            match result {
                Ok(Ok(order)) => {
                    for (turn, contender) in order.iter().enumerate() {
                        println!("grant {:>3}: contender {}", turn + 1, contender);
                    }
                }
                Ok(Err(e)) => {
                    eprintln!("demo failed: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("demo task failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Version => {
            println!("sequin {}", env!("CARGO_PKG_VERSION"));
            println!("Fair distributed lock and FIFO queue recipes");
        }
    }
}

/// Contenders queue up one at a time while the first grant is held, so the
/// printed order is their arrival order.
fn demo_lock(contenders: usize, dir: &str) -> DemoResult<Vec<usize>> {
    let coordinator = LocalCoordinator::new();
    let order = Arc::new(Mutex::new(Vec::with_capacity(contenders)));

    let mut gate = coordinator.fair_lock(coordinator.connect(), dir)?;
    gate.acquire()?;

    let mut handles = Vec::with_capacity(contenders);
    for contender in 1..=contenders {
        let mut lock = coordinator.fair_lock(coordinator.connect(), dir)?;
        // Take a place in line before the next contender starts.
        lock.try_acquire()?;
        tracing::info!(contender, node = ?lock.node_path(), "contender queued");

        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || -> Result<(), RecipeError> {
            lock.acquire()?;
            if let Ok(mut order) = order.lock() {
                order.push(contender);
            }
            lock.unlock()
        }));
    }

    gate.unlock()?;
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => return Err("contender thread panicked".into()),
        }
    }

    let order = order.lock().map(|order| order.clone()).unwrap_or_default();
    Ok(order)
}
