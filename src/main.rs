mod cache;
mod clients;
mod config;
mod net;
mod notify;
mod server;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::{CacheLayer, CacheStorage, SqliteStorage};
use crate::clients::ClientRegistry;
use crate::config::Config;
use crate::net::HttpNetwork;
use crate::notify::LogNotifier;
use crate::sync::SqliteSyncStore;
use crate::worker::{delete_stale_partitions, Collaborators, EventLoop, Worker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline-first caching agent for a web application")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./swcache.yaml or $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also write logs to a daily rotated file in this directory
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate and serve requests until interrupted
  Serve,
  /// List cache partitions and their entry counts
  Partitions,
  /// Delete partitions that do not belong to the configured version
  Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_dir.as_deref());

  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Serve => serve(config).await,
    Command::Partitions => list_partitions(&config),
    Command::Purge => purge(&config),
  }
}

/// Log to stderr, filtered by `SWCACHE_LOG` (default `info`), and optionally
/// to a rolling file. The returned guard must live as long as logging does.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env("SWCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "swcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_ansi(false).with_writer(writer)),
        Some(guard),
      )
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  guard
}

async fn serve(config: Config) -> Result<()> {
  let db_path = config.database_path()?;
  let clients = Arc::new(ClientRegistry::new());
  let collaborators = Collaborators {
    network: Arc::new(HttpNetwork::new()?),
    clients: clients.clone(),
    notifier: Arc::new(LogNotifier),
    sync_store: Arc::new(SqliteSyncStore::open(&db_path)?),
  };

  let listener = TcpListener::bind(&config.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.listen, e))?;
  let origin = config.origin_url()?;

  let worker = Worker::new(config, SqliteStorage::open(&db_path)?, collaborators)?;
  let events = EventLoop::spawn(worker);
  let sender = events.sender();
  sender.install().await?;
  sender.activate().await?;

  let state = server::AppState {
    events: sender,
    clients,
    origin,
  };
  server::serve(listener, state, async {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
  })
  .await?;

  events.shutdown().await
}

fn list_partitions(config: &Config) -> Result<()> {
  let storage = SqliteStorage::open(&config.database_path()?)?;
  let names = config.cache_names();

  for name in storage.partition_names()? {
    let entries = storage.keys(&name)?.len();
    let status = if names.is_current(&name) {
      "current"
    } else {
      "stale"
    };
    println!("{:<48} {:>6} entries  {}", name, entries, status);
  }

  Ok(())
}

fn purge(config: &Config) -> Result<()> {
  let cache = CacheLayer::new(SqliteStorage::open(&config.database_path()?)?);
  let deleted = delete_stale_partitions(&cache, &config.cache_names())?;

  if deleted.is_empty() {
    println!("No stale partitions");
  }
  for name in deleted {
    println!("Deleted {}", name);
  }

  Ok(())
}
