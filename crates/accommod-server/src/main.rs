//! accommod server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, starts the event bus with every recompute handler and serves the
//! JSON API over HTTP.
//!
//! ```text
//! accommod serve          # default
//! accommod migrate        # run pending one-time migration jobs
//! accommod retrigger      # recompute all derived state
//! accommod dead-letters   # print failed deliveries as JSON
//! ```

mod settings;

use std::{path::PathBuf, sync::Arc, time::Duration};

use accommod_api::AppState;
use accommod_core::journal::EventJournal;
use accommod_engine::{
  bus::{EventBus, Publisher, Registry},
  cache::ResourceCache,
  handlers::{self, Context},
  migrate::{self, Migrator},
};
use accommod_store_sqlite::SqliteStore;
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use settings::ServerConfig;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for in-flight events before leaving them to the
/// journal for the next start.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about = "Accommodation derived-state server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
  /// Serve the HTTP API and process events (default).
  Serve,
  /// Run one-time migration jobs not yet recorded, then exit.
  Migrate,
  /// Re-publish the events that recompute every subject's derived state.
  Retrigger,
  /// Print dead-lettered deliveries as JSON.
  DeadLetters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let server_cfg = ServerConfig::load(&cli.config)?;

  let store = SqliteStore::open(&server_cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", server_cfg.store_path))?;
  let store = Arc::new(store);

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(store, &server_cfg).await,
    Command::Migrate => {
      let engine = Engine::start(store.clone(), &server_cfg).await?;
      let applied = Migrator::new(store, engine.publisher.clone(), server_cfg.bus.batch_size)
        .with_default_jobs()
        .run_pending()
        .await
        .context("migration failed")?;
      tracing::info!(applied = applied.len(), "migrations done");
      engine.drain().await;
      Ok(())
    }
    Command::Retrigger => {
      let engine = Engine::start(store.clone(), &server_cfg).await?;
      let subjects = migrate::retrigger_all(store.as_ref(), &engine.publisher, server_cfg.bus.batch_size)
        .await
        .context("re-trigger failed")?;
      tracing::info!(subjects, "re-trigger published");
      engine.drain().await;
      Ok(())
    }
    Command::DeadLetters => {
      let letters = store
        .dead_letters()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to read dead letters")?;
      println!("{}", serde_json::to_string_pretty(&letters)?);
      Ok(())
    }
  }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// The running bus and what producers need to feed it.
struct Engine {
  publisher: Publisher,
  cache:     Arc<ResourceCache>,
  bus:       EventBus,
}

impl Engine {
  /// Spawn the bus with every handler and replay what the journal still
  /// holds from a previous run.
  async fn start(store: Arc<SqliteStore>, server_cfg: &ServerConfig) -> anyhow::Result<Self> {
    let journal: Arc<dyn EventJournal> = store.clone();
    let (publisher, inbox) = Publisher::channel(journal);
    let cache = Arc::new(ResourceCache::new());

    let mut registry = Registry::new();
    handlers::register_all(&mut registry, Context::new(store, publisher.clone()), cache.clone());
    let bus = EventBus::spawn(inbox, registry, server_cfg.bus.clone());

    let replayed = bus.replay_pending().await.context("failed to replay journal")?;
    if replayed > 0 {
      tracing::info!(replayed, "replaying undelivered events");
    }
    Ok(Self { publisher, cache, bus })
  }

  /// Wait for outstanding events, up to [`DRAIN_TIMEOUT`], then stop.
  async fn drain(self) {
    if tokio::time::timeout(DRAIN_TIMEOUT, self.bus.settled()).await.is_err() {
      tracing::warn!(
        outstanding = self.bus.outstanding(),
        "events still in flight; they stay journaled for the next start"
      );
    }
    self.bus.shutdown().await;
  }
}

async fn serve(store: Arc<SqliteStore>, server_cfg: &ServerConfig) -> anyhow::Result<()> {
  let engine = Engine::start(store.clone(), server_cfg).await?;
  let state = AppState::new(store, engine.publisher.clone(), engine.cache.clone());
  let app = accommod_api::api_router(state);

  let address = server_cfg.address();
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
      }
      tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

  engine.drain().await;
  Ok(())
}
