//! cadence server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), layers
//! `CADENCE_*` environment variables on top, opens the SQLite store, starts
//! the sync scheduler and serves the admin API until interrupted.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash`:
//!
//! ```text
//! cargo run -p cadence-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use cadence_clients::{SlackClient, SpotifyClient, http_client};
use cadence_server::{AppState, ServerConfig, auth::AuthConfig};
use cadence_store_sqlite::SqliteStore;
use cadence_sync::{Accounts, Engine, SystemClock, Vault, scheduler};
use clap::Parser;
use rand_core::OsRng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Mirror what you are playing into your chat status")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
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

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
    .build()
    .context("failed to read configuration")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let vault = Vault::from_config(&server_cfg.vault).context("failed to set up credential vault")?;
  let vault = Arc::new(vault);

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let http = http_client(Duration::from_secs(server_cfg.http_timeout_secs))
    .context("failed to build HTTP client")?;
  let spotify = SpotifyClient::new(http.clone(), server_cfg.spotify.clone(), server_cfg.retry);
  let slack   = SlackClient::new(http, server_cfg.slack.clone(), server_cfg.retry);

  let engine = Engine::builder(store.clone(), Arc::new(spotify), Arc::new(slack), vault.clone())
    .config(server_cfg.sync)
    .build();
  let engine = Arc::new(engine);

  let cancel = CancellationToken::new();
  let scheduler = tokio::spawn(scheduler::run(
    engine.clone(),
    server_cfg.sync.poll_interval(),
    cancel.clone(),
  ));

  let state = AppState {
    engine,
    accounts: Arc::new(Accounts::new(store, vault, Arc::new(SystemClock))),
    auth:     Arc::new(AuthConfig {
      username:      server_cfg.auth_username.clone(),
      password_hash: server_cfg.auth_password_hash.clone(),
    }),
  };

  let app = cadence_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await
    .context("server error")?;

  cancel.cancel();
  scheduler.await.context("scheduler task panicked")?;
  tracing::info!("shut down");

  Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
  tokio::select! {
    res = tokio::signal::ctrl_c() => {
      if let Err(e) = res {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
      }
      tracing::info!("shutdown requested");
      cancel.cancel();
    }
    _ = cancel.cancelled() => {}
  }
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
