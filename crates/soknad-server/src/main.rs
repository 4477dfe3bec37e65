//! soknad server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `SOKNAD_*` environment variables, opens an in-process SQLite store, and
//! serves the JSON API over HTTP.
//!
//! ```
//! soknad serve
//! soknad answers <application-id> --min-version 3
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use soknad_api::{client::ApiClient, retry::RetryError};
use soknad_mediator::{Mediator, TracingPublisher};
use soknad_server::ServerConfig;
use soknad_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Benefits application workflow server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the API (the default).
  Serve,
  /// Wait for an application's form answers and print them as JSON.
  Answers {
    application_id: Uuid,

    /// Only accept answers at least this new.
    #[arg(long)]
    min_version: Option<u64>,

    /// Server base URL; defaults to the configured host and port.
    #[arg(long)]
    url: Option<String>,
  },
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

  let settings = config::Config::builder()
    .set_default("host", "127.0.0.1")?
    .set_default("port", 8080)?
    .set_default("store_path", "soknad.db")?
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("SOKNAD")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(server_cfg).await,
    Command::Answers { application_id, min_version, url } => {
      let url = url.unwrap_or_else(|| format!("http://{}", server_cfg.address()));
      answers(&url, &server_cfg, application_id, min_version).await
    }
  }
}

async fn serve(server_cfg: ServerConfig) -> anyhow::Result<()> {
  let store_path = expand_tilde(&server_cfg.store_path);

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let mediator = Mediator::new(Arc::new(store), Arc::new(TracingPublisher));
  let app = soknad_server::router(Arc::new(mediator));
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

async fn answers(
  url: &str,
  server_cfg: &ServerConfig,
  application_id: Uuid,
  min_version: Option<u64>,
) -> anyhow::Result<()> {
  let client = ApiClient::new(url, server_cfg.poll)?;
  match client.form_answers(application_id, min_version).await {
    Ok(answers) => {
      println!("{}", serde_json::to_string_pretty(&answers)?);
      Ok(())
    }
    Err(RetryError::NotFound { attempts }) => Err(anyhow::anyhow!(
      "no answers for {application_id} after {attempts} attempts"
    )),
    Err(RetryError::Failed(e)) => Err(e),
  }
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
