//! Command-line configuration and store selection.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use scratchpad_core::traits::KeyValueStore;
use scratchpad_session::storage::{JsonFileStore, MemoryStore};

/// Browser panel for running scratch scripts against a backend.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "SCRATCHPAD_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Directory for persisted state.
    #[arg(long, env = "SCRATCHPAD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Where config and session are persisted.
    #[arg(long, env = "SCRATCHPAD_STORE", value_enum, default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// Use the in-memory backend instead of HTTP.
    #[arg(long, env = "SCRATCHPAD_OFFLINE")]
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Json,
    Memory,
    Sqlite,
}

impl Args {
    /// Data directory, defaulting to the platform data dir.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".scratchpad"), |d| d.join("scratchpad"))
}

/// Open the selected key/value store under `data_dir`.
///
/// # Errors
/// Returns error if the store cannot be opened.
pub async fn open_store(
    kind: StoreKind,
    data_dir: &std::path::Path,
) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Json => {
            let path = data_dir.join("state.json");
            let store = JsonFileStore::open(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StoreKind::Sqlite => open_sqlite(data_dir).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(data_dir: &std::path::Path) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let path = data_dir.join("state.db");
    let store = scratchpad_session::storage::SqliteStore::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
#[allow(clippy::unused_async)]
async fn open_sqlite(_data_dir: &std::path::Path) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    anyhow::bail!("built without SQLite support; rebuild with `--features sqlite`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["scratchpad-web-panel"]).unwrap();
        assert_eq!(args.bind, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(args.store, StoreKind::Json);
        assert!(!args.offline);
        assert!(args.data_dir().ends_with("scratchpad") || args.data_dir().ends_with(".scratchpad"));
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "scratchpad-web-panel",
            "--store",
            "memory",
            "--offline",
            "--data-dir",
            "/tmp/pad",
        ])
        .unwrap();
        assert_eq!(args.store, StoreKind::Memory);
        assert!(args.offline);
        assert_eq!(args.data_dir(), PathBuf::from("/tmp/pad"));
    }

    #[tokio::test]
    async fn test_json_store_lives_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(StoreKind::Json, dir.path()).await.unwrap();
        store
            .put("backend-config", Some(serde_json::json!({ "endpoint": "e" })))
            .await
            .unwrap();
        assert!(dir.path().join("state.json").exists());
    }
}
