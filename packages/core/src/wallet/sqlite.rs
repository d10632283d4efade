//! SQLite-backed wallet.
//!
//! Uses `rusqlite` (with bundled SQLite) wrapped in an `Arc<Mutex<Connection>>`.
//! All blocking calls are offloaded via `tokio::task::spawn_blocking`.
//!
//! Each row holds the same JSON document the file wallet writes, so entries
//! can be moved between backends verbatim.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{check_label, decode_entry, encode_entry, Wallet, WalletError};
use crate::identity::X509Identity;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    label TEXT PRIMARY KEY,
    data  TEXT NOT NULL
);
";

/// SQLite implementation of [`Wallet`].
pub struct SqliteWallet {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWallet {
    /// Open (or create) the database at `path` and apply the schema.
    /// Missing parent directories are created.
    pub fn open(path: &Path) -> Result<Self, WalletError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WalletError::Internal(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (data is lost when dropped).
    pub fn open_in_memory() -> Result<Self, WalletError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, WalletError> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, WalletError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, WalletError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&*conn)
        })
        .await
        .map_err(|e| WalletError::Internal(format!("wallet task failed: {e}")))?
    }
}

fn map_err(e: rusqlite::Error) -> WalletError {
    WalletError::Internal(e.to_string())
}

#[async_trait]
impl Wallet for SqliteWallet {
    async fn exists(&self, label: &str) -> bool {
        let key = label.to_string();
        let found = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM identities WHERE label = ?1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n > 0)
                .map_err(map_err)
            })
            .await;

        match found {
            Ok(found) => found,
            Err(e) => {
                warn!("wallet: cannot check {label}: {e}");
                false
            }
        }
    }

    async fn put(&self, label: &str, identity: &X509Identity) -> Result<(), WalletError> {
        check_label(label)?;
        let data = encode_entry(label, identity)?;
        let key = label.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO identities (label, data) VALUES (?1, ?2)
                 ON CONFLICT(label) DO UPDATE SET data = excluded.data",
                params![key, data],
            )
            .map_err(map_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, label: &str) -> Result<X509Identity, WalletError> {
        let key = label.to_string();
        let data: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT data FROM identities WHERE label = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_err)
            })
            .await?;

        match data {
            Some(data) => decode_entry(label, &data),
            None => Err(WalletError::NotFound(label.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<String>, WalletError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT label FROM identities ORDER BY label")
                .map_err(map_err)?;
            let labels = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?;
            Ok(labels)
        })
        .await
    }
}
