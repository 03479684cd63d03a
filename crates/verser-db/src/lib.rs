pub mod memory;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

pub use memory::MemoryStore;
pub use store::{CommunityStore, MembershipStore, MessageStore, Storage, UserStore, UsernameTaken};

/// Storage handle shared between the relay and the REST layer.
pub type SharedStorage = Arc<dyn Storage>;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

/// Run a storage call on the blocking pool and wait for it.
///
/// Storage backends are synchronous (rusqlite holds a mutex for the whole
/// query), so async callers must never invoke them on a runtime worker.
pub async fn with_storage<F, T>(storage: &SharedStorage, f: F) -> Result<T>
where
    F: FnOnce(&dyn Storage) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let storage = storage.clone();
    tokio::task::spawn_blocking(move || f(storage.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow!("storage task failed: {}", e)
        })?
}
