//! SQLite database for WgPlane state persistence

use crate::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // The admin daemon and the self-service server share this file
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Shared connection handle used by the typed stores
    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Desired interface state
            CREATE TABLE IF NOT EXISTS interfaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                listen_port INTEGER NOT NULL,
                mtu INTEGER NOT NULL,
                endpoint TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Admitted peers
            CREATE TABLE IF NOT EXISTS peers (
                peer_id TEXT PRIMARY KEY,
                email TEXT NOT NULL DEFAULT '',
                interface_id TEXT NOT NULL,
                allowed_ip TEXT NOT NULL,
                config TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_peers_email ON peers(email);
            CREATE INDEX IF NOT EXISTS idx_peers_interface ON peers(interface_id);

            -- Access grants
            CREATE TABLE IF NOT EXISTS allowed_emails (
                interface_id TEXT NOT NULL,
                email TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (interface_id, email)
            );
            CREATE INDEX IF NOT EXISTS idx_allowed_emails_email ON allowed_emails(email);

            -- Interface-wide destinations
            CREATE TABLE IF NOT EXISTS interface_routes (
                interface_id TEXT NOT NULL,
                cidr TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (interface_id, cidr)
            );

            -- Per-peer destinations
            CREATE TABLE IF NOT EXISTS peer_routes (
                peer_id TEXT NOT NULL,
                cidr TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (peer_id, cidr)
            );
            "#,
        )?;

        Ok(())
    }
}
