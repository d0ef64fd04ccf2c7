//! Typed record stores over the shared database
//!
//! Lookups return `Ok(None)` when the record is absent so callers can tell
//! "not found" apart from storage failures.

use crate::db::Database;
use crate::types::*;
use crate::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Every store, built over one database handle
#[derive(Clone)]
pub struct Stores {
    pub interfaces: InterfaceStore,
    pub peers: PeerStore,
    pub allowed_emails: AllowedEmailStore,
    pub interface_routes: InterfaceRouteStore,
    pub peer_routes: PeerRouteStore,
}

impl Stores {
    pub fn new(db: &Database) -> Self {
        Self {
            interfaces: InterfaceStore::new(db.clone()),
            peers: PeerStore::new(db.clone()),
            allowed_emails: AllowedEmailStore::new(db.clone()),
            interface_routes: InterfaceRouteStore::new(db.clone()),
            peer_routes: PeerRouteStore::new(db.clone()),
        }
    }
}

// ============================================================================
// Interfaces
// ============================================================================

#[derive(Clone)]
pub struct InterfaceStore {
    db: Database,
}

impl InterfaceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<InterfaceConfig> {
        Ok(InterfaceConfig {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            listen_port: row.get(3)?,
            mtu: row.get(4)?,
            endpoint: row.get(5)?,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<InterfaceConfig>> {
        let conn = self.db.connection().lock();
        let config = conn
            .query_row(
                "SELECT id, name, address, listen_port, mtu, endpoint FROM interfaces WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()?;
        Ok(config)
    }

    pub fn list(&self) -> Result<Vec<InterfaceConfig>> {
        let conn = self.db.connection().lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, listen_port, mtu, endpoint FROM interfaces ORDER BY id",
        )?;
        let rows = stmt.query_map([], Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn create(&self, config: &InterfaceConfig) -> Result<()> {
        let conn = self.db.connection().lock();
        let ts = now();
        let result = conn.execute(
            "INSERT INTO interfaces (id, name, address, listen_port, mtu, endpoint, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                config.id,
                config.name,
                config.address,
                config.listen_port,
                config.mtu,
                config.endpoint,
                ts,
                ts
            ],
        );
        match result {
            Ok(_) => {
                debug!("Stored interface {}", config.id);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::already_exists("interface", &config.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn update(&self, config: &InterfaceConfig) -> Result<()> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "UPDATE interfaces SET name = ?2, address = ?3, listen_port = ?4, mtu = ?5, endpoint = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                config.id,
                config.name,
                config.address,
                config.listen_port,
                config.mtu,
                config.endpoint,
                now()
            ],
        )?;
        if changed == 0 {
            return Err(Error::not_found("interface", &config.id));
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let changed = conn.execute("DELETE FROM interfaces WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

// ============================================================================
// Peers
// ============================================================================

const PEER_COLUMNS: &str = "email, peer_id, interface_id, allowed_ip, config, created_at";

#[derive(Clone)]
pub struct PeerStore {
    db: Database,
}

impl PeerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<PeerRecord> {
        Ok(PeerRecord {
            email: row.get(0)?,
            peer_id: row.get(1)?,
            interface_id: row.get(2)?,
            allowed_ip: row.get(3)?,
            config: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn query_one(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<PeerRecord>> {
        let conn = self.db.connection().lock();
        let sql = format!(
            "SELECT {} FROM peers WHERE {} ORDER BY created_at, peer_id LIMIT 1",
            PEER_COLUMNS, filter
        );
        let record = conn.query_row(&sql, args, Self::from_row).optional()?;
        Ok(record)
    }

    fn query_many(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<PeerRecord>> {
        let conn = self.db.connection().lock();
        let sql = format!(
            "SELECT {} FROM peers WHERE {} ORDER BY created_at, peer_id",
            PEER_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(args, Self::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Oldest peer owned by `email`
    pub fn get_by_email(&self, email: &str) -> Result<Option<PeerRecord>> {
        self.query_one("email = ?1", &[&email])
    }

    pub fn get_by_email_and_interface(
        &self,
        email: &str,
        interface_id: &str,
    ) -> Result<Option<PeerRecord>> {
        self.query_one("email = ?1 AND interface_id = ?2", &[&email, &interface_id])
    }

    pub fn get_by_peer_id(&self, peer_id: &str) -> Result<Option<PeerRecord>> {
        self.query_one("peer_id = ?1", &[&peer_id])
    }

    pub fn list(&self) -> Result<Vec<PeerRecord>> {
        self.query_many("1 = 1", &[])
    }

    pub fn list_by_email(&self, email: &str) -> Result<Vec<PeerRecord>> {
        self.query_many("email = ?1", &[&email])
    }

    pub fn list_by_interface(&self, interface_id: &str) -> Result<Vec<PeerRecord>> {
        self.query_many("interface_id = ?1", &[&interface_id])
    }

    pub fn create(&self, record: &PeerRecord) -> Result<()> {
        let conn = self.db.connection().lock();
        let result = conn.execute(
            "INSERT INTO peers (email, peer_id, interface_id, allowed_ip, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.email,
                record.peer_id,
                record.interface_id,
                record.allowed_ip,
                record.config,
                record.created_at
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::already_exists("peer", &record.peer_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_config(&self, peer_id: &str, config: &str) -> Result<()> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "UPDATE peers SET config = ?2 WHERE peer_id = ?1",
            params![peer_id, config],
        )?;
        if changed == 0 {
            return Err(Error::not_found("peer", peer_id));
        }
        Ok(())
    }

    pub fn delete_by_peer_id(&self, peer_id: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let changed = conn.execute("DELETE FROM peers WHERE peer_id = ?1", params![peer_id])?;
        Ok(changed > 0)
    }

    pub fn delete_by_interface(&self, interface_id: &str) -> Result<usize> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM peers WHERE interface_id = ?1",
            params![interface_id],
        )?;
        Ok(changed)
    }
}

// ============================================================================
// Access grants
// ============================================================================

#[derive(Clone)]
pub struct AllowedEmailStore {
    db: Database,
}

impl AllowedEmailStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_by_interface(&self, interface_id: &str) -> Result<Vec<AllowedEmail>> {
        let conn = self.db.connection().lock();
        let mut stmt = conn.prepare(
            "SELECT interface_id, email, created_at FROM allowed_emails
             WHERE interface_id = ?1 ORDER BY email",
        )?;
        let rows = stmt.query_map(params![interface_id], |row| {
            Ok(AllowedEmail {
                interface_id: row.get(0)?,
                email: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_interface_ids_by_email(&self, email: &str) -> Result<Vec<String>> {
        let conn = self.db.connection().lock();
        let mut stmt = conn.prepare(
            "SELECT interface_id FROM allowed_emails WHERE email = ?1 ORDER BY interface_id",
        )?;
        let rows = stmt.query_map(params![email], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    pub fn exists(&self, interface_id: &str, email: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM allowed_emails WHERE interface_id = ?1 AND email = ?2",
            params![interface_id, email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Idempotent
    pub fn create(&self, interface_id: &str, email: &str) -> Result<()> {
        let conn = self.db.connection().lock();
        conn.execute(
            "INSERT OR IGNORE INTO allowed_emails (interface_id, email, created_at) VALUES (?1, ?2, ?3)",
            params![interface_id, email, now()],
        )?;
        Ok(())
    }

    pub fn delete(&self, interface_id: &str, email: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM allowed_emails WHERE interface_id = ?1 AND email = ?2",
            params![interface_id, email],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_by_interface(&self, interface_id: &str) -> Result<usize> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM allowed_emails WHERE interface_id = ?1",
            params![interface_id],
        )?;
        Ok(changed)
    }
}

// ============================================================================
// Routes
// ============================================================================

#[derive(Clone)]
pub struct InterfaceRouteStore {
    db: Database,
}

impl InterfaceRouteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_by_interface(&self, interface_id: &str) -> Result<Vec<InterfaceRoute>> {
        let conn = self.db.connection().lock();
        let mut stmt = conn.prepare(
            "SELECT interface_id, cidr, created_at FROM interface_routes
             WHERE interface_id = ?1 ORDER BY cidr",
        )?;
        let rows = stmt.query_map(params![interface_id], |row| {
            Ok(InterfaceRoute {
                interface_id: row.get(0)?,
                cidr: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Idempotent
    pub fn create(&self, interface_id: &str, cidr: &str) -> Result<()> {
        let conn = self.db.connection().lock();
        conn.execute(
            "INSERT OR IGNORE INTO interface_routes (interface_id, cidr, created_at) VALUES (?1, ?2, ?3)",
            params![interface_id, cidr, now()],
        )?;
        Ok(())
    }

    pub fn delete(&self, interface_id: &str, cidr: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM interface_routes WHERE interface_id = ?1 AND cidr = ?2",
            params![interface_id, cidr],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_by_interface(&self, interface_id: &str) -> Result<usize> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM interface_routes WHERE interface_id = ?1",
            params![interface_id],
        )?;
        Ok(changed)
    }
}

#[derive(Clone)]
pub struct PeerRouteStore {
    db: Database,
}

impl PeerRouteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_by_peer(&self, peer_id: &str) -> Result<Vec<PeerRoute>> {
        let conn = self.db.connection().lock();
        let mut stmt = conn.prepare(
            "SELECT peer_id, cidr, created_at FROM peer_routes WHERE peer_id = ?1 ORDER BY cidr",
        )?;
        let rows = stmt.query_map(params![peer_id], |row| {
            Ok(PeerRoute {
                peer_id: row.get(0)?,
                cidr: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Idempotent
    pub fn create(&self, peer_id: &str, cidr: &str) -> Result<()> {
        let conn = self.db.connection().lock();
        conn.execute(
            "INSERT OR IGNORE INTO peer_routes (peer_id, cidr, created_at) VALUES (?1, ?2, ?3)",
            params![peer_id, cidr, now()],
        )?;
        Ok(())
    }

    pub fn delete(&self, peer_id: &str, cidr: &str) -> Result<bool> {
        let conn = self.db.connection().lock();
        let changed = conn.execute(
            "DELETE FROM peer_routes WHERE peer_id = ?1 AND cidr = ?2",
            params![peer_id, cidr],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_by_peer(&self, peer_id: &str) -> Result<usize> {
        let conn = self.db.connection().lock();
        let changed = conn.execute("DELETE FROM peer_routes WHERE peer_id = ?1", params![peer_id])?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Stores {
        Stores::new(&Database::open_memory().unwrap())
    }

    fn wg0() -> InterfaceConfig {
        InterfaceConfig {
            id: "wg0".into(),
            name: "office".into(),
            address: "10.0.0.1/24".into(),
            listen_port: 51820,
            mtu: 1420,
            endpoint: "vpn.example.com".into(),
        }
    }

    fn peer(email: &str, id: &str, ip: &str, created_at: i64) -> PeerRecord {
        PeerRecord {
            email: email.into(),
            peer_id: id.into(),
            interface_id: "wg0".into(),
            allowed_ip: ip.into(),
            config: String::new(),
            created_at,
        }
    }

    #[test]
    fn test_interface_crud() {
        let s = stores();
        assert!(s.interfaces.get("wg0").unwrap().is_none());

        s.interfaces.create(&wg0()).unwrap();
        assert_eq!(s.interfaces.get("wg0").unwrap().unwrap(), wg0());
        assert!(matches!(
            s.interfaces.create(&wg0()),
            Err(Error::AlreadyExists { .. })
        ));

        let mut updated = wg0();
        updated.mtu = 1380;
        s.interfaces.update(&updated).unwrap();
        assert_eq!(s.interfaces.get("wg0").unwrap().unwrap().mtu, 1380);

        assert!(s.interfaces.delete("wg0").unwrap());
        assert!(!s.interfaces.delete("wg0").unwrap());
        assert!(s.interfaces.update(&updated).unwrap_err().is_not_found());
    }

    #[test]
    fn test_peer_lookups() {
        let s = stores();
        s.peers.create(&peer("a@example.com", "k1", "10.0.0.2/32", 10)).unwrap();
        s.peers.create(&peer("a@example.com", "k2", "10.0.0.3/32", 20)).unwrap();
        s.peers.create(&peer("", "k3", "10.0.0.4/32", 30)).unwrap();

        assert_eq!(s.peers.get_by_email("a@example.com").unwrap().unwrap().peer_id, "k1");
        assert!(s.peers.get_by_email_and_interface("a@example.com", "wg1").unwrap().is_none());
        assert_eq!(s.peers.list_by_email("a@example.com").unwrap().len(), 2);
        assert_eq!(s.peers.list_by_interface("wg0").unwrap().len(), 3);

        s.peers.update_config("k3", "[Interface]").unwrap();
        assert_eq!(s.peers.get_by_peer_id("k3").unwrap().unwrap().config, "[Interface]");

        assert_eq!(s.peers.delete_by_interface("wg0").unwrap(), 3);
        assert!(s.peers.list().unwrap().is_empty());
    }

    #[test]
    fn test_grants_and_routes_are_idempotent() {
        let s = stores();
        s.allowed_emails.create("wg0", "a@example.com").unwrap();
        s.allowed_emails.create("wg0", "a@example.com").unwrap();
        s.allowed_emails.create("wg1", "a@example.com").unwrap();
        assert!(s.allowed_emails.exists("wg0", "a@example.com").unwrap());
        assert_eq!(
            s.allowed_emails.list_interface_ids_by_email("a@example.com").unwrap(),
            vec!["wg0".to_string(), "wg1".to_string()]
        );

        s.interface_routes.create("wg0", "10.8.0.0/16").unwrap();
        s.interface_routes.create("wg0", "10.8.0.0/16").unwrap();
        s.interface_routes.create("wg0", "10.1.0.0/16").unwrap();
        let cidrs: Vec<_> = s
            .interface_routes
            .list_by_interface("wg0")
            .unwrap()
            .into_iter()
            .map(|r| r.cidr)
            .collect();
        assert_eq!(cidrs, vec!["10.1.0.0/16", "10.8.0.0/16"]);

        s.peer_routes.create("k1", "192.168.1.0/24").unwrap();
        assert!(s.peer_routes.delete("k1", "192.168.1.0/24").unwrap());
        assert!(s.peer_routes.list_by_peer("k1").unwrap().is_empty());
    }
}
