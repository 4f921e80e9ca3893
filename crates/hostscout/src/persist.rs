// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry persistence over an opaque key/value settings store.
//!
//! The store has no enumeration-by-prefix, so a dedicated key holds the
//! list of saved host ids; each host's fields live under per-id group
//! keys. `status` is live-only data and is never persisted -- a loaded
//! record starts with an empty status until its agent answers a query.
//!
//! # Schema
//!
//! ```text
//! hosts/ids                      JSON array of saved ids
//! host/<id>/name                 display fields
//! host/<id>/role
//! host/<id>/version
//! host/<id>/platform
//! host/<id>/os
//! host/<id>/mac
//! host/<id>/last_heard           Unix seconds
//! host/<id>/address_count        number of saved address pairs
//! host/<id>/address_<n>          pair n, address string
//! host/<id>/port_<n>             pair n, port
//! ```

use crate::record::HostRecord;
use crate::registry::HostRegistry;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const IDS_KEY: &str = "hosts/ids";

/// Opaque key/value settings store.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// SQLite-backed settings store.
///
/// Thread-safe via internal Mutex (SQLite Connection is not Sync).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a file-based settings database.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open settings database at {}", path.display()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory settings store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory settings database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

impl ConfigStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn group_key(id: &str, field: &str) -> String {
    format!("host/{}/{}", id, field)
}

fn delete_group(store: &dyn ConfigStore, id: &str) -> Result<()> {
    let count: usize = store
        .get(&group_key(id, "address_count"))?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    for field in ["name", "role", "version", "platform", "os", "mac", "last_heard", "address_count"]
    {
        store.delete(&group_key(id, field))?;
    }
    for n in 0..count {
        store.delete(&group_key(id, &format!("address_{}", n)))?;
        store.delete(&group_key(id, &format!("port_{}", n)))?;
    }
    Ok(())
}

/// Write every record's identity fields, last-heard stamp, and full address
/// list to the store. Groups saved by a previous run are deleted first so a
/// host erased since then does not resurrect on the next load.
pub fn save_registry(store: &dyn ConfigStore, registry: &HostRegistry) -> Result<()> {
    if let Some(raw) = store.get(IDS_KEY)? {
        if let Ok(old_ids) = serde_json::from_str::<Vec<String>>(&raw) {
            for id in &old_ids {
                delete_group(store, id)?;
            }
        }
    }

    let mut ids: Vec<&str> = Vec::new();
    for rec in registry.records() {
        ids.push(&rec.id);

        store.put(&group_key(&rec.id, "name"), &rec.name)?;
        store.put(&group_key(&rec.id, "role"), &rec.role)?;
        store.put(&group_key(&rec.id, "version"), &rec.version)?;
        store.put(&group_key(&rec.id, "platform"), &rec.platform)?;
        store.put(&group_key(&rec.id, "os"), &rec.os)?;
        store.put(&group_key(&rec.id, "mac"), &rec.mac)?;
        store.put(&group_key(&rec.id, "last_heard"), &rec.last_heard.to_string())?;
        store.put(
            &group_key(&rec.id, "address_count"),
            &rec.addresses.len().to_string(),
        )?;
        for (n, pair) in rec.addresses.iter().enumerate() {
            store.put(&group_key(&rec.id, &format!("address_{}", n)), &pair.address)?;
            store.put(
                &group_key(&rec.id, &format!("port_{}", n)),
                &pair.port.to_string(),
            )?;
        }
    }

    store.put(IDS_KEY, &serde_json::to_string(&ids)?)?;
    Ok(())
}

/// Replace the registry contents with the saved records.
///
/// `status` is reset to empty (live-only data); saved address pairs are
/// replayed through the reconciler with the preference flag off, so the
/// order they were saved in is the order they come back in.
pub fn load_registry(store: &dyn ConfigStore, registry: &mut HostRegistry) -> Result<()> {
    let ids: Vec<String> = match store.get(IDS_KEY)? {
        Some(raw) => serde_json::from_str(&raw).context("saved id list is not valid JSON")?,
        None => Vec::new(),
    };

    let mut records = Vec::with_capacity(ids.len());
    for id in &ids {
        let field = |name: &str| -> Result<String> {
            Ok(store.get(&group_key(id, name))?.unwrap_or_default())
        };

        let mut rec = HostRecord::new(id.clone());
        rec.name = field("name")?;
        rec.role = field("role")?;
        rec.version = field("version")?;
        rec.platform = field("platform")?;
        rec.os = field("os")?;
        rec.mac = field("mac")?;
        rec.last_heard = field("last_heard")?.parse().unwrap_or(0);

        let count: usize = field("address_count")?.parse().unwrap_or(0);
        for n in 0..count {
            let address = field(&format!("address_{}", n))?;
            let port: u16 = field(&format!("port_{}", n))?.parse().unwrap_or(0);
            if !address.is_empty() {
                rec.merge_address(&address, port, false);
            }
        }

        records.push(rec);
    }

    registry.restore(records);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HostFields;

    fn populated_registry() -> HostRegistry {
        let mut reg = HostRegistry::new();
        let fields = HostFields {
            name: "Server1".to_string(),
            role: "fileserver".to_string(),
            version: "2.4".to_string(),
            platform: "x86_64".to_string(),
            status: "3 apps running".to_string(),
            os: "linux".to_string(),
            mac: "00:11:22:33:44:55".to_string(),
        };
        reg.apply_announce("h1", &fields, "10.0.0.5", 7430, true);
        reg.apply_announce("h1", &HostFields { mac: String::new(), ..fields.clone() }, "fe80::9", 7430, false);
        reg.apply_announce("h2", &HostFields::default(), "10.0.0.6", 7430, true);
        reg.take_events();
        reg
    }

    #[test]
    fn test_store_get_put_delete() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", "v1").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));

        store.put("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let store = SqliteStore::new_in_memory().unwrap();
        let reg = populated_registry();
        save_registry(&store, &reg).unwrap();

        let mut loaded = HostRegistry::new();
        load_registry(&store, &mut loaded).unwrap();
        assert_eq!(loaded.take_events(), vec![crate::registry::RegistryEvent::Reset]);

        assert_eq!(loaded.len(), 2);
        let h1 = loaded.get("h1").unwrap();
        let original = reg.get("h1").unwrap();
        assert_eq!(h1.name, original.name);
        assert_eq!(h1.role, original.role);
        assert_eq!(h1.version, original.version);
        assert_eq!(h1.platform, original.platform);
        assert_eq!(h1.os, original.os);
        assert_eq!(h1.mac, original.mac);
        assert_eq!(h1.last_heard, original.last_heard);
        // Address order survives the roundtrip.
        assert_eq!(h1.addresses, original.addresses);
        // Status is live-only data.
        assert_eq!(h1.status, "");
    }

    #[test]
    fn test_save_drops_previously_saved_hosts() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut reg = populated_registry();
        save_registry(&store, &reg).unwrap();

        reg.erase("h2");
        reg.take_events();
        save_registry(&store, &reg).unwrap();

        let mut loaded = HostRegistry::new();
        load_registry(&store, &mut loaded).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("h2").is_none());
        // The erased host's group keys are gone, not just unlisted.
        assert_eq!(store.get("host/h2/name").unwrap(), None);
    }

    #[test]
    fn test_load_empty_store() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut reg = populated_registry();
        load_registry(&store, &mut reg).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            save_registry(&store, &populated_registry()).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        let mut loaded = HostRegistry::new();
        load_registry(&store, &mut loaded).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
