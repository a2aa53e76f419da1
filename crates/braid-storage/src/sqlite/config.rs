//! Config and metadata key-value store operations for [`SqliteStore`].

use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;

// ---------------------------------------------------------------------------
// Connection-level helpers (shared with Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Returns a config value, or `None` when the key is absent.
pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .ok()
}

pub(crate) fn set_metadata_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_metadata_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("metadata", key),
        other => StorageError::Query(other),
    })
}

/// Integer config lookup with a fallback default.
pub(crate) fn config_i64(conn: &Connection, key: &str, default: i64) -> i64 {
    get_config_on_conn(conn, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses the `external_projects` configuration into a project -> path map.
///
/// The stored form is `name=path` pairs separated by commas, with `~`
/// expanded against `$HOME` at use.
pub(crate) fn external_projects_on_conn(conn: &Connection) -> HashMap<String, PathBuf> {
    let raw = get_config_on_conn(conn, "external_projects").unwrap_or_default();
    parse_external_projects(&raw)
}

pub(crate) fn parse_external_projects(raw: &str) -> HashMap<String, PathBuf> {
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((name, path)) = pair.split_once('=') {
            let name = name.trim();
            let path = path.trim();
            if name.is_empty() || path.is_empty() {
                continue;
            }
            map.insert(name.to_string(), expand_tilde(path));
        }
    }
    map
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Sets a configuration key-value pair.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_config_on_conn(&conn, key, value)
    }

    /// Gets a configuration value by key.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_config_on_conn(&conn, key).ok_or_else(|| StorageError::not_found("config", key))
    }

    /// Returns all configuration key-value pairs.
    pub fn get_all_config_impl(&self) -> Result<HashMap<String, String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn set_and_get_config() {
        let store = test_store();
        store.set_config_impl("test_key", "test_value").unwrap();
        let val = store.get_config_impl("test_key").unwrap();
        assert_eq!(val, "test_value");
    }

    #[test]
    fn get_config_not_found() {
        let store = test_store();
        let err = store.get_config_impl("nonexistent").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn upsert_config() {
        let store = test_store();
        store.set_config_impl("key1", "v1").unwrap();
        store.set_config_impl("key1", "v2").unwrap();
        let val = store.get_config_impl("key1").unwrap();
        assert_eq!(val, "v2");
    }

    #[test]
    fn get_all_config_includes_defaults() {
        let store = test_store();
        let config = store.get_all_config_impl().unwrap();
        assert!(config.contains_key("issue_prefix"));
        assert!(config.contains_key("compact_tier1_days"));
    }

    #[test]
    fn external_projects_parsing() {
        let map = parse_external_projects("auth=/srv/auth, infra=/srv/infra");
        assert_eq!(map.len(), 2);
        assert_eq!(map["auth"], PathBuf::from("/srv/auth"));
        assert_eq!(map["infra"], PathBuf::from("/srv/infra"));

        assert!(parse_external_projects("").is_empty());
        assert!(parse_external_projects("noequals").is_empty());
        assert!(parse_external_projects("=path").is_empty());
    }
}
