//! Child-counter allocation for hierarchical issue ids.

use rusqlite::{Connection, params};

use braid_core::hierarchy;

use crate::error::{HierarchyError, Result, StorageError};

/// Allocates the next child number for a parent via an atomic upsert.
///
/// Concurrent callers each get a distinct number: the `ON CONFLICT` arm
/// increments under SQLite's row lock and `RETURNING` hands back the value
/// that this caller owns.
pub(crate) fn next_child_number(conn: &Connection, parent_id: &str) -> Result<i64> {
    let n: i64 = conn.query_row(
        "INSERT INTO child_counters (parent_id, last_child) VALUES (?1, 1)
         ON CONFLICT(parent_id) DO UPDATE SET last_child = last_child + 1
         RETURNING last_child",
        params![parent_id],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Formats the next hierarchical child id for a parent.
pub(crate) fn next_child_id(conn: &Connection, parent_id: &str) -> Result<String> {
    let n = next_child_number(conn, parent_id)?;
    Ok(hierarchy::child_id(parent_id, n))
}

/// Brings the counter forward after an explicit hierarchical id was created,
/// so subsequent auto-allocation never collides with it.
pub(crate) fn bring_counter_forward(conn: &Connection, parent_id: &str, n: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO child_counters (parent_id, last_child) VALUES (?1, ?2)
         ON CONFLICT(parent_id) DO UPDATE SET last_child = MAX(last_child, ?2)",
        params![parent_id, n],
    )?;
    Ok(())
}

/// Checks a hierarchical id against the configured maximum nesting depth.
pub(crate) fn check_depth(conn: &Connection, id: &str) -> Result<()> {
    let depth = hierarchy::depth_of(id);
    if depth == 0 {
        return Ok(());
    }
    let max: usize = crate::sqlite::config::get_config_on_conn(conn, "hierarchy.max-depth")
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    if depth > max {
        return Err(StorageError::Hierarchy(HierarchyError::DepthExceeded {
            id: id.to_string(),
            depth,
            max,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use braid_core::issue::IssueBuilder;

    fn store_with_parent(id: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let issue = IssueBuilder::new("Parent").id(id).build();
        crate::traits::Storage::create_issue(&store, &issue, "alice").unwrap();
        store
    }

    #[test]
    fn counters_are_monotonic() {
        let store = store_with_parent("bd-par");
        let conn = store.lock_conn().unwrap();
        assert_eq!(next_child_number(&conn, "bd-par").unwrap(), 1);
        assert_eq!(next_child_number(&conn, "bd-par").unwrap(), 2);
        assert_eq!(next_child_number(&conn, "bd-par").unwrap(), 3);
    }

    #[test]
    fn bring_forward_skips_explicit_ids() {
        let store = store_with_parent("bd-par");
        let conn = store.lock_conn().unwrap();
        bring_counter_forward(&conn, "bd-par", 7).unwrap();
        assert_eq!(next_child_number(&conn, "bd-par").unwrap(), 8);
        // A lower explicit id never rewinds the counter.
        bring_counter_forward(&conn, "bd-par", 2).unwrap();
        assert_eq!(next_child_number(&conn, "bd-par").unwrap(), 9);
    }

    #[test]
    fn next_child_id_format() {
        let store = store_with_parent("bd-par");
        let conn = store.lock_conn().unwrap();
        assert_eq!(next_child_id(&conn, "bd-par").unwrap(), "bd-par.1");
        assert_eq!(next_child_id(&conn, "bd-par").unwrap(), "bd-par.2");
    }

    #[test]
    fn depth_limit_enforced() {
        let store = store_with_parent("bd-par");
        let conn = store.lock_conn().unwrap();
        assert!(check_depth(&conn, "bd-par.1.2.3").is_ok());
        let err = check_depth(&conn, "bd-par.1.2.3.4").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Hierarchy(HierarchyError::DepthExceeded { .. })
        ));
    }
}
