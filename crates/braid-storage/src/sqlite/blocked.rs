//! Blocked-issues cache: materialized set of currently-blocked issue ids.
//!
//! Membership invariant: an issue is cached iff it is active (open,
//! in-progress, blocked, or a custom status) AND it has an engaged blocking
//! edge OR any parent-child ancestor is cached. Gate edges
//! (conditional-blocks, waits-for, tracks) contribute per their own
//! semantics. External capability references never contribute here; the
//! ready-work planner resolves them lazily.
//!
//! Two maintenance modes: a full rebuild (authoritative; used after schema
//! init, hydrate, and reconnect) and an incremental worklist recompute
//! invoked in-transaction from every mutation that can change membership.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::debug;

use braid_core::dependency::{is_external_ref, is_failure_close, waits_for_gate, waits_for_gate_of};
use braid_core::enums::DependencyType;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::sqlite::issues::format_datetime;
use crate::sqlite::store::SqliteStore;

/// Transitive parent-child fan-out bound for both maintenance modes.
const MAX_PROPAGATION_DEPTH: usize = 50;

// ---------------------------------------------------------------------------
// Per-issue blocking predicate
// ---------------------------------------------------------------------------

/// Status + close reason of a local issue, if it exists.
fn blocker_state(conn: &Connection, id: &str) -> Result<Option<(String, String)>> {
    let mut stmt =
        conn.prepare_cached("SELECT status, close_reason FROM issues WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some((
            row.get(0)?,
            row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        ))),
        None => Ok(None),
    }
}

fn is_unclosed(status: &str) -> bool {
    status != "closed" && status != "tombstone"
}

/// Computes the set of direct blockers currently engaged for an issue.
///
/// Walks the issue's outgoing edges and applies the per-kind gate:
/// - `blocks`: engaged while the target is unclosed.
/// - `conditional-blocks`: engaged until the target closes with a failure
///   close reason; any other close leaves the gate engaged.
/// - `waits-for`: engaged until the target's children satisfy the
///   configured gate (all-children by default, any-children via metadata).
/// - `tracks`: engaged while any tracked target is unclosed.
pub(crate) fn direct_blockers(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT depends_on_id, type, metadata FROM dependencies WHERE issue_id = ?1",
    )?;
    let edges: Vec<(String, String, String)> = stmt
        .query_map(params![id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut blockers = Vec::new();
    for (target, type_str, metadata) in edges {
        // External capabilities are resolved lazily by the ready planner.
        if is_external_ref(&target) {
            continue;
        }
        let dep_type = DependencyType::from(type_str.as_str());
        if !dep_type.blocks_work() {
            continue;
        }

        let engaged = match dep_type {
            DependencyType::Blocks | DependencyType::Tracks => {
                match blocker_state(conn, &target)? {
                    Some((status, _)) => is_unclosed(&status),
                    None => false,
                }
            }
            DependencyType::ConditionalBlocks => match blocker_state(conn, &target)? {
                Some((status, close_reason)) => {
                    if status == "closed" {
                        !is_failure_close(&close_reason)
                    } else {
                        is_unclosed(&status)
                    }
                }
                None => false,
            },
            DependencyType::WaitsFor => waits_for_engaged(conn, &target, &metadata)?,
            _ => false,
        };

        if engaged {
            blockers.push(target);
        }
    }

    blockers.sort();
    blockers.dedup();
    Ok(blockers)
}

/// Evaluates a waits-for gate against the target's parent-child children.
fn waits_for_engaged(conn: &Connection, target: &str, metadata: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT i.status FROM dependencies d
         INNER JOIN issues i ON i.id = d.issue_id
         WHERE d.depends_on_id = ?1 AND d.type = 'parent-child'",
    )?;
    let statuses: Vec<String> = stmt
        .query_map(params![target], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let closed = statuses.iter().filter(|s| s.as_str() == "closed").count();
    let total = statuses.len();

    let engaged = match waits_for_gate_of(metadata).as_str() {
        waits_for_gate::ANY_CHILDREN => closed == 0,
        // all-children: vacuously satisfied when there are no children.
        _ => closed < total,
    };
    Ok(engaged)
}

/// Returns `true` if every tracked target of `tracker` is closed.
pub(crate) fn tracks_all_closed(conn: &Connection, tracker: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT depends_on_id FROM dependencies WHERE issue_id = ?1 AND type = 'tracks'",
    )?;
    let targets: Vec<String> = stmt
        .query_map(params![tracker], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for target in targets {
        if is_external_ref(&target) {
            return Ok(false);
        }
        if let Some((status, _)) = blocker_state(conn, &target)? {
            if is_unclosed(&status) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// Cache row plumbing
// ---------------------------------------------------------------------------

fn cache_contains(conn: &Connection, id: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM blocked_issues_cache WHERE issue_id = ?1")?;
    Ok(stmt.exists(params![id])?)
}

fn upsert_cache_row(
    conn: &Connection,
    id: &str,
    blocked_by: &[String],
    transitive: bool,
) -> Result<()> {
    let blocked_by_json = serde_json::to_string(blocked_by).unwrap_or_else(|_| "[]".to_string());
    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO blocked_issues_cache (issue_id, blocked_by, transitive, blocked_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(issue_id) DO UPDATE SET
             blocked_by = excluded.blocked_by,
             transitive = excluded.transitive",
        params![id, blocked_by_json, transitive as i32, now_str],
    )?;
    Ok(())
}

fn parent_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT depends_on_id FROM dependencies
         WHERE issue_id = ?1 AND type = 'parent-child'",
    )?;
    let parents: Vec<String> = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(parents)
}

fn child_ids(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT issue_id FROM dependencies
         WHERE depends_on_id = ?1 AND type = 'parent-child'",
    )?;
    let children: Vec<String> = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(children)
}

// ---------------------------------------------------------------------------
// Full rebuild
// ---------------------------------------------------------------------------

/// Rebuilds the cache from scratch: the authoritative implementation the
/// incremental path is validated against. Used after schema init, hydrate,
/// and reconnect.
pub(crate) fn rebuild_blocked_cache_on_conn(conn: &Connection, cancel: &CancelToken) -> Result<()> {
    conn.execute("DELETE FROM blocked_issues_cache", [])?;

    let mut stmt = conn.prepare(
        "SELECT id FROM issues WHERE status NOT IN ('closed', 'tombstone')",
    )?;
    let active: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    // Pass 1: directly-blocked set.
    let mut cached: HashSet<String> = HashSet::new();
    for id in &active {
        cancel.check()?;
        let blockers = direct_blockers(conn, id)?;
        if !blockers.is_empty() {
            upsert_cache_row(conn, id, &blockers, false)?;
            cached.insert(id.clone());
        }
    }

    // Pass 2..N: propagate along parent-child edges to a fixed point,
    // bounded by the configured depth.
    for _pass in 0..MAX_PROPAGATION_DEPTH {
        cancel.check()?;
        let mut added = 0usize;
        for id in &active {
            if cached.contains(id) {
                continue;
            }
            let blocked_parents: Vec<String> = parent_ids(conn, id)?
                .into_iter()
                .filter(|p| cached.contains(p))
                .collect();
            if !blocked_parents.is_empty() {
                upsert_cache_row(conn, id, &blocked_parents, true)?;
                cached.insert(id.clone());
                added += 1;
            }
        }
        if added == 0 {
            break;
        }
    }

    debug!(blocked = cached.len(), "blocked cache rebuilt");
    Ok(())
}

// ---------------------------------------------------------------------------
// Incremental maintenance
// ---------------------------------------------------------------------------

/// Recomputes cache membership for the seed issues and everything downstream
/// of a membership change (parent-child descendants).
///
/// Runs inside the mutating transaction so a read after commit observes a
/// self-consistent cache.
pub(crate) fn update_blocked_cache_for(
    conn: &Connection,
    cancel: &CancelToken,
    seeds: &[String],
) -> Result<()> {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut visits: HashMap<String, usize> = HashMap::new();

    for seed in seeds {
        if !is_external_ref(seed) {
            queue.push_back(seed.clone());
        }
    }

    while let Some(id) = queue.pop_front() {
        cancel.check()?;

        // Visit bound guards against pathological imported graphs; a clean
        // graph converges well inside the propagation depth.
        let visit = visits.entry(id.clone()).or_insert(0);
        *visit += 1;
        if *visit > MAX_PROPAGATION_DEPTH {
            continue;
        }

        let was_cached = cache_contains(conn, &id)?;

        let state = blocker_state(conn, &id)?;
        let active = matches!(&state, Some((status, _)) if is_unclosed(status));

        let now_cached = if !active {
            if was_cached {
                conn.execute(
                    "DELETE FROM blocked_issues_cache WHERE issue_id = ?1",
                    params![id],
                )?;
            }
            false
        } else {
            let direct = direct_blockers(conn, &id)?;
            if !direct.is_empty() {
                upsert_cache_row(conn, &id, &direct, false)?;
                true
            } else {
                let blocked_parents: Vec<String> = {
                    let mut out = Vec::new();
                    for p in parent_ids(conn, &id)? {
                        if cache_contains(conn, &p)? {
                            out.push(p);
                        }
                    }
                    out
                };
                if !blocked_parents.is_empty() {
                    upsert_cache_row(conn, &id, &blocked_parents, true)?;
                    true
                } else {
                    if was_cached {
                        conn.execute(
                            "DELETE FROM blocked_issues_cache WHERE issue_id = ?1",
                            params![id],
                        )?;
                    }
                    false
                }
            }
        };

        // A membership flip can change every parent-child descendant.
        if was_cached != now_cached {
            for child in child_ids(conn, &id)? {
                queue.push_back(child);
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Rebuilds the blocked cache from scratch.
    pub fn rebuild_blocked_cache_impl(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| crate::error::StorageError::Transaction(format!("failed to begin: {e}")))?;
        rebuild_blocked_cache_on_conn(&tx, &self.cancel)?;
        tx.commit()
            .map_err(|e| crate::error::StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Returns the set of cached blocked issue ids.
    pub fn blocked_ids_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT issue_id FROM blocked_issues_cache ORDER BY issue_id")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use crate::traits::Storage;
    use braid_core::dependency::Dependency;
    use braid_core::enums::Status;
    use braid_core::issue::IssueBuilder;
    use pretty_assertions::assert_eq;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create(store: &SqliteStore, id: &str) {
        let issue = IssueBuilder::new(format!("Issue {id}")).id(id).build();
        store.create_issue(&issue, "alice").unwrap();
    }

    fn dep(store: &SqliteStore, from: &str, to: &str, dep_type: DependencyType) {
        store
            .add_dependency(&Dependency::new(from, to, dep_type), "alice")
            .unwrap();
    }

    fn dep_with_meta(
        store: &SqliteStore,
        from: &str,
        to: &str,
        dep_type: DependencyType,
        metadata: &str,
    ) {
        let mut d = Dependency::new(from, to, dep_type);
        d.metadata = metadata.to_string();
        store.add_dependency(&d, "alice").unwrap();
    }

    #[test]
    fn blocks_edge_populates_cache() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        dep(&store, "bd-b", "bd-a", DependencyType::Blocks);

        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-b"]);

        store.close_issue_impl("bd-a", "done", "alice").unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn related_edges_never_block() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        create(&store, "bd-c");
        dep(&store, "bd-b", "bd-a", DependencyType::Related);
        dep(&store, "bd-c", "bd-a", DependencyType::RelatesTo);

        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn parent_child_propagates_blocking() {
        let store = test_store();
        create(&store, "bd-blocker");
        create(&store, "bd-epic");
        create(&store, "bd-task");
        dep(&store, "bd-epic", "bd-blocker", DependencyType::Blocks);
        dep(&store, "bd-task", "bd-epic", DependencyType::ParentChild);

        assert_eq!(
            store.blocked_ids_impl().unwrap(),
            vec!["bd-epic", "bd-task"]
        );

        // Closing the blocker releases the whole chain atomically.
        store.close_issue_impl("bd-blocker", "done", "alice").unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn deep_chain_propagation_and_release() {
        let store = test_store();
        create(&store, "bd-root");
        create(&store, "bd-blk");
        dep(&store, "bd-root", "bd-blk", DependencyType::Blocks);

        let mut prev = "bd-root".to_string();
        for i in 0..6 {
            let id = format!("bd-n{i}");
            create(&store, &id);
            dep(&store, &id, &prev, DependencyType::ParentChild);
            prev = id;
        }

        let blocked = store.blocked_ids_impl().unwrap();
        assert_eq!(blocked.len(), 7, "root plus all descendants");

        store.close_issue_impl("bd-blk", "done", "alice").unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn conditional_blocks_gate() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        dep(&store, "bd-b", "bd-a", DependencyType::ConditionalBlocks);

        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-b"]);

        // A successful close leaves the gate engaged.
        store
            .close_issue_impl("bd-a", "completed successfully", "alice")
            .unwrap();
        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-b"]);

        // Reopen, close with a failure keyword: gate disengages.
        let updates = crate::traits::IssueUpdates {
            status: Some(Status::Open),
            ..Default::default()
        };
        store.update_issue_impl("bd-a", &updates, "alice").unwrap();
        store
            .close_issue_impl("bd-a", "Task failed due to timeout", "alice")
            .unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn waits_for_all_children_gate() {
        let store = test_store();
        create(&store, "bd-s");
        create(&store, "bd-c1");
        create(&store, "bd-c2");
        create(&store, "bd-w");
        dep(&store, "bd-c1", "bd-s", DependencyType::ParentChild);
        dep(&store, "bd-c2", "bd-s", DependencyType::ParentChild);
        dep_with_meta(
            &store,
            "bd-w",
            "bd-s",
            DependencyType::WaitsFor,
            r#"{"gate":"all-children"}"#,
        );

        assert!(store.blocked_ids_impl().unwrap().contains(&"bd-w".to_string()));

        store.close_issue_impl("bd-c1", "done", "alice").unwrap();
        assert!(store.blocked_ids_impl().unwrap().contains(&"bd-w".to_string()));

        store.close_issue_impl("bd-c2", "done", "alice").unwrap();
        assert!(!store.blocked_ids_impl().unwrap().contains(&"bd-w".to_string()));
    }

    #[test]
    fn waits_for_any_children_gate() {
        let store = test_store();
        create(&store, "bd-s");
        create(&store, "bd-c1");
        create(&store, "bd-c2");
        create(&store, "bd-w");
        dep(&store, "bd-c1", "bd-s", DependencyType::ParentChild);
        dep(&store, "bd-c2", "bd-s", DependencyType::ParentChild);
        dep_with_meta(
            &store,
            "bd-w",
            "bd-s",
            DependencyType::WaitsFor,
            r#"{"gate":"any-children"}"#,
        );

        assert!(store.blocked_ids_impl().unwrap().contains(&"bd-w".to_string()));

        // One closed child satisfies the any-children gate.
        store.close_issue_impl("bd-c1", "done", "alice").unwrap();
        assert!(!store.blocked_ids_impl().unwrap().contains(&"bd-w".to_string()));
    }

    #[test]
    fn waits_for_no_children_is_vacuously_satisfied() {
        let store = test_store();
        create(&store, "bd-s");
        create(&store, "bd-w");
        dep_with_meta(
            &store,
            "bd-w",
            "bd-s",
            DependencyType::WaitsFor,
            r#"{"gate":"all-children"}"#,
        );
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn tracks_blocks_until_all_closed() {
        let store = test_store();
        create(&store, "bd-convoy");
        create(&store, "bd-t1");
        create(&store, "bd-t2");
        dep(&store, "bd-convoy", "bd-t1", DependencyType::Tracks);
        dep(&store, "bd-convoy", "bd-t2", DependencyType::Tracks);

        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-convoy"]);

        store.close_issue_impl("bd-t1", "done", "alice").unwrap();
        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-convoy"]);

        // Closing the last tracked issue auto-closes the convoy.
        store.close_issue_impl("bd-t2", "done", "alice").unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
        let convoy = store.get_issue_impl("bd-convoy").unwrap();
        assert_eq!(convoy.status, Status::Closed);
        assert_eq!(
            convoy.close_reason,
            braid_core::dependency::TRACKS_AUTO_CLOSE_REASON
        );
    }

    #[test]
    fn incremental_matches_full_rebuild() {
        let store = test_store();
        for id in ["bd-a", "bd-b", "bd-c", "bd-d", "bd-e"] {
            create(&store, id);
        }
        dep(&store, "bd-b", "bd-a", DependencyType::Blocks);
        dep(&store, "bd-c", "bd-b", DependencyType::ParentChild);
        dep(&store, "bd-d", "bd-c", DependencyType::ParentChild);
        dep(&store, "bd-e", "bd-a", DependencyType::ConditionalBlocks);
        store.close_issue_impl("bd-a", "done", "alice").unwrap();
        store
            .remove_dependency("bd-b", "bd-a", &DependencyType::Blocks, "alice")
            .unwrap();

        let incremental = store.blocked_ids_impl().unwrap();
        store.rebuild_blocked_cache_impl().unwrap();
        let rebuilt = store.blocked_ids_impl().unwrap();
        assert_eq!(incremental, rebuilt);
    }

    #[test]
    fn edge_removal_updates_cache() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        dep(&store, "bd-b", "bd-a", DependencyType::Blocks);
        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-b"]);

        store
            .remove_dependency("bd-b", "bd-a", &DependencyType::Blocks, "alice")
            .unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn delete_blocker_unblocks_dependents() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        dep(&store, "bd-b", "bd-a", DependencyType::Blocks);
        assert_eq!(store.blocked_ids_impl().unwrap(), vec!["bd-b"]);

        store.delete_issue_impl("bd-a", "alice", "gone").unwrap();
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }
}
