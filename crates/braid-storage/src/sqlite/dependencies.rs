//! Dependency CRUD, cycle prevention, and graph queries for [`SqliteStore`].

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use braid_core::dependency::{Dependency, DependencyCounts, is_external_ref};
use braid_core::enums::{DependencyType, EventType, Status};
use braid_core::hierarchy;
use braid_core::issue::Issue;

use crate::cancel::CancelToken;
use crate::error::{HierarchyError, Result, StorageError};
use crate::sqlite::blocked;
use crate::sqlite::issues::{
    ISSUE_COLUMNS_PREFIXED, emit_event, format_datetime, get_issue_on_conn, mark_dirty_on_conn,
    parse_datetime, scan_issue,
};
use crate::sqlite::store::SqliteStore;
use crate::traits::TreeNode;

/// Edge types the cycle-prevention probe walks. `relates-to` is excluded so
/// bidirectional relates-to edges stay legal.
const CYCLE_EDGE_TYPES: &str = "('blocks', 'parent-child', 'discovered-from', 'related')";

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Inserts a dependency edge with cycle prevention.
pub(crate) fn add_dependency_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    dep: &Dependency,
    actor: &str,
) -> Result<()> {
    if dep.issue_id == dep.depends_on_id {
        return Err(StorageError::CycleDetected);
    }

    // A parent-child edge points child -> parent. An edge whose target sits
    // below the source in the id hierarchy is upside down.
    if dep.dep_type == DependencyType::ParentChild
        && hierarchy::is_descendant_of(&dep.depends_on_id, &dep.issue_id)
    {
        return Err(StorageError::Hierarchy(HierarchyError::ReversedEdge {
            child: dep.issue_id.clone(),
            parent: dep.depends_on_id.clone(),
        }));
    }

    // External references point outside the local graph; the cycle probe
    // only applies to local targets of cycle-participating types.
    if !is_external_ref(&dep.depends_on_id) && dep.dep_type.in_cycle_set() {
        detect_cycle_probe(conn, cancel, &dep.issue_id, &dep.depends_on_id)?;
    }

    let now = Utc::now();
    let now_str = format_datetime(&now);
    let created_at_str = format_datetime(&dep.created_at);
    let created_by = if dep.created_by.is_empty() {
        actor
    } else {
        dep.created_by.as_str()
    };

    let result = conn.execute(
        "INSERT INTO dependencies
         (issue_id, depends_on_id, type, created_at, created_by, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            dep.issue_id,
            dep.depends_on_id,
            dep.dep_type.as_str(),
            created_at_str,
            created_by,
            dep.metadata,
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(StorageError::duplicate(
                "dependency",
                format!("{} -> {} ({})", dep.issue_id, dep.depends_on_id, dep.dep_type),
            ));
        }
        Err(e) => return Err(StorageError::Query(e)),
    }

    emit_event(
        conn,
        &dep.issue_id,
        EventType::DependencyAdded,
        actor,
        None,
        Some(&dep.depends_on_id),
        Some(dep.dep_type.as_str()),
        &now_str,
    )?;

    mark_dirty_on_conn(conn, &dep.issue_id)?;
    mark_dirty_on_conn(conn, &dep.depends_on_id)?;

    blocked::update_blocked_cache_for(conn, cancel, &[dep.issue_id.clone()])?;

    Ok(())
}

/// Removes a dependency edge.
///
/// Both endpoints are marked dirty, except an external target: it is not a
/// key into the issues table and marking it would trip the foreign key.
pub(crate) fn remove_dependency_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    issue_id: &str,
    depends_on_id: &str,
    dep_type: &DependencyType,
    actor: &str,
) -> Result<()> {
    let now = Utc::now();
    let now_str = format_datetime(&now);

    let affected = conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2 AND type = ?3",
        params![issue_id, depends_on_id, dep_type.as_str()],
    )?;

    if affected == 0 {
        return Err(StorageError::not_found(
            "dependency",
            format!("{issue_id} -> {depends_on_id} ({dep_type})"),
        ));
    }

    emit_event(
        conn,
        issue_id,
        EventType::DependencyRemoved,
        actor,
        Some(depends_on_id),
        None,
        Some(dep_type.as_str()),
        &now_str,
    )?;

    mark_dirty_on_conn(conn, issue_id)?;
    mark_dirty_on_conn(conn, depends_on_id)?;

    blocked::update_blocked_cache_for(conn, cancel, &[issue_id.to_string()])?;

    Ok(())
}

/// Returns raw dependency records for an issue on the given connection.
pub(crate) fn get_dependency_records_on_conn(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>> {
    let mut stmt = conn.prepare_cached(
        "SELECT issue_id, depends_on_id, type, created_at, created_by, metadata
         FROM dependencies WHERE issue_id = ?1
         ORDER BY depends_on_id, type",
    )?;
    let rows = stmt.query_map(params![issue_id], scan_dependency)?;

    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

/// Ids of issues with an edge pointing at `issue_id` (any type).
pub(crate) fn dependent_ids_on_conn(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT issue_id FROM dependencies WHERE depends_on_id = ?1")?;
    let ids: Vec<String> = stmt
        .query_map(params![issue_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

fn scan_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        issue_id: row.get("issue_id")?,
        depends_on_id: row.get("depends_on_id")?,
        dep_type: DependencyType::from(row.get::<_, String>("type")?),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
        metadata: row.get::<_, Option<String>>("metadata")?.unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Cycle prevention
// ---------------------------------------------------------------------------

/// Rejects the edge `issue_id -> depends_on_id` if `issue_id` is reachable
/// from `depends_on_id` through cycle-participating edges. BFS over row
/// sets; cross-type closure is covered because every hop re-queries the
/// full cycle edge set.
fn detect_cycle_probe(
    conn: &Connection,
    cancel: &CancelToken,
    issue_id: &str,
    depends_on_id: &str,
) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_string());

    while let Some(current) = queue.pop_front() {
        cancel.check()?;
        if current == issue_id {
            return Err(StorageError::CycleDetected);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type IN {CYCLE_EDGE_TYPES}"
        ))?;
        let rows = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }

    Ok(())
}

/// Diagnostic cycle enumeration over the blocking edge set.
///
/// Walks a DFS from every node; each elementary cycle is reported as the
/// node path that closes back on the start. The same cycle may appear once
/// per entry point; callers normalize by sorted member set. Self-loops are
/// not reported.
pub(crate) fn detect_cycles_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
) -> Result<Vec<Vec<String>>> {
    // Load the cycle-relevant subgraph once.
    let mut stmt = conn.prepare(&format!(
        "SELECT issue_id, depends_on_id FROM dependencies
         WHERE type IN {CYCLE_EDGE_TYPES} AND issue_id != depends_on_id"
    ))?;
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (from, to) = row?;
        adjacency.entry(from).or_default().push(to);
    }

    let mut cycles: Vec<Vec<String>> = Vec::new();
    let starts: Vec<String> = adjacency.keys().cloned().collect();

    let empty: Vec<String> = Vec::new();
    for start in starts {
        cancel.check()?;
        // Iterative DFS with an explicit path stack. `done` bounds the walk
        // per start so dense graphs stay tractable.
        let mut done: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = vec![start.clone()];
        let mut iters: Vec<std::slice::Iter<'_, String>> =
            vec![adjacency.get(&start).unwrap_or(&empty).iter()];

        loop {
            let step = match iters.last_mut() {
                Some(iter) => iter.next(),
                None => break,
            };
            match step {
                Some(next) => {
                    if next == &start {
                        cycles.push(path.clone());
                        continue;
                    }
                    if path.contains(next) || done.contains(next) {
                        continue;
                    }
                    path.push(next.clone());
                    iters.push(adjacency.get(next).unwrap_or(&empty).iter());
                }
                None => {
                    iters.pop();
                    if let Some(finished) = path.pop() {
                        done.insert(finished);
                    }
                }
            }
        }
    }

    Ok(cycles)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Adds a dependency edge.
    pub fn add_dependency_impl(&self, dep: &Dependency, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        add_dependency_on_conn(&tx, &self.cancel, dep, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Removes a dependency edge.
    pub fn remove_dependency_impl(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        remove_dependency_on_conn(&tx, &self.cancel, issue_id, depends_on_id, dep_type, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Returns the outgoing edges of an issue with their target issues.
    /// External and dangling targets yield `None`.
    pub fn get_dependencies_impl(
        &self,
        issue_id: &str,
    ) -> Result<Vec<(Dependency, Option<Issue>)>> {
        let conn = self.lock_conn()?;
        let deps = get_dependency_records_on_conn(&conn, issue_id)?;
        let mut out = Vec::with_capacity(deps.len());
        for dep in deps {
            let issue = if is_external_ref(&dep.depends_on_id) {
                None
            } else {
                match get_issue_on_conn(&conn, &dep.depends_on_id) {
                    Ok(issue) => Some(issue),
                    Err(StorageError::NotFound { .. }) => None,
                    Err(e) => return Err(e),
                }
            };
            out.push((dep, issue));
        }
        Ok(out)
    }

    /// Returns the incoming edges of an issue with their source issues.
    pub fn get_dependents_impl(&self, issue_id: &str) -> Result<Vec<(Dependency, Issue)>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS_PREFIXED},
                    d.issue_id AS dep_issue_id,
                    d.depends_on_id AS dep_depends_on_id,
                    d.type AS dep_type,
                    d.created_at AS dep_created_at,
                    d.created_by AS dep_created_by,
                    d.metadata AS dep_metadata
             FROM issues
             INNER JOIN dependencies d ON issues.id = d.issue_id
             WHERE d.depends_on_id = ?1
             ORDER BY d.issue_id, d.type"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![issue_id], |row| {
            let issue = scan_issue(row)?;
            let dep = Dependency {
                issue_id: row.get("dep_issue_id")?,
                depends_on_id: row.get("dep_depends_on_id")?,
                dep_type: DependencyType::from(row.get::<_, String>("dep_type")?),
                created_at: parse_datetime(&row.get::<_, String>("dep_created_at")?),
                created_by: row.get("dep_created_by")?,
                metadata: row
                    .get::<_, Option<String>>("dep_metadata")?
                    .unwrap_or_default(),
            };
            Ok((dep, issue))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Traverses the dependency graph from a root.
    ///
    /// Node uniqueness is by exact id; `bd-1` never swallows `bd-10`.
    /// `show_all_paths` re-emits nodes reached along different paths.
    /// External refs appear as synthetic leaf nodes.
    pub fn get_dependency_tree_impl(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>> {
        let conn = self.lock_conn()?;

        let root = get_issue_on_conn(&conn, issue_id)?;
        let mut result = vec![TreeNode {
            issue: root,
            depth: 0,
            dep_type: DependencyType::Blocks,
            truncated: false,
        }];
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(issue_id.to_string());

        let mut queue: VecDeque<(String, i32)> = VecDeque::new();
        queue.push_back((issue_id.to_string(), 0));

        let sql = if reverse {
            "SELECT d.issue_id, d.type FROM dependencies d WHERE d.depends_on_id = ?1"
        } else {
            "SELECT d.depends_on_id, d.type FROM dependencies d WHERE d.issue_id = ?1"
        };

        while let Some((current_id, depth)) = queue.pop_front() {
            self.cancel.check()?;
            if depth >= max_depth {
                continue;
            }

            let mut stmt = conn.prepare_cached(sql)?;
            let edges: Vec<(String, String)> = stmt
                .query_map(params![current_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;

            for (next_id, dep_type_str) in edges {
                if !show_all_paths && visited.contains(&next_id) {
                    continue;
                }
                visited.insert(next_id.clone());
                let dep_type = DependencyType::from(dep_type_str.as_str());
                let next_depth = depth + 1;

                if is_external_ref(&next_id) {
                    // Synthetic leaf standing in for the foreign capability.
                    let mut synthetic = Issue::default();
                    synthetic.id = next_id.clone();
                    synthetic.title = next_id.clone();
                    synthetic.status = Status::Custom("blocked-until-resolved".into());
                    result.push(TreeNode {
                        issue: synthetic,
                        depth: next_depth,
                        dep_type,
                        truncated: false,
                    });
                    continue;
                }

                let issue = match get_issue_on_conn(&conn, &next_id) {
                    Ok(issue) => issue,
                    Err(StorageError::NotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };

                let has_more = {
                    let mut stmt = conn.prepare_cached(sql)?;
                    stmt.exists(params![next_id])?
                };
                result.push(TreeNode {
                    issue,
                    depth: next_depth,
                    dep_type,
                    truncated: next_depth >= max_depth && has_more,
                });
                queue.push_back((next_id, next_depth));
            }
        }

        Ok(result)
    }

    /// Diagnostic cycle enumeration.
    pub fn detect_cycles_impl(&self) -> Result<Vec<Vec<String>>> {
        let conn = self.lock_conn()?;
        detect_cycles_on_conn(&conn, &self.cancel)
    }

    /// Bulk dependency/dependent counts. Missing ids return (0, 0).
    pub fn get_dependency_counts_impl(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, DependencyCounts)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let mut counts: HashMap<String, DependencyCounts> = ids
            .iter()
            .map(|id| (id.clone(), DependencyCounts::default()))
            .collect();

        let sql = format!(
            "SELECT issue_id, COUNT(*) FROM dependencies
             WHERE issue_id IN ({placeholders}) GROUP BY issue_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?))
        })?;
        for row in rows {
            let (id, n) = row?;
            if let Some(c) = counts.get_mut(&id) {
                c.dependency_count = n;
            }
        }

        let sql = format!(
            "SELECT depends_on_id, COUNT(*) FROM dependencies
             WHERE depends_on_id IN ({placeholders}) GROUP BY depends_on_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?))
        })?;
        for row in rows {
            let (id, n) = row?;
            if let Some(c) = counts.get_mut(&id) {
                c.dependent_count = n;
            }
        }

        Ok(ids
            .iter()
            .map(|id| (id.clone(), counts[id]))
            .collect())
    }
}
