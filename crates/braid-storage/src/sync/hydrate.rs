//! JSONL hydrate: append log -> database, with mtime skip cache and
//! foreign-key-deferred bulk import.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use braid_core::content_hash::compute_content_hash;
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::SqliteStore;
use crate::sqlite::issues::{
    apply_defensive_fixes, format_datetime, get_issue_on_conn, insert_issue_row, update_issue_row,
};
use crate::sync::{jsonl_path, mtime_ns, resolve_repo_dir};

/// Line buffer sized for issues with very large text fields.
const LINE_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Result of a hydrate run.
#[derive(Debug, Clone, Default)]
pub struct HydrateSummary {
    pub repos_checked: usize,
    /// Repos skipped because the JSONL mtime matched the cache.
    pub repos_skipped: usize,
    /// Newly inserted issues.
    pub imported: usize,
    /// Issues updated because their content hash changed.
    pub updated: usize,
    /// Issues left alone (hash match).
    pub unchanged: usize,
}

/// Hydrates every configured repo whose JSONL file changed since the last
/// check. `root` is the primary repository directory.
pub fn hydrate_repos(store: &SqliteStore, root: &Path) -> Result<HydrateSummary> {
    let mut summary = HydrateSummary::default();
    let repos = configured_repos(store)?;

    let mut any_imported = false;
    for repo_key in repos {
        store.cancel_token().check()?;
        summary.repos_checked += 1;

        let repo_dir = resolve_repo_dir(root, &repo_key);
        let jsonl = jsonl_path(&repo_dir);

        // No-follow stat: a symlinked log is keyed by the link's own mtime.
        let mtime = match mtime_ns(&jsonl) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(repo = %repo_key, "no JSONL file, skipping");
                continue;
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        if Some(mtime) == cached_mtime(store, &repo_dir)? {
            debug!(repo = %repo_key, "JSONL unchanged, skipping");
            summary.repos_skipped += 1;
            continue;
        }

        hydrate_file(store, &repo_key, &jsonl, &mut summary)?;
        any_imported = true;

        record_mtime(store, &repo_dir, &jsonl, mtime)?;
        info!(repo = %repo_key, path = %jsonl.display(), "hydrated");
    }

    if any_imported {
        store.rebuild_blocked_cache_impl()?;
    }

    Ok(summary)
}

/// The repo set: the primary repo (`"."`) plus `multirepo.additional`.
fn configured_repos(store: &SqliteStore) -> Result<Vec<String>> {
    let conn = store.lock_conn()?;
    let primary = crate::sqlite::config::get_config_on_conn(&conn, "multirepo.primary")
        .unwrap_or_else(|| ".".to_string());
    let additional =
        crate::sqlite::config::get_config_on_conn(&conn, "multirepo.additional").unwrap_or_default();

    let mut repos = vec![primary];
    for extra in additional.split(',') {
        let extra = extra.trim();
        if !extra.is_empty() {
            repos.push(extra.to_string());
        }
    }
    Ok(repos)
}

fn cached_mtime(store: &SqliteStore, repo_dir: &Path) -> Result<Option<i64>> {
    let conn = store.lock_conn()?;
    let abs = repo_dir
        .canonicalize()
        .unwrap_or_else(|_| repo_dir.to_path_buf());
    let cached = conn
        .query_row(
            "SELECT mtime_ns FROM repo_mtimes WHERE repo_path = ?1",
            params![abs.to_string_lossy()],
            |row| row.get::<_, i64>(0),
        )
        .ok();
    Ok(cached)
}

fn record_mtime(store: &SqliteStore, repo_dir: &Path, jsonl: &Path, mtime: i64) -> Result<()> {
    let conn = store.lock_conn()?;
    let abs = repo_dir
        .canonicalize()
        .unwrap_or_else(|_| repo_dir.to_path_buf());
    conn.execute(
        "INSERT OR REPLACE INTO repo_mtimes (repo_path, jsonl_path, mtime_ns, last_checked)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            abs.to_string_lossy(),
            jsonl.to_string_lossy(),
            mtime,
            format_datetime(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Unconditionally imports one JSONL file inside a single transaction on a
/// dedicated connection with foreign keys deferred.
pub fn hydrate_file(
    store: &SqliteStore,
    repo_key: &str,
    jsonl: &Path,
    summary: &mut HydrateSummary,
) -> Result<()> {
    let db_path = store.path().ok_or_else(|| {
        StorageError::Internal("hydrate requires a file-backed database".into())
    })?;

    // Dedicated connection: the import holds a long transaction and must
    // not contend with the store's pooled readers for its pragmas.
    let conn = Connection::open(db_path)
        .map_err(|e| StorageError::Connection(format!("failed to open {}: {e}", db_path.display())))?;
    conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA busy_timeout = 5000;")
        .map_err(|e| StorageError::Connection(format!("failed to set pragmas: {e}")))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

    let file = File::open(jsonl)?;
    let mut reader = BufReader::with_capacity(LINE_BUFFER_BYTES, file);
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        store.cancel_token().check()?;
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut issue: Issue = serde_json::from_str(trimmed).map_err(|e| {
            StorageError::Internal(format!(
                "invalid JSONL at {}:{line_no}: {e}",
                jsonl.display()
            ))
        })?;

        issue.set_defaults();
        issue.source_repo = repo_key.to_string();
        apply_defensive_fixes(&mut issue);
        if issue.content_hash.is_empty() {
            issue.content_hash = compute_content_hash(&issue);
        }

        upsert_issue(&tx, &mut issue, summary)?;

        // Edges and labels recur legitimately across exports.
        for dep in &issue.dependencies {
            tx.execute(
                "INSERT OR IGNORE INTO dependencies
                 (issue_id, depends_on_id, type, created_at, created_by, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    issue.id,
                    dep.depends_on_id,
                    dep.dep_type.as_str(),
                    format_datetime(&dep.created_at),
                    dep.created_by,
                    dep.metadata,
                ],
            )?;
        }
        for label in &issue.labels {
            tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
                params![issue.id, label],
            )?;
        }
    }

    // Integrity gate before commit: foreign keys were deferred, so probe
    // explicitly and fail the whole transaction on the first offender.
    check_integrity(&tx)?;

    tx.commit()
        .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| StorageError::Connection(format!("failed to re-enable FKs: {e}")))?;

    Ok(())
}

/// Clone-local fields are absent from JSONL when unset; absence must not be
/// read as "clear them".
fn coalesce_clone_local(incoming: &mut Issue, existing: &Issue) {
    if !incoming.pinned {
        incoming.pinned = existing.pinned;
    }
    if incoming.await_type.is_empty() {
        incoming.await_type = existing.await_type.clone();
    }
    if incoming.await_id.is_empty() {
        incoming.await_id = existing.await_id.clone();
    }
    if incoming.timeout.is_none() {
        incoming.timeout = existing.timeout;
    }
    if incoming.waiters.is_empty() {
        incoming.waiters = existing.waiters.clone();
    }
}

fn upsert_issue(
    tx: &Connection,
    incoming: &mut Issue,
    summary: &mut HydrateSummary,
) -> Result<()> {
    // External-ref match takes priority over id match: the same tracked
    // item may carry different generated ids in diverged clones, but its
    // external reference is globally unique.
    if let Some(ref ext) = incoming.external_ref {
        let matched: Option<String> = tx
            .query_row(
                "SELECT id FROM issues WHERE external_ref = ?1",
                params![ext],
                |row| row.get(0),
            )
            .ok();
        if let Some(existing_id) = matched {
            if existing_id != incoming.id {
                incoming.id = existing_id;
            }
        }
    }

    match get_issue_on_conn(tx, &incoming.id) {
        Err(StorageError::NotFound { .. }) => {
            insert_issue_row(tx, incoming)?;
            summary.imported += 1;
        }
        Ok(existing) => {
            if existing.content_hash == incoming.content_hash {
                summary.unchanged += 1;
                return Ok(());
            }
            coalesce_clone_local(incoming, &existing);
            update_issue_row(tx, incoming)?;
            summary.updated += 1;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

/// Foreign-key probe plus the orphan-local-dependency probe (the
/// `depends_on_id` column deliberately has no FK so external refs are
/// representable; dangling local targets are still a corruption).
fn check_integrity(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
        let table: String = row.get(0)?;
        let parent: String = row.get(2).unwrap_or_else(|_| "?".to_string());
        return Err(StorageError::Integrity(format!(
            "foreign key violation in table {table} referencing {parent}"
        )));
    }
    drop(rows);
    drop(stmt);

    let orphan: Option<(String, String)> = conn
        .query_row(
            "SELECT d.issue_id, d.depends_on_id FROM dependencies d
             WHERE d.depends_on_id NOT LIKE 'external:%'
               AND NOT EXISTS (SELECT 1 FROM issues i WHERE i.id = d.depends_on_id)
             LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();
    if let Some((from, to)) = orphan {
        return Err(StorageError::Integrity(format!(
            "orphan local dependency {from} -> {to}"
        )));
    }

    Ok(())
}

/// Purges every trace of a repo that was dropped from configuration.
pub fn remove_repo(store: &SqliteStore, root: &Path, repo_key: &str) -> Result<()> {
    let repo_dir = resolve_repo_dir(root, repo_key);
    let abs = repo_dir
        .canonicalize()
        .unwrap_or_else(|_| repo_dir.to_path_buf());

    let conn = store.lock_conn()?;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

    // Edges pointing at the removed repo's issues go first; the cascade on
    // issue deletion only covers edges leaving them.
    tx.execute(
        "DELETE FROM dependencies WHERE depends_on_id IN
         (SELECT id FROM issues WHERE source_repo = ?1)",
        params![repo_key],
    )?;
    let removed = tx.execute(
        "DELETE FROM issues WHERE source_repo = ?1",
        params![repo_key],
    )?;
    tx.execute(
        "DELETE FROM repo_mtimes WHERE repo_path = ?1",
        params![abs.to_string_lossy()],
    )?;

    crate::sqlite::blocked::rebuild_blocked_cache_on_conn(&tx, store.cancel_token())?;

    tx.commit()
        .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;

    if removed > 0 {
        warn!(repo = %repo_key, removed, "removed repo issues");
    }
    Ok(())
}
