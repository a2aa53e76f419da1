//! Resurrection: reconstructing deleted ancestors from JSONL history.
//!
//! When a hierarchical child is created whose parent no longer exists (a
//! clone deleted it, or history diverged), the parent is rebuilt from the
//! most recent JSONL record so the child stays referentially consistent.
//! Resurrected issues come back closed at the lowest priority with a marked
//! description; they are placeholders, not live work.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, warn};

use braid_core::content_hash::compute_content_hash;
use braid_core::dependency::is_external_ref;
use braid_core::enums::Status;
use braid_core::issue::Issue;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::sqlite::SqliteStore;
use crate::sqlite::issues::{id_exists, insert_issue_row, mark_dirty_on_conn};

/// Line buffer matching the hydrate reader.
const LINE_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Attempts to reconstruct a missing issue from JSONL history.
///
/// Scans every JSONL file known to the repo-mtime cache; the *last* valid
/// record for the id wins (append-only log semantics). Malformed lines are
/// skipped with a warning. Returns `Ok(false)` when no record was found;
/// already-present ids return `Ok(true)` without touching anything.
pub(crate) fn resurrect_issue_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    id: &str,
) -> Result<bool> {
    if id_exists(conn, id)? {
        return Ok(true);
    }

    let Some(record) = find_last_record(conn, cancel, id)? else {
        debug!(id, "no JSONL record to resurrect from");
        return Ok(false);
    };

    let tombstone = build_resurrected(&record);
    insert_issue_row(conn, &tombstone)?;
    mark_dirty_on_conn(conn, id)?;

    // Best effort: re-link edges whose other endpoint still exists.
    for dep in &record.dependencies {
        cancel.check()?;
        let target_ok =
            is_external_ref(&dep.depends_on_id) || id_exists(conn, &dep.depends_on_id)?;
        if !target_ok {
            continue;
        }
        conn.execute(
            "INSERT OR IGNORE INTO dependencies
             (issue_id, depends_on_id, type, created_at, created_by, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                crate::sqlite::issues::format_datetime(&dep.created_at),
                dep.created_by,
                dep.metadata,
            ],
        )?;
    }

    debug!(id, "resurrected from JSONL history");
    Ok(true)
}

/// Shapes the resurrected placeholder from the historical record.
fn build_resurrected(record: &Issue) -> Issue {
    let mut issue = Issue::default();
    issue.id = record.id.clone();
    issue.content_hash = record.content_hash.clone();
    issue.title = record.title.clone();
    issue.description = format!(
        "[RESURRECTED] This issue was deleted but is still referenced by other issues.\n\n\
         Original description:\n{}",
        record.description
    );
    issue.status = Status::Closed;
    issue.priority = 4;
    issue.issue_type = record.issue_type.clone();
    issue.created_at = record.created_at;
    issue.created_by = record.created_by.clone();
    issue.updated_at = Utc::now();
    issue.closed_at = Some(Utc::now());
    issue.close_reason = "resurrected as placeholder".to_string();
    issue.source_repo = ".".to_string();
    if issue.content_hash.is_empty() {
        issue.content_hash = compute_content_hash(&issue);
    }
    issue
}

/// Scans all known JSONL files for the last valid record of `id`.
fn find_last_record(
    conn: &Connection,
    cancel: &CancelToken,
    id: &str,
) -> Result<Option<Issue>> {
    let mut stmt = conn.prepare("SELECT jsonl_path FROM repo_mtimes ORDER BY repo_path")?;
    let paths: Vec<PathBuf> = stmt
        .query_map([], |row| row.get::<_, String>(0).map(PathBuf::from))?
        .collect::<rusqlite::Result<_>>()?;
    drop(stmt);

    let mut found: Option<Issue> = None;
    for path in paths {
        cancel.check()?;
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let mut reader = BufReader::with_capacity(LINE_BUFFER_BYTES, file);
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            // Cheap pre-filter before a full parse.
            if !trimmed.contains(id) {
                continue;
            }
            match serde_json::from_str::<Issue>(trimmed) {
                Ok(issue) if issue.id == id => found = Some(issue),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), line = line_no, error = %e,
                          "skipping malformed JSONL line");
                }
            }
        }
    }
    Ok(found)
}

// ---------------------------------------------------------------------------
// SqliteStore methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Resurrects a missing issue (and nothing else) from JSONL history.
    /// Returns `false` when no history record exists.
    pub fn resurrect_issue_impl(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        resurrect_issue_on_conn(&conn, &self.cancel, id)
    }
}
