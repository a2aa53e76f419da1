//! JSONL export: database -> append log, grouped by source repo.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, info};

use braid_core::dependency::Dependency;
use braid_core::enums::DependencyType;
use braid_core::issue::Issue;

use crate::error::{Result, StorageError};
use crate::sqlite::SqliteStore;
use crate::sqlite::issues::{ISSUE_COLUMNS, format_datetime, parse_datetime, scan_issue};
use crate::sync::{braid_dir, jsonl_path, mtime_ns, resolve_repo_dir};

/// Result of an export run.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    /// Files written: `(source_repo, path, issue count)`.
    pub files: Vec<(String, PathBuf, usize)>,
    /// Every exported issue id.
    pub exported_ids: Vec<String>,
}

/// Exports all non-ephemeral issues (tombstones included, so deletions
/// propagate) to one JSONL file per source repo, each written atomically.
pub fn export_repos(store: &SqliteStore, root: &Path) -> Result<ExportSummary> {
    let mut by_repo: HashMap<String, Vec<Issue>> = HashMap::new();

    {
        let conn = store.lock_conn()?;

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE ephemeral = 0 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut issues: Vec<Issue> = stmt
            .query_map([], scan_issue)?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);

        // Attach dependencies and labels in bulk; per-issue queries would be
        // an N+1 on every export.
        let mut deps_by_issue: HashMap<String, Vec<Dependency>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at, created_by, metadata
             FROM dependencies ORDER BY issue_id, depends_on_id, type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Dependency {
                issue_id: row.get(0)?,
                depends_on_id: row.get(1)?,
                dep_type: DependencyType::from(row.get::<_, String>(2)?),
                created_at: parse_datetime(&row.get::<_, String>(3)?),
                created_by: row.get(4)?,
                metadata: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            })
        })?;
        for row in rows {
            let dep = row?;
            deps_by_issue.entry(dep.issue_id.clone()).or_default().push(dep);
        }
        drop(stmt);

        let mut labels_by_issue: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt =
            conn.prepare("SELECT issue_id, label FROM labels ORDER BY issue_id, label")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (issue_id, label) = row?;
            labels_by_issue.entry(issue_id).or_default().push(label);
        }
        drop(stmt);

        for issue in &mut issues {
            store.cancel_token().check()?;
            if let Some(deps) = deps_by_issue.remove(&issue.id) {
                issue.dependencies = deps;
            }
            if let Some(labels) = labels_by_issue.remove(&issue.id) {
                issue.labels = labels;
            }
        }

        for issue in issues {
            let repo = if issue.source_repo.is_empty() {
                ".".to_string()
            } else {
                issue.source_repo.clone()
            };
            by_repo.entry(repo).or_default().push(issue);
        }
    }

    // Write files outside the connection lock.
    let mut summary = ExportSummary::default();
    let mut repos: Vec<&String> = by_repo.keys().collect();
    repos.sort();
    for repo in repos {
        store.cancel_token().check()?;
        let issues = &by_repo[repo];
        let repo_dir = resolve_repo_dir(root, repo);
        let target = jsonl_path(&repo_dir);
        write_jsonl_atomic(&braid_dir(&repo_dir), &target, issues)?;

        let mtime = mtime_ns(&target)?;
        record_repo_mtime(store, &repo_dir, &target, mtime)?;

        info!(repo = %repo, path = %target.display(), count = issues.len(), "exported JSONL");
        summary.files.push((repo.clone(), target, issues.len()));
        summary
            .exported_ids
            .extend(issues.iter().map(|i| i.id.clone()));
    }

    finalize_export(store, &summary)?;

    Ok(summary)
}

/// Writes issues to `<target>.tmp.<pid>` and renames over the target.
/// Partial writes are never observable at the final path.
fn write_jsonl_atomic(dir: &Path, target: &Path, issues: &[Issue]) -> Result<()> {
    fs::create_dir_all(dir)?;
    set_mode(dir, 0o755);

    // A symlinked log file is followed so the rename lands on the real file
    // and the link survives.
    let is_symlink = fs::symlink_metadata(target)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    let final_target = if is_symlink {
        fs::read_link(target).map(|dest| {
            if dest.is_absolute() {
                dest
            } else {
                target.parent().unwrap_or(Path::new(".")).join(dest)
            }
        })?
    } else {
        target.to_path_buf()
    };

    let tmp = final_target.with_file_name(format!(
        "{}.tmp.{}",
        final_target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "issues.jsonl".to_string()),
        std::process::id()
    ));

    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        for issue in issues {
            serde_json::to_writer(&mut writer, issue)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?
            .sync_all()?;
    }

    if !is_symlink {
        set_mode(&tmp, 0o644);
    }
    fs::rename(&tmp, &final_target)?;
    debug!(path = %final_target.display(), "atomic rename complete");
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

/// Records the post-write mtime so the next hydrate skips our own file.
fn record_repo_mtime(
    store: &SqliteStore,
    repo_dir: &Path,
    jsonl: &Path,
    mtime: i64,
) -> Result<()> {
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

/// Clears dirty markers and records per-issue export hashes.
fn finalize_export(store: &SqliteStore, summary: &ExportSummary) -> Result<()> {
    if summary.exported_ids.is_empty() {
        return Ok(());
    }
    let conn = store.lock_conn()?;
    let now_str = format_datetime(&Utc::now());

    let placeholders = summary
        .exported_ids
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(",");
    conn.execute(
        &format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})"),
        rusqlite::params_from_iter(summary.exported_ids.iter()),
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO export_hashes (issue_id, content_hash, exported_at)
         SELECT id, content_hash, ?2 FROM issues WHERE id = ?1",
    )?;
    for id in &summary.exported_ids {
        stmt.execute(params![id, now_str])?;
    }

    Ok(())
}
