//! Tiered compaction planner for [`SqliteStore`].
//!
//! Compaction is a metadata-only state transition here: the actual text
//! summarization happens in an external collaborator before `apply` is
//! called. Level is a monotone counter 0 -> 1 -> 2; it is not a status.

use chrono::{Duration, Utc};
use rusqlite::{Connection, params};

use braid_core::enums::{EventType, Status};

use crate::error::{Result, StorageError};
use crate::sqlite::comments::event_count_on_conn;
use crate::sqlite::config::config_i64;
use crate::sqlite::issues::{emit_event, format_datetime, get_issue_on_conn, mark_dirty_on_conn};
use crate::sqlite::store::SqliteStore;
use crate::traits::{CompactionTier, Eligibility};

/// Edge types whose dependents protect a closed issue from tier-1
/// compaction while still open.
const BLOCKING_DEPENDENT_TYPES: &str =
    "('blocks', 'parent-child', 'conditional-blocks', 'waits-for', 'tracks')";

/// Returns `true` if any open dependent is reachable within `levels` hops:
/// one hop to the blocking dependents, then parent-child expansion.
fn has_open_dependents_within(conn: &Connection, id: &str, levels: i64) -> Result<bool> {
    let sql = format!(
        "WITH RECURSIVE dependents(id, lvl) AS (
             SELECT d.issue_id, 1 FROM dependencies d
             WHERE d.depends_on_id = ?1 AND d.type IN {BLOCKING_DEPENDENT_TYPES}
             UNION
             SELECT d2.issue_id, dep.lvl + 1 FROM dependencies d2
             INNER JOIN dependents dep ON d2.depends_on_id = dep.id
             WHERE d2.type = 'parent-child' AND dep.lvl < ?2
         )
         SELECT 1 FROM dependents dd
         INNER JOIN issues di ON di.id = dd.id
         WHERE di.status NOT IN ('closed', 'tombstone')
         LIMIT 1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.exists(params![id, levels])?)
}

/// Returns `true` if any open dependent points directly at the issue.
fn has_open_blocking_dependents(conn: &Connection, id: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM dependencies d
         INNER JOIN issues di ON di.id = d.issue_id
         WHERE d.depends_on_id = ?1
           AND d.type IN {BLOCKING_DEPENDENT_TYPES}
           AND di.status NOT IN ('closed', 'tombstone')
         LIMIT 1"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.exists(params![id])?)
}

impl SqliteStore {
    /// Returns candidate ids for the given compaction tier, oldest close
    /// first.
    pub fn get_compaction_candidates_impl(&self, tier: CompactionTier) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;

        match tier {
            CompactionTier::Tier1 => {
                let days = config_i64(&conn, "compact_tier1_days", 30);
                let dep_levels = config_i64(&conn, "compact_tier1_dep_levels", 2);
                let cutoff = format_datetime(&(Utc::now() - Duration::days(days)));

                let mut stmt = conn.prepare(
                    "SELECT id FROM issues
                     WHERE status = 'closed'
                       AND closed_at IS NOT NULL AND closed_at <= ?1
                       AND compaction_level = 0
                       AND pinned = 0
                     ORDER BY closed_at ASC",
                )?;
                let base: Vec<String> = stmt
                    .query_map(params![cutoff], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut out = Vec::new();
                for id in base {
                    self.cancel.check()?;
                    if !has_open_dependents_within(&conn, &id, dep_levels)? {
                        out.push(id);
                    }
                }
                Ok(out)
            }
            CompactionTier::Tier2 => {
                let days = config_i64(&conn, "compact_tier2_days", 90);
                let commits = config_i64(&conn, "compact_tier2_commits", 100);
                let cutoff = format_datetime(&(Utc::now() - Duration::days(days)));

                let mut stmt = conn.prepare(
                    "SELECT id FROM issues
                     WHERE status = 'closed'
                       AND closed_at IS NOT NULL AND closed_at <= ?1
                       AND compaction_level = 1
                       AND pinned = 0
                     ORDER BY closed_at ASC",
                )?;
                let base: Vec<String> = stmt
                    .query_map(params![cutoff], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut out = Vec::new();
                for id in base {
                    self.cancel.check()?;
                    if event_count_on_conn(&conn, &id)? >= commits
                        && !has_open_blocking_dependents(&conn, &id)?
                    {
                        out.push(id);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Fine-grained eligibility report for a single issue and tier.
    pub fn check_compaction_eligibility_impl(
        &self,
        id: &str,
        tier: CompactionTier,
    ) -> Result<Eligibility> {
        let conn = self.lock_conn()?;
        let issue = get_issue_on_conn(&conn, id)?;

        let not_eligible = |reason: &str| Eligibility {
            eligible: false,
            reason: Some(reason.to_string()),
        };

        if issue.status != Status::Closed {
            return Ok(not_eligible("issue is not closed"));
        }
        let Some(closed_at) = issue.closed_at else {
            return Ok(not_eligible("issue has no closed_at timestamp"));
        };
        if issue.pinned {
            return Ok(not_eligible("issue is pinned"));
        }
        if issue.compaction_level >= tier.level() {
            return Ok(not_eligible("issue is already compacted at this level"));
        }

        match tier {
            CompactionTier::Tier1 => {
                let days = config_i64(&conn, "compact_tier1_days", 30);
                let dep_levels = config_i64(&conn, "compact_tier1_dep_levels", 2);
                if closed_at > Utc::now() - Duration::days(days) {
                    return Ok(not_eligible("issue closed too recently"));
                }
                if has_open_dependents_within(&conn, id, dep_levels)? {
                    return Ok(not_eligible("open dependents within protected range"));
                }
            }
            CompactionTier::Tier2 => {
                if issue.compaction_level != 1 {
                    return Ok(not_eligible("issue is not at compaction level 1"));
                }
                let days = config_i64(&conn, "compact_tier2_days", 90);
                let commits = config_i64(&conn, "compact_tier2_commits", 100);
                if closed_at > Utc::now() - Duration::days(days) {
                    return Ok(not_eligible("issue closed too recently"));
                }
                if event_count_on_conn(&conn, id)? < commits {
                    return Ok(not_eligible("issue has too little recorded activity"));
                }
                if has_open_blocking_dependents(&conn, id)? {
                    return Ok(not_eligible("open blocking dependents"));
                }
            }
        }

        Ok(Eligibility {
            eligible: true,
            reason: None,
        })
    }

    /// Persists a compaction transition. The text rewrite happened upstream;
    /// this snapshots the current heavy fields, stamps the metadata, and
    /// emits a "compacted" event carrying the size accounting.
    pub fn apply_compaction_impl(
        &self,
        id: &str,
        tier: CompactionTier,
        commit: Option<&str>,
        original_size: i64,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let issue = get_issue_on_conn(&tx, id)?;
        let now = Utc::now();
        let now_str = format_datetime(&now);

        // Keep an auditable copy of the (already rewritten) heavy fields.
        let fields = serde_json::json!({
            "description": issue.description,
            "design": issue.design,
            "acceptance_criteria": issue.acceptance_criteria,
            "notes": issue.notes,
        });
        tx.execute(
            "INSERT OR REPLACE INTO issue_snapshots (issue_id, compaction_level, fields, taken_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, tier.level(), fields.to_string(), now_str],
        )?;

        tx.execute(
            "UPDATE issues SET compaction_level = ?2, compacted_at = ?3,
             compacted_at_commit = ?4, original_size = ?5, updated_at = ?3
             WHERE id = ?1",
            params![id, tier.level(), now_str, commit, original_size],
        )?;

        let compressed_size = issue.text_size();
        let reduction_pct = if original_size > 0 {
            ((original_size - compressed_size) as f64 / original_size as f64 * 100.0).round()
        } else {
            0.0
        };
        let payload = serde_json::json!({
            "level": tier.level(),
            "original_size": original_size,
            "compressed_size": compressed_size,
            "reduction_pct": reduction_pct,
        });
        emit_event(
            &tx,
            id,
            EventType::Compacted,
            actor,
            None,
            Some(&payload.to_string()),
            None,
            &now_str,
        )?;
        mark_dirty_on_conn(&tx, id)?;

        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }
}
