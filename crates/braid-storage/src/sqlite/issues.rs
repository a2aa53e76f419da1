//! Issue CRUD operations for [`SqliteStore`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Row, params};
use tracing::debug;

use braid_core::content_hash::compute_content_hash;
use braid_core::dependency::{Dependency, TRACKS_AUTO_CLOSE_REASON, is_external_ref};
use braid_core::enums::{DependencyType, EventType, IssueType, Status};
use braid_core::filter::IssueFilter;
use braid_core::hierarchy;
use braid_core::idgen;
use braid_core::issue::Issue;
use braid_core::validation;

use crate::cancel::CancelToken;
use crate::error::{HierarchyError, Result, StorageError};
use crate::sqlite::blocked;
use crate::sqlite::config::get_config_on_conn;
use crate::sqlite::counters;
use crate::sqlite::store::SqliteStore;
use crate::traits::IssueUpdates;

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = r#"
    id, content_hash, title, description, design, acceptance_criteria, notes,
    status, priority, issue_type, assignee, estimated_minutes,
    created_at, created_by, updated_at, closed_at, close_reason,
    deleted_at, deleted_by, delete_reason,
    external_ref, source_repo,
    compaction_level, compacted_at, compacted_at_commit, original_size,
    pinned, is_template, ephemeral,
    await_type, await_id, timeout_ns, waiters
"#;

/// Same as [`ISSUE_COLUMNS`] but prefixed with `issues.` for use in JOIN
/// queries to avoid ambiguous column names (`created_at` exists in both
/// `issues` and `dependencies`).
pub(crate) const ISSUE_COLUMNS_PREFIXED: &str = r#"
    issues.id, issues.content_hash, issues.title, issues.description, issues.design,
    issues.acceptance_criteria, issues.notes,
    issues.status, issues.priority, issues.issue_type, issues.assignee, issues.estimated_minutes,
    issues.created_at, issues.created_by, issues.updated_at, issues.closed_at, issues.close_reason,
    issues.deleted_at, issues.deleted_by, issues.delete_reason,
    issues.external_ref, issues.source_repo,
    issues.compaction_level, issues.compacted_at, issues.compacted_at_commit, issues.original_size,
    issues.pinned, issues.is_template, issues.ephemeral,
    issues.await_type, issues.await_id, issues.timeout_ns, issues.waiters
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into an [`Issue`].
///
/// The column order MUST match [`ISSUE_COLUMNS`].
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let status_str: String = row.get("status")?;
    let issue_type_str: String = row.get("issue_type")?;

    let created_at_str: String = row.get("created_at")?;
    let updated_at_str: String = row.get("updated_at")?;
    let closed_at_str: Option<String> = row.get("closed_at")?;
    let deleted_at_str: Option<String> = row.get("deleted_at")?;
    let compacted_at_str: Option<String> = row.get("compacted_at")?;

    let pinned_int: i32 = row.get("pinned")?;
    let is_template_int: i32 = row.get("is_template")?;
    let ephemeral_int: i32 = row.get("ephemeral")?;

    let timeout_ns: i64 = row.get("timeout_ns")?;
    let waiters_str: String = row.get("waiters")?;
    let waiters: Vec<String> = serde_json::from_str(&waiters_str).unwrap_or_default();

    let timeout = if timeout_ns > 0 {
        Some(std::time::Duration::from_nanos(timeout_ns as u64))
    } else {
        None
    };

    Ok(Issue {
        id: row.get("id")?,
        content_hash: row.get::<_, Option<String>>("content_hash")?.unwrap_or_default(),
        title: row.get("title")?,
        description: row.get("description")?,
        design: row.get("design")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        notes: row.get("notes")?,
        status: Status::from(status_str),
        priority: row.get("priority")?,
        issue_type: IssueType::from(issue_type_str),
        assignee: row.get::<_, Option<String>>("assignee")?.unwrap_or_default(),
        estimated_minutes: row.get("estimated_minutes")?,
        created_at: parse_datetime(&created_at_str),
        created_by: row.get::<_, Option<String>>("created_by")?.unwrap_or_default(),
        updated_at: parse_datetime(&updated_at_str),
        closed_at: closed_at_str.as_deref().map(parse_datetime),
        close_reason: row.get::<_, Option<String>>("close_reason")?.unwrap_or_default(),
        deleted_at: deleted_at_str.as_deref().map(parse_datetime),
        deleted_by: row.get::<_, Option<String>>("deleted_by")?.unwrap_or_default(),
        delete_reason: row
            .get::<_, Option<String>>("delete_reason")?
            .unwrap_or_default(),
        external_ref: row.get("external_ref")?,
        source_repo: row.get("source_repo")?,
        compaction_level: row.get("compaction_level")?,
        compacted_at: compacted_at_str.as_deref().map(parse_datetime),
        compacted_at_commit: row.get("compacted_at_commit")?,
        original_size: row.get("original_size")?,
        pinned: pinned_int != 0,
        is_template: is_template_int != 0,
        ephemeral: ephemeral_int != 0,
        await_type: row.get::<_, Option<String>>("await_type")?.unwrap_or_default(),
        await_id: row.get::<_, Option<String>>("await_id")?.unwrap_or_default(),
        timeout,
        waiters,
        // Relational data is attached by export, not by row scans.
        labels: Vec::new(),
        dependencies: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for SQLite.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from SQLite into a `DateTime<Utc>`.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

/// Returns `true` if an issue row with this id exists.
pub(crate) fn id_exists(conn: &Connection, id: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM issues WHERE id = ?1")?;
    Ok(stmt.exists(params![id])?)
}

/// Custom statuses allowed by configuration, as a comma-separated list under
/// the `statuses.custom` key.
pub(crate) fn custom_statuses(conn: &Connection) -> Vec<String> {
    get_config_on_conn(conn, "statuses.custom")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Repairs the closed-at and tombstone invariants on a record before insert.
///
/// Missing timestamps get a deterministic fallback of
/// `max(created_at, updated_at) + 1s` so re-imports agree across clones.
pub(crate) fn apply_defensive_fixes(issue: &mut Issue) {
    let fallback = || {
        let base = if issue.created_at > issue.updated_at {
            issue.created_at
        } else {
            issue.updated_at
        };
        base + Duration::seconds(1)
    };

    match issue.status {
        Status::Closed => {
            if issue.closed_at.is_none() {
                issue.closed_at = Some(fallback());
            }
        }
        Status::Tombstone => {
            if issue.deleted_at.is_none() {
                issue.deleted_at = Some(fallback());
            }
        }
        _ => {
            issue.closed_at = None;
            issue.close_reason.clear();
        }
    }
}

/// Marks an issue as changed since the last export. Re-marking refreshes the
/// timestamp. Ids without an issues row (external refs, already-purged rows)
/// are silently skipped so the dirty list never trips the foreign key.
pub(crate) fn mark_dirty_on_conn(conn: &Connection, id: &str) -> Result<()> {
    if is_external_ref(id) {
        return Ok(());
    }
    let now_str = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO dirty_issues (issue_id, marked_at)
         SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM issues WHERE id = ?1)
         ON CONFLICT(issue_id) DO UPDATE SET marked_at = excluded.marked_at",
        params![id, now_str],
    )?;
    Ok(())
}

/// Emits an event row into the events table.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            created_at,
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row insert / full-row update
// ---------------------------------------------------------------------------

/// Inserts a single issue row. A duplicate primary key or external ref maps
/// to [`StorageError::Duplicate`].
pub(crate) fn insert_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    let waiters_str = serde_json::to_string(&issue.waiters).unwrap_or_else(|_| "[]".to_string());
    let timeout_ns = issue.timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);

    let result = conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7,
                ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20,
                ?21, ?22,
                ?23, ?24, ?25, ?26,
                ?27, ?28, ?29,
                ?30, ?31, ?32, ?33
            )"
        ),
        params![
            issue.id,                                        // 1
            issue.content_hash,                              // 2
            issue.title,                                     // 3
            issue.description,                               // 4
            issue.design,                                    // 5
            issue.acceptance_criteria,                       // 6
            issue.notes,                                     // 7
            issue.status.as_str(),                           // 8
            issue.priority,                                  // 9
            issue.issue_type.as_str(),                       // 10
            issue.assignee,                                  // 11
            issue.estimated_minutes,                         // 12
            format_datetime(&issue.created_at),              // 13
            issue.created_by,                                // 14
            format_datetime(&issue.updated_at),              // 15
            issue.closed_at.as_ref().map(format_datetime),   // 16
            issue.close_reason,                              // 17
            issue.deleted_at.as_ref().map(format_datetime),  // 18
            issue.deleted_by,                                // 19
            issue.delete_reason,                             // 20
            issue.external_ref,                              // 21
            issue.source_repo,                               // 22
            issue.compaction_level,                          // 23
            issue.compacted_at.as_ref().map(format_datetime), // 24
            issue.compacted_at_commit,                       // 25
            issue.original_size,                             // 26
            issue.pinned as i32,                             // 27
            issue.is_template as i32,                        // 28
            issue.ephemeral as i32,                          // 29
            issue.await_type,                                // 30
            issue.await_id,                                  // 31
            timeout_ns,                                      // 32
            waiters_str,                                     // 33
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let detail = msg.as_deref().unwrap_or("");
            if detail.contains("external_ref") {
                Err(StorageError::duplicate(
                    "external_ref",
                    issue.external_ref.clone().unwrap_or_default(),
                ))
            } else if detail.contains("issues.id") || detail.contains("UNIQUE") {
                Err(StorageError::duplicate("issue", issue.id.clone()))
            } else {
                Err(StorageError::Query(rusqlite::Error::SqliteFailure(e, msg)))
            }
        }
        Err(e) => Err(StorageError::Query(e)),
    }
}

/// Writes every mutable column of an issue row back to the database.
pub(crate) fn update_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    let waiters_str = serde_json::to_string(&issue.waiters).unwrap_or_else(|_| "[]".to_string());
    let timeout_ns = issue.timeout.map(|d| d.as_nanos() as i64).unwrap_or(0);

    let affected = conn.execute(
        "UPDATE issues SET
            content_hash = ?2, title = ?3, description = ?4, design = ?5,
            acceptance_criteria = ?6, notes = ?7,
            status = ?8, priority = ?9, issue_type = ?10, assignee = ?11,
            estimated_minutes = ?12,
            created_at = ?13, created_by = ?14, updated_at = ?15,
            closed_at = ?16, close_reason = ?17,
            deleted_at = ?18, deleted_by = ?19, delete_reason = ?20,
            external_ref = ?21, source_repo = ?22,
            compaction_level = ?23, compacted_at = ?24, compacted_at_commit = ?25,
            original_size = ?26,
            pinned = ?27, is_template = ?28, ephemeral = ?29,
            await_type = ?30, await_id = ?31, timeout_ns = ?32, waiters = ?33
         WHERE id = ?1",
        params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            issue.priority,
            issue.issue_type.as_str(),
            issue.assignee,
            issue.estimated_minutes,
            format_datetime(&issue.created_at),
            issue.created_by,
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.close_reason,
            issue.deleted_at.as_ref().map(format_datetime),
            issue.deleted_by,
            issue.delete_reason,
            issue.external_ref,
            issue.source_repo,
            issue.compaction_level,
            issue.compacted_at.as_ref().map(format_datetime),
            issue.compacted_at_commit,
            issue.original_size,
            issue.pinned as i32,
            issue.is_template as i32,
            issue.ephemeral as i32,
            issue.await_type,
            issue.await_id,
            timeout_ns,
            waiters_str,
        ],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", &issue.id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Identifier generation
// ---------------------------------------------------------------------------

/// Generates a collision-free id for a new issue.
///
/// The suffix length adapts to the database size but never shrinks: the
/// current floor is persisted under the `id_length` metadata key.
pub(crate) fn generate_issue_id(conn: &Connection, issue: &Issue, actor: &str) -> Result<String> {
    let prefix =
        get_config_on_conn(conn, "issue_prefix").unwrap_or_else(|| "bd".to_string());
    let min_length: usize = get_config_on_conn(conn, "min_hash_length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(idgen::adaptive_defaults::MIN_LENGTH);
    let max_prob: f64 = get_config_on_conn(conn, "max_collision_prob")
        .and_then(|v| v.parse().ok())
        .unwrap_or(idgen::adaptive_defaults::MAX_COLLISION_PROB);

    let count: usize = conn
        .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get::<_, i64>(0))
        .unwrap_or(0) as usize;

    let adaptive = idgen::compute_adaptive_length(
        count,
        min_length,
        idgen::adaptive_defaults::MAX_LENGTH,
        max_prob,
    );

    // The length floor only ever moves up within a database lifetime.
    let floor: usize = crate::sqlite::config::get_metadata_on_conn(conn, "id_length")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let length = adaptive.max(floor).max(min_length);
    if length > floor {
        crate::sqlite::config::set_metadata_on_conn(conn, "id_length", &length.to_string())?;
    }

    let mut nonce = 0;
    loop {
        let id = idgen::generate_hash_id(
            &prefix,
            &issue.title,
            &issue.description,
            actor,
            issue.created_at,
            length,
            nonce,
        );
        if !id_exists(conn, &id)? {
            return Ok(id);
        }
        debug!(id, nonce, "id collision, bumping nonce");
        nonce += 1;
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Creates an issue on the given connection: fills defaults, validates,
/// verifies hierarchical parents (resurrecting from JSONL history when
/// possible), performs a strict insert, records the creation event, marks
/// the id dirty, and refreshes the blocked cache.
pub(crate) fn create_issue_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    issue: &Issue,
    actor: &str,
) -> Result<String> {
    cancel.check()?;

    let mut record = issue.clone();
    record.set_defaults();
    if record.created_by.is_empty() {
        record.created_by = actor.to_string();
    }
    if record.id.is_empty() {
        record.id = generate_issue_id(conn, &record, actor)?;
    }

    let mut parent: Option<String> = None;
    if let Some(p) = hierarchy::parent_of(&record.id) {
        counters::check_depth(conn, &record.id)?;
        ensure_ancestors_exist(conn, cancel, &record.id)?;
        parent = Some(p.to_string());
    }

    apply_defensive_fixes(&mut record);
    let statuses = custom_statuses(conn);
    let status_refs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    validation::validate_for_import(&record, &status_refs)?;

    record.content_hash = compute_content_hash(&record);
    insert_issue_row(conn, &record)?;

    let now_str = format_datetime(&Utc::now());
    emit_event(conn, &record.id, EventType::Created, actor, None, None, None, &now_str)?;
    mark_dirty_on_conn(conn, &record.id)?;

    if let Some(parent_id) = parent {
        // Bring the counter forward so auto-allocation skips this number.
        let tail = record.id.rsplit('.').next().unwrap_or("0");
        if let Ok(n) = tail.parse::<i64>() {
            counters::bring_counter_forward(conn, &parent_id, n)?;
        }
        // Hierarchical children are linked to their parent automatically.
        let dep = Dependency {
            issue_id: record.id.clone(),
            depends_on_id: parent_id,
            dep_type: DependencyType::ParentChild,
            created_at: Utc::now(),
            created_by: actor.to_string(),
            metadata: String::new(),
        };
        crate::sqlite::dependencies::add_dependency_on_conn(conn, cancel, &dep, actor)?;
    }

    blocked::update_blocked_cache_for(conn, cancel, &[record.id.clone()])?;

    Ok(record.id)
}

/// Verifies that every hierarchical ancestor of `id` exists, resurrecting
/// missing ones from JSONL history as tombstones.
fn ensure_ancestors_exist(conn: &Connection, cancel: &CancelToken, id: &str) -> Result<()> {
    for ancestor in hierarchy::ancestor_chain(id) {
        cancel.check()?;
        if id_exists(conn, &ancestor)? {
            continue;
        }
        if !crate::sync::resurrect::resurrect_issue_on_conn(conn, cancel, &ancestor)? {
            return Err(StorageError::Hierarchy(HierarchyError::MissingParent {
                id: id.to_string(),
                parent: ancestor,
            }));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Update / close / delete
// ---------------------------------------------------------------------------

/// Applies partial updates on the given connection.
pub(crate) fn update_issue_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    id: &str,
    updates: &IssueUpdates,
    actor: &str,
) -> Result<()> {
    cancel.check()?;

    // Tombstones are only reachable through delete.
    if matches!(updates.status, Some(Status::Tombstone)) {
        return Err(validation::ValidationError::TombstoneViaUpdate.into());
    }

    let mut issue = get_issue_on_conn(conn, id)?;
    let original = issue.clone();
    let old_status = issue.status.clone();

    if let Some(ref v) = updates.title {
        issue.title = v.clone();
    }
    if let Some(ref v) = updates.description {
        issue.description = v.clone();
    }
    if let Some(ref v) = updates.design {
        issue.design = v.clone();
    }
    if let Some(ref v) = updates.acceptance_criteria {
        issue.acceptance_criteria = v.clone();
    }
    if let Some(ref v) = updates.notes {
        issue.notes = v.clone();
    }
    if let Some(v) = updates.priority {
        issue.priority = v;
    }
    if let Some(ref v) = updates.issue_type {
        issue.issue_type = v.clone();
    }
    if let Some(ref v) = updates.assignee {
        issue.assignee = v.clone();
    }
    if let Some(ref v) = updates.estimated_minutes {
        issue.estimated_minutes = *v;
    }
    if let Some(ref v) = updates.close_reason {
        issue.close_reason = v.clone();
    }
    if let Some(ref v) = updates.external_ref {
        issue.external_ref = v.clone();
    }
    if let Some(v) = updates.pinned {
        issue.pinned = v;
    }
    if let Some(v) = updates.is_template {
        issue.is_template = v;
    }
    if let Some(ref v) = updates.await_type {
        issue.await_type = v.clone();
    }
    if let Some(ref v) = updates.await_id {
        issue.await_id = v.clone();
    }
    if let Some(ref v) = updates.timeout {
        issue.timeout = *v;
    }
    if let Some(ref v) = updates.waiters {
        issue.waiters = v.clone();
    }

    // Status transitions and their side effects.
    if let Some(ref new_status) = updates.status {
        issue.status = new_status.clone();
        match new_status {
            Status::Closed => {
                if issue.closed_at.is_none() {
                    issue.closed_at = Some(Utc::now());
                }
            }
            _ => {
                issue.closed_at = None;
                issue.close_reason.clear();
            }
        }
    }

    let statuses = custom_statuses(conn);
    let status_refs: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    validation::validate_for_import(&issue, &status_refs)?;

    issue.updated_at = Utc::now();
    issue.content_hash = compute_content_hash(&issue);
    update_issue_row(conn, &issue)?;

    let now_str = format_datetime(&issue.updated_at);
    let event_type = match (&old_status, &issue.status) {
        (old, new) if old == new => EventType::Updated,
        (Status::Closed, new) if new.is_active() => EventType::Reopened,
        _ => EventType::StatusChanged,
    };
    let (old_val, new_val) = if old_status == issue.status {
        // Record which fields moved so history stays useful.
        let changed = braid_core::diff::changed_fields(&original, &issue);
        (None, Some(changed.join(",")))
    } else {
        (Some(old_status.as_str().to_string()), Some(issue.status.as_str().to_string()))
    };
    emit_event(
        conn,
        id,
        event_type,
        actor,
        old_val.as_deref(),
        new_val.as_deref(),
        None,
        &now_str,
    )?;
    mark_dirty_on_conn(conn, id)?;

    // Status, pinning, and gate fields all feed the blocked computation of
    // this issue and anything that depends on it.
    let mut seeds = vec![id.to_string()];
    seeds.extend(crate::sqlite::dependencies::dependent_ids_on_conn(conn, id)?);
    blocked::update_blocked_cache_for(conn, cancel, &seeds)?;

    if old_status != Status::Closed && issue.status == Status::Closed {
        check_tracks_convoys_on_conn(conn, cancel, id, actor)?;
    }

    Ok(())
}

/// Closes an issue on the given connection.
pub(crate) fn close_issue_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<()> {
    cancel.check()?;

    let mut issue = get_issue_on_conn(conn, id)?;
    if issue.status == Status::Tombstone {
        return Err(validation::ValidationError::TombstoneViaUpdate.into());
    }
    let now = Utc::now();
    let now_str = format_datetime(&now);

    issue.status = Status::Closed;
    issue.closed_at = Some(now);
    issue.close_reason = reason.to_string();
    issue.updated_at = now;
    // The hash covers status and close reason; recompute so clones detect
    // the close on their next hydrate.
    issue.content_hash = compute_content_hash(&issue);
    update_issue_row(conn, &issue)?;

    emit_event(conn, id, EventType::Closed, actor, None, Some(reason), None, &now_str)?;
    mark_dirty_on_conn(conn, id)?;

    let mut seeds = vec![id.to_string()];
    seeds.extend(crate::sqlite::dependencies::dependent_ids_on_conn(conn, id)?);
    blocked::update_blocked_cache_for(conn, cancel, &seeds)?;

    check_tracks_convoys_on_conn(conn, cancel, id, actor)?;

    Ok(())
}

/// Deletes an issue on the given connection: transitions it to a tombstone,
/// removes its dependencies and labels, and marks it dirty so the deletion
/// propagates on the next export.
pub(crate) fn delete_issue_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    id: &str,
    actor: &str,
    reason: &str,
) -> Result<()> {
    cancel.check()?;

    // NotFound surfaces before any mutation.
    let mut issue = get_issue_on_conn(conn, id)?;
    let dependents = crate::sqlite::dependencies::dependent_ids_on_conn(conn, id)?;

    let now = Utc::now();
    let now_str = format_datetime(&now);
    issue.status = Status::Tombstone;
    issue.deleted_at = Some(now);
    issue.deleted_by = actor.to_string();
    issue.delete_reason = reason.to_string();
    issue.updated_at = now;
    issue.content_hash = compute_content_hash(&issue);
    update_issue_row(conn, &issue)?;

    conn.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1 OR depends_on_id = ?1",
        params![id],
    )?;
    conn.execute("DELETE FROM labels WHERE issue_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM blocked_issues_cache WHERE issue_id = ?1",
        params![id],
    )?;

    emit_event(conn, id, EventType::Deleted, actor, None, None, Some(reason), &now_str)?;
    mark_dirty_on_conn(conn, id)?;

    blocked::update_blocked_cache_for(conn, cancel, &dependents)?;

    Ok(())
}

/// After `closed_id` closes, auto-closes any tracking issue whose tracked
/// set is now fully closed.
pub(crate) fn check_tracks_convoys_on_conn(
    conn: &Connection,
    cancel: &CancelToken,
    closed_id: &str,
    actor: &str,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT issue_id FROM dependencies WHERE depends_on_id = ?1 AND type = 'tracks'",
    )?;
    let trackers: Vec<String> = stmt
        .query_map(params![closed_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    for tracker in trackers {
        cancel.check()?;
        let issue = match get_issue_on_conn(conn, &tracker) {
            Ok(i) => i,
            Err(StorageError::NotFound { .. }) => continue,
            Err(e) => return Err(e),
        };
        if !issue.status.is_active() {
            continue;
        }
        if blocked::tracks_all_closed(conn, &tracker)? {
            debug!(tracker, "convoy complete, auto-closing");
            close_issue_on_conn(conn, cancel, &tracker, TRACKS_AUTO_CLOSE_REASON, actor)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Retrieves a single issue by ID on the given connection.
pub(crate) fn get_issue_on_conn(conn: &Connection, id: &str) -> Result<Issue> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_issue)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::not_found("issue", id),
            other => StorageError::Query(other),
        })
}

/// Searches issues on the given connection.
pub(crate) fn search_issues_on_conn(
    conn: &Connection,
    query: &str,
    filter: &IssueFilter,
) -> Result<Vec<Issue>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut param_idx = 1;

    // Free-text search across title, description, notes.
    if !query.is_empty() {
        where_clauses.push(format!(
            "(title LIKE ?{pi} OR description LIKE ?{pi} OR notes LIKE ?{pi})",
            pi = param_idx
        ));
        param_values.push(Box::new(format!("%{query}%")));
        param_idx += 1;
    }

    if !filter.include_tombstones {
        where_clauses.push("status != 'tombstone'".to_string());
    }

    if let Some(ref status) = filter.status {
        where_clauses.push(format!("status = ?{param_idx}"));
        param_values.push(Box::new(status.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(priority) = filter.priority {
        where_clauses.push(format!("priority = ?{param_idx}"));
        param_values.push(Box::new(priority));
        param_idx += 1;
    }
    if let Some(min) = filter.priority_min {
        where_clauses.push(format!("priority >= ?{param_idx}"));
        param_values.push(Box::new(min));
        param_idx += 1;
    }
    if let Some(max) = filter.priority_max {
        where_clauses.push(format!("priority <= ?{param_idx}"));
        param_values.push(Box::new(max));
        param_idx += 1;
    }
    if let Some(ref issue_type) = filter.issue_type {
        where_clauses.push(format!("issue_type = ?{param_idx}"));
        param_values.push(Box::new(issue_type.as_str().to_string()));
        param_idx += 1;
    }
    if let Some(ref assignee) = filter.assignee {
        where_clauses.push(format!("assignee = ?{param_idx}"));
        param_values.push(Box::new(assignee.clone()));
        param_idx += 1;
    }
    if let Some(ref source_repo) = filter.source_repo {
        where_clauses.push(format!("source_repo = ?{param_idx}"));
        param_values.push(Box::new(source_repo.clone()));
        param_idx += 1;
    }

    // Labels AND.
    for label in &filter.labels {
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label = ?{param_idx})"
        ));
        param_values.push(Box::new(label.clone()));
        param_idx += 1;
    }

    // Labels OR.
    if !filter.labels_any.is_empty() {
        let placeholders: Vec<String> = filter
            .labels_any
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", param_idx + i))
            .collect();
        where_clauses.push(format!(
            "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = issues.id AND labels.label IN ({}))",
            placeholders.join(",")
        ));
        for label in &filter.labels_any {
            param_values.push(Box::new(label.clone()));
        }
        param_idx += filter.labels_any.len();
    }

    let where_sql = if where_clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_clauses.join(" AND "))
    };

    let limit_sql = filter
        .limit
        .map(|l| format!(" LIMIT {l}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues {where_sql} ORDER BY created_at DESC{limit_sql}"
    );

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }

    let _ = param_idx;

    Ok(issues)
}

// ---------------------------------------------------------------------------
// SqliteStore issue methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Creates a single issue, returning its (possibly generated) id.
    pub fn create_issue_impl(&self, issue: &Issue, actor: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        let id = create_issue_on_conn(&tx, &self.cancel, issue, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(id)
    }

    /// Creates multiple issues in a single transaction. On any failure the
    /// whole batch rolls back, so no ids from a failed batch are observable.
    pub fn create_issues_impl(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        let mut ids = Vec::with_capacity(issues.len());
        for issue in issues {
            ids.push(create_issue_on_conn(&tx, &self.cancel, issue, actor)?);
        }
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(ids)
    }

    /// Retrieves an issue by ID.
    pub fn get_issue_impl(&self, id: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        get_issue_on_conn(&conn, id)
    }

    /// Retrieves an issue by external reference.
    pub fn get_issue_by_external_ref_impl(&self, external_ref: &str) -> Result<Issue> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE external_ref = ?1");
        conn.query_row(&sql, params![external_ref], scan_issue)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StorageError::not_found("issue", format!("external_ref={external_ref}"))
                }
                other => StorageError::Query(other),
            })
    }

    /// Retrieves multiple issues by their IDs.
    pub fn get_issues_by_ids_impl(&self, ids: &[String]) -> Result<Vec<Issue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(ids.iter());
        let rows = stmt.query_map(params, scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Allocates the next hierarchical child id for a parent.
    pub fn next_child_id_impl(&self, parent_id: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        if !id_exists(&conn, parent_id)? {
            return Err(StorageError::not_found("issue", parent_id));
        }
        counters::next_child_id(&conn, parent_id)
    }

    /// Applies partial updates to an issue.
    pub fn update_issue_impl(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        update_issue_on_conn(&tx, &self.cancel, id, updates, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Closes an issue.
    pub fn close_issue_impl(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        close_issue_on_conn(&tx, &self.cancel, id, reason, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Deletes an issue (tombstone transition).
    pub fn delete_issue_impl(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        delete_issue_on_conn(&tx, &self.cancel, id, actor, reason)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }

    /// Searches issues by text query and filter.
    pub fn search_issues_impl(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        search_issues_on_conn(&conn, query, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::store::SqliteStore;
    use braid_core::issue::IssueBuilder;
    use pretty_assertions::assert_eq;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_get_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("Test issue")
            .id("bd-test1")
            .description("A test description")
            .priority(2)
            .build();

        let id = store.create_issue_impl(&issue, "alice").unwrap();
        assert_eq!(id, "bd-test1");

        let got = store.get_issue_impl("bd-test1").unwrap();
        assert_eq!(got.title, "Test issue");
        assert_eq!(got.description, "A test description");
        assert_eq!(got.priority, 2);
        assert!(!got.content_hash.is_empty());
        assert_eq!(got.source_repo, ".");
    }

    #[test]
    fn create_generates_id_when_absent() {
        let store = test_store();
        let issue = IssueBuilder::new("No id yet").build();
        let id = store.create_issue_impl(&issue, "alice").unwrap();
        assert!(id.starts_with("bd-"));
        // Default min_hash_length is 3.
        assert!(id.len() >= "bd-".len() + 3);
        store.get_issue_impl(&id).unwrap();
    }

    #[test]
    fn generated_ids_honor_min_hash_length() {
        let store = test_store();
        store.set_config_impl("min_hash_length", "5").unwrap();
        for i in 0..10 {
            let issue = IssueBuilder::new(format!("Issue {i}")).build();
            let id = store.create_issue_impl(&issue, "alice").unwrap();
            let suffix = id.strip_prefix("bd-").unwrap();
            assert!(suffix.len() >= 5, "suffix too short: {id}");
        }
    }

    #[test]
    fn strict_insert_rejects_duplicate_id() {
        let store = test_store();
        let issue = IssueBuilder::new("First").id("bd-dup").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let again = IssueBuilder::new("Second").id("bd-dup").build();
        let err = store.create_issue_impl(&again, "alice").unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));
    }

    #[test]
    fn duplicate_external_ref_rejected() {
        let store = test_store();
        let a = IssueBuilder::new("A").id("bd-x1").external_ref("gh-7").build();
        store.create_issue_impl(&a, "alice").unwrap();
        let b = IssueBuilder::new("B").id("bd-x2").external_ref("gh-7").build();
        let err = store.create_issue_impl(&b, "alice").unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { .. }));
    }

    #[test]
    fn bulk_create_rolls_back_on_failure() {
        let store = test_store();
        let good = IssueBuilder::new("Good").id("bd-bulk1").build();
        let bad = IssueBuilder::new("Bad").id("bd-bulk2").priority(9).build();

        let err = store.create_issues_impl(&[good, bad], "alice").unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        // No phantom ids from the failed batch.
        assert!(store.get_issue_impl("bd-bulk1").unwrap_err().is_not_found());
        assert!(store.get_issue_impl("bd-bulk2").unwrap_err().is_not_found());
    }

    #[test]
    fn get_nonexistent_issue_returns_not_found() {
        let store = test_store();
        let err = store.get_issue_impl("bd-nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_issue_partial() {
        let store = test_store();
        let issue = IssueBuilder::new("Original title").id("bd-upd1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let before = store.get_issue_impl("bd-upd1").unwrap();

        let updates = IssueUpdates {
            title: Some("Updated title".into()),
            priority: Some(3),
            ..Default::default()
        };
        store.update_issue_impl("bd-upd1", &updates, "bob").unwrap();

        let got = store.get_issue_impl("bd-upd1").unwrap();
        assert_eq!(got.title, "Updated title");
        assert_eq!(got.priority, 3);
        assert_ne!(got.content_hash, before.content_hash);
        assert!(got.updated_at >= before.updated_at);
    }

    #[test]
    fn update_to_closed_sets_closed_at() {
        let store = test_store();
        let issue = IssueBuilder::new("Closing").id("bd-upd2").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Closed),
            close_reason: Some("done".into()),
            ..Default::default()
        };
        store.update_issue_impl("bd-upd2", &updates, "alice").unwrap();

        let got = store.get_issue_impl("bd-upd2").unwrap();
        assert_eq!(got.status, Status::Closed);
        assert!(got.closed_at.is_some());
        assert_eq!(got.close_reason, "done");
    }

    #[test]
    fn reopen_clears_close_state() {
        let store = test_store();
        let issue = IssueBuilder::new("Reopen me").id("bd-upd3").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.close_issue_impl("bd-upd3", "fixed", "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Open),
            ..Default::default()
        };
        store.update_issue_impl("bd-upd3", &updates, "alice").unwrap();

        let got = store.get_issue_impl("bd-upd3").unwrap();
        assert_eq!(got.status, Status::Open);
        assert!(got.closed_at.is_none());
        assert!(got.close_reason.is_empty());
    }

    #[test]
    fn tombstone_via_update_rejected() {
        let store = test_store();
        let issue = IssueBuilder::new("No shortcuts").id("bd-upd4").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let updates = IssueUpdates {
            status: Some(Status::Tombstone),
            ..Default::default()
        };
        let err = store.update_issue_impl("bd-upd4", &updates, "alice").unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn close_issue() {
        let store = test_store();
        let issue = IssueBuilder::new("To close").id("bd-close1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        store.close_issue_impl("bd-close1", "completed", "alice").unwrap();

        let got = store.get_issue_impl("bd-close1").unwrap();
        assert_eq!(got.status, Status::Closed);
        assert!(got.closed_at.is_some());
        assert_eq!(got.close_reason, "completed");
    }

    #[test]
    fn delete_leaves_tombstone() {
        let store = test_store();
        let issue = IssueBuilder::new("To delete").id("bd-del1").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.add_label_impl("bd-del1", "gone", "alice").unwrap();

        store.delete_issue_impl("bd-del1", "alice", "obsolete").unwrap();

        // Tombstones stay in the table so sync can propagate the deletion.
        let got = store.get_issue_impl("bd-del1").unwrap();
        assert_eq!(got.status, Status::Tombstone);
        assert!(got.deleted_at.is_some());
        assert_eq!(got.deleted_by, "alice");
        assert_eq!(got.delete_reason, "obsolete");
        assert!(store.get_labels_impl("bd-del1").unwrap().is_empty());
    }

    #[test]
    fn hierarchical_create_checks_parent() {
        let store = test_store();
        let orphan = IssueBuilder::new("Orphan child").id("bd-miss.1").build();
        let err = store.create_issue_impl(&orphan, "alice").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Hierarchy(HierarchyError::MissingParent { .. })
        ));

        let parent = IssueBuilder::new("Parent").id("bd-par").build();
        store.create_issue_impl(&parent, "alice").unwrap();
        let child = IssueBuilder::new("Child").id("bd-par.1").build();
        store.create_issue_impl(&child, "alice").unwrap();

        // The parent-child edge was added automatically.
        let conn = store.lock_conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM dependencies
                 WHERE issue_id = 'bd-par.1' AND depends_on_id = 'bd-par' AND type = 'parent-child'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn explicit_child_id_brings_counter_forward() {
        let store = test_store();
        let parent = IssueBuilder::new("Parent").id("bd-par").build();
        store.create_issue_impl(&parent, "alice").unwrap();
        let child = IssueBuilder::new("Explicit").id("bd-par.5").build();
        store.create_issue_impl(&child, "alice").unwrap();

        let next = store.next_child_id_impl("bd-par").unwrap();
        assert_eq!(next, "bd-par.6");
    }

    #[test]
    fn hierarchy_depth_enforced_on_create() {
        let store = test_store();
        for id in ["bd-h", "bd-h.1", "bd-h.1.1", "bd-h.1.1.1"] {
            let issue = IssueBuilder::new("Node").id(id).build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }
        let too_deep = IssueBuilder::new("Too deep").id("bd-h.1.1.1.1").build();
        let err = store.create_issue_impl(&too_deep, "alice").unwrap_err();
        assert!(matches!(
            err,
            StorageError::Hierarchy(HierarchyError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn create_marks_dirty() {
        let store = test_store();
        let issue = IssueBuilder::new("Dirty").id("bd-dirty1").build();
        store.create_issue_impl(&issue, "alice").unwrap();

        let dirty = store.get_dirty_issues_impl().unwrap();
        assert!(dirty.contains(&"bd-dirty1".to_string()));
    }

    #[test]
    fn search_issues_by_text() {
        let store = test_store();
        let issue1 = IssueBuilder::new("Fix login bug")
            .id("bd-s1")
            .description("Users cannot log in")
            .build();
        let issue2 = IssueBuilder::new("Add dashboard")
            .id("bd-s2")
            .description("New dashboard feature")
            .build();
        store.create_issue_impl(&issue1, "alice").unwrap();
        store.create_issue_impl(&issue2, "alice").unwrap();

        let results = store
            .search_issues_impl("login", &IssueFilter::default())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-s1");
    }

    #[test]
    fn search_excludes_tombstones_by_default() {
        let store = test_store();
        let issue = IssueBuilder::new("Short lived").id("bd-s3").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store.delete_issue_impl("bd-s3", "alice", "cleanup").unwrap();

        let results = store.search_issues_impl("", &IssueFilter::default()).unwrap();
        assert!(results.iter().all(|i| i.id != "bd-s3"));

        let with_tombstones = store
            .search_issues_impl(
                "",
                &IssueFilter {
                    include_tombstones: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(with_tombstones.iter().any(|i| i.id == "bd-s3"));
    }

    #[test]
    fn search_priority_range() {
        let store = test_store();
        for (id, prio) in [("bd-p0", 0), ("bd-p2", 2), ("bd-p4", 4)] {
            let issue = IssueBuilder::new("Prio").id(id).priority(prio).build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }
        let filter = IssueFilter {
            priority_min: Some(1),
            priority_max: Some(3),
            ..Default::default()
        };
        let results = store.search_issues_impl("", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "bd-p2");
    }

    #[test]
    fn defensive_fix_repairs_closed_without_timestamp() {
        let mut issue = IssueBuilder::new("Imported closed").id("bd-fix1").build();
        issue.status = Status::Closed;
        assert!(issue.closed_at.is_none());
        apply_defensive_fixes(&mut issue);
        let closed_at = issue.closed_at.expect("closed_at repaired");
        assert!(closed_at > issue.updated_at);
    }
}
