//! DDL statements and migrations for the SQLite schema.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are stored as INTEGER (0/1). JSON blobs are TEXT.
//! Mtimes in the repo cache are INTEGER nanoseconds.

use rusqlite::Connection;

use crate::error::{Result, StorageError};

/// Current schema version, recorded in `PRAGMA user_version`. Bumped whenever
/// DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Core DDL statements executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT DEFAULT '',
        title               TEXT NOT NULL CHECK(length(title) <= 500),
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2 CHECK(priority >= 0 AND priority <= 4),
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT DEFAULT '',
        estimated_minutes   INTEGER,
        created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by          TEXT DEFAULT '',
        updated_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        closed_at           TEXT,
        close_reason        TEXT DEFAULT '',
        -- Deletion (tombstones)
        deleted_at          TEXT,
        deleted_by          TEXT DEFAULT '',
        delete_reason       TEXT DEFAULT '',
        -- External integration
        external_ref        TEXT,
        source_repo         TEXT NOT NULL DEFAULT '.',
        -- Compaction metadata
        compaction_level    INTEGER NOT NULL DEFAULT 0,
        compacted_at        TEXT,
        compacted_at_commit TEXT,
        original_size       INTEGER NOT NULL DEFAULT 0,
        -- Context markers
        pinned              INTEGER NOT NULL DEFAULT 0,
        is_template         INTEGER NOT NULL DEFAULT 0,
        ephemeral           INTEGER NOT NULL DEFAULT 0,
        -- Gate fields
        await_type          TEXT DEFAULT '',
        await_id            TEXT DEFAULT '',
        timeout_ns          INTEGER NOT NULL DEFAULT 0,
        waiters             TEXT NOT NULL DEFAULT '[]',
        -- Closed-at invariant: closed issues carry a closed_at timestamp,
        -- tombstones carry a deleted_at timestamp.
        CHECK (
            (status = 'closed' AND closed_at IS NOT NULL) OR
            (status = 'tombstone' AND deleted_at IS NOT NULL) OR
            (status NOT IN ('closed', 'tombstone') AND closed_at IS NULL)
        )
    )
    "#,
    // -- Indexes on issues ---------------------------------------------------
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_content_hash ON issues(content_hash)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_external_ref_unique
        ON issues(external_ref) WHERE external_ref IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_issues_source_repo ON issues(source_repo)",
    "CREATE INDEX IF NOT EXISTS idx_issues_ephemeral ON issues(ephemeral) WHERE ephemeral = 1",
    "CREATE INDEX IF NOT EXISTS idx_issues_tombstone ON issues(status) WHERE status = 'tombstone'",
    "CREATE INDEX IF NOT EXISTS idx_issues_ready
        ON issues(status, priority, created_at)
        WHERE status IN ('open', 'in_progress') AND ephemeral = 0 AND is_template = 0",
    // -- Dependencies table --------------------------------------------------
    // depends_on_id carries no foreign key so that external capability
    // references (`external:<project>:<capability>`) are legal targets.
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type          TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        created_by    TEXT NOT NULL DEFAULT '',
        metadata      TEXT DEFAULT '{}',
        PRIMARY KEY (issue_id, depends_on_id, type),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_blocking
        ON dependencies(depends_on_id, issue_id)
        WHERE type IN ('blocks', 'parent-child', 'conditional-blocks', 'waits-for', 'tracks')",
    // -- Labels table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    // -- Events table (audit trail) ------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id    TEXT NOT NULL,
        event_type  TEXT NOT NULL,
        actor       TEXT NOT NULL,
        old_value   TEXT,
        new_value   TEXT,
        comment     TEXT,
        created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Config table --------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata table ------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Dirty issues (export queue) -----------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id  TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dirty_issues_marked_at ON dirty_issues(marked_at)",
    // -- Blocked issues cache (materialized) ---------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS blocked_issues_cache (
        issue_id   TEXT PRIMARY KEY,
        blocked_by TEXT NOT NULL DEFAULT '[]',
        transitive INTEGER NOT NULL DEFAULT 0,
        blocked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Child counters (hierarchical id allocation) -------------------------
    r#"
    CREATE TABLE IF NOT EXISTS child_counters (
        parent_id  TEXT PRIMARY KEY,
        last_child INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Repo mtime cache (hydrate skip signal) ------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS repo_mtimes (
        repo_path    TEXT PRIMARY KEY,
        jsonl_path   TEXT NOT NULL,
        mtime_ns     INTEGER NOT NULL,
        last_checked TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    )
    "#,
    // -- Export hashes (incremental export tracking) -------------------------
    r#"
    CREATE TABLE IF NOT EXISTS export_hashes (
        issue_id     TEXT PRIMARY KEY,
        content_hash TEXT NOT NULL,
        exported_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Issue snapshots (pre-compaction copies of heavy text) ---------------
    r#"
    CREATE TABLE IF NOT EXISTS issue_snapshots (
        issue_id         TEXT NOT NULL,
        compaction_level INTEGER NOT NULL,
        fields           TEXT NOT NULL,
        taken_at         TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        PRIMARY KEY (issue_id, compaction_level),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    )
    "#,
    // -- Ready view ----------------------------------------------------------
    // Mirrors the ready-work query when no external filters are in play.
    r#"
    CREATE VIEW IF NOT EXISTS ready_issues AS
        SELECT i.* FROM issues i
        WHERE i.status IN ('open', 'in_progress')
          AND i.ephemeral = 0
          AND i.is_template = 0
          AND NOT EXISTS (
              SELECT 1 FROM blocked_issues_cache b WHERE b.issue_id = i.id
          )
    "#,
];

/// Default configuration values inserted on first init.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("issue_prefix", "bd"),
    ("min_hash_length", "3"),
    ("max_collision_prob", "0.25"),
    ("hierarchy.max-depth", "3"),
    ("compact_tier1_days", "30"),
    ("compact_tier1_dep_levels", "2"),
    ("compact_tier2_days", "90"),
    ("compact_tier2_commits", "100"),
    ("external_projects", ""),
    ("multirepo.primary", "."),
    ("multirepo.additional", ""),
];

/// Schema migrations applied after initial DDL.
///
/// Each migration is a `(name, apply)` pair. Migrations detect their own
/// prior application (column presence, index existence, or table shape) and
/// are no-ops when already applied, so the whole list runs on every open.
pub const MIGRATIONS: &[(&str, fn(&Connection) -> Result<()>)] = &[
    ("001_issue_deletion_columns", migrate_issue_deletion_columns),
    ("002_issue_gate_columns", migrate_issue_gate_columns),
    ("003_external_ref_unique", migrate_external_ref_unique),
    ("004_dependencies_pk_type", migrate_dependencies_pk_type),
    ("005_blocked_cache_shape", migrate_blocked_cache_shape),
];

// ---------------------------------------------------------------------------
// Introspection helpers
// ---------------------------------------------------------------------------

pub(crate) fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
        .and_then(|mut stmt| stmt.exists([table]))
        .unwrap_or(false)
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    // pragma_table_info() cannot take the table name as a parameter; callers
    // only pass fixed table names from this module.
    let sql = format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1");
    conn.prepare(&sql)
        .and_then(|mut stmt| stmt.exists([column]))
        .unwrap_or(false)
}

fn index_exists(conn: &Connection, index: &str) -> bool {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1")
        .and_then(|mut stmt| stmt.exists([index]))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

/// Databases from before tombstone support lack the deletion columns.
fn migrate_issue_deletion_columns(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "issues") {
        return Ok(());
    }
    for (name, definition) in [
        ("deleted_at", "TEXT"),
        ("deleted_by", "TEXT DEFAULT ''"),
        ("delete_reason", "TEXT DEFAULT ''"),
    ] {
        if !column_exists(conn, "issues", name) {
            conn.execute(
                &format!("ALTER TABLE issues ADD COLUMN {name} {definition}"),
                [],
            )?;
        }
    }
    Ok(())
}

/// Databases from before wisp gates lack the await/timeout/waiters columns.
fn migrate_issue_gate_columns(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "issues") {
        return Ok(());
    }
    for (name, definition) in [
        ("await_type", "TEXT DEFAULT ''"),
        ("await_id", "TEXT DEFAULT ''"),
        ("timeout_ns", "INTEGER NOT NULL DEFAULT 0"),
        ("waiters", "TEXT NOT NULL DEFAULT '[]'"),
    ] {
        if !column_exists(conn, "issues", name) {
            conn.execute(
                &format!("ALTER TABLE issues ADD COLUMN {name} {definition}"),
                [],
            )?;
        }
    }
    Ok(())
}

/// Enforce global uniqueness of external refs. Preexisting duplicates block
/// the index build and must be resolved by hand, so they fail loudly.
fn migrate_external_ref_unique(conn: &Connection) -> Result<()> {
    if index_exists(conn, "idx_issues_external_ref_unique") {
        return Ok(());
    }
    let mut stmt = conn.prepare(
        "SELECT external_ref, COUNT(*) FROM issues
         WHERE external_ref IS NOT NULL
         GROUP BY external_ref HAVING COUNT(*) > 1",
    )?;
    let dups: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    if !dups.is_empty() {
        return Err(StorageError::Migration {
            name: "003_external_ref_unique".into(),
            reason: format!(
                "duplicate external_ref values prevent unique index: {}",
                dups.join(", ")
            ),
        });
    }
    conn.execute(
        "CREATE UNIQUE INDEX idx_issues_external_ref_unique
         ON issues(external_ref) WHERE external_ref IS NOT NULL",
        [],
    )?;
    Ok(())
}

/// Older databases keyed dependencies by (issue_id, depends_on_id) only,
/// which forbids parallel edges of different types. Rebuild preserving every
/// column bit-for-bit.
fn migrate_dependencies_pk_type(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "dependencies") {
        return Ok(());
    }
    // The PK shape is visible in pragma_table_info: the `pk` column gives the
    // 1-based position of each primary key member, 0 for non-members.
    let type_in_pk: bool = conn
        .prepare("SELECT pk FROM pragma_table_info('dependencies') WHERE name = 'type'")
        .and_then(|mut stmt| {
            stmt.query_row([], |row| row.get::<_, i32>(0))
        })
        .map(|pk| pk > 0)
        .unwrap_or(false);
    if type_in_pk {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE dependencies_new (
            issue_id      TEXT NOT NULL,
            depends_on_id TEXT NOT NULL,
            type          TEXT NOT NULL DEFAULT 'blocks',
            created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            created_by    TEXT NOT NULL DEFAULT '',
            metadata      TEXT DEFAULT '{}',
            PRIMARY KEY (issue_id, depends_on_id, type),
            FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
        );
        INSERT INTO dependencies_new (issue_id, depends_on_id, type, created_at, created_by, metadata)
            SELECT issue_id, depends_on_id, type, created_at, created_by, metadata
            FROM dependencies;
        DROP TABLE dependencies;
        ALTER TABLE dependencies_new RENAME TO dependencies;
        CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id);
        CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id);
        CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, type);
        CREATE INDEX IF NOT EXISTS idx_dependencies_blocking
            ON dependencies(depends_on_id, issue_id)
            WHERE type IN ('blocks', 'parent-child', 'conditional-blocks', 'waits-for', 'tracks');
        "#,
    )
    .map_err(|e| StorageError::Migration {
        name: "004_dependencies_pk_type".into(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// The blocked cache is derived data: when its shape is stale, drop and
/// recreate, then let the caller rebuild it.
fn migrate_blocked_cache_shape(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "blocked_issues_cache") {
        return Ok(());
    }
    let ok = column_exists(conn, "blocked_issues_cache", "issue_id")
        && column_exists(conn, "blocked_issues_cache", "blocked_by")
        && column_exists(conn, "blocked_issues_cache", "transitive")
        && column_exists(conn, "blocked_issues_cache", "blocked_at");
    if ok {
        return Ok(());
    }
    conn.execute_batch(
        r#"
        DROP TABLE blocked_issues_cache;
        CREATE TABLE blocked_issues_cache (
            issue_id   TEXT PRIMARY KEY,
            blocked_by TEXT NOT NULL DEFAULT '[]',
            transitive INTEGER NOT NULL DEFAULT 0,
            blocked_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
        );
        "#,
    )?;
    Ok(())
}
