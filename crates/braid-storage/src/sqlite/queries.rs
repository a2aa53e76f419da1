//! Complex queries: ready work, blocked issues, epic status, statistics.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};

use braid_core::dependency::ExternalRef;
use braid_core::enums::SortPolicy;
use braid_core::filter::WorkFilter;
use braid_core::issue::Issue;

use crate::error::Result;
use crate::external;
use crate::sqlite::config::external_projects_on_conn;
use crate::sqlite::issues::{ISSUE_COLUMNS, format_datetime, scan_issue};
use crate::sqlite::store::SqliteStore;
use crate::traits::{BlockedIssue, EpicStatus, Statistics};

/// Window within which the hybrid sort treats an issue as "recent".
const HYBRID_RECENCY_HOURS: i64 = 48;

impl SqliteStore {
    /// Returns issues that are ready to work on.
    ///
    /// An issue is ready when:
    /// - its status is open or in-progress (or the caller's choice),
    /// - it is not in the blocked cache,
    /// - it lies under the parent scope, when one is given,
    /// - every external capability it depends on resolves as satisfied.
    pub fn get_ready_work_impl(&self, filter: &WorkFilter) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> = vec![
            "i.is_template = 0".to_string(),
            "i.ephemeral = 0".to_string(),
            "NOT EXISTS (SELECT 1 FROM blocked_issues_cache b WHERE b.issue_id = i.id)"
                .to_string(),
        ];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref status) = filter.status {
            where_clauses.push(format!("i.status = ?{param_idx}"));
            param_values.push(Box::new(status.as_str().to_string()));
            param_idx += 1;
        } else {
            where_clauses.push("i.status IN ('open', 'in_progress')".to_string());
        }

        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }
        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if filter.unassigned {
            where_clauses.push("(i.assignee IS NULL OR i.assignee = '')".to_string());
        }

        // Label filters (AND).
        for label in &filter.labels {
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label = ?{param_idx})"
            ));
            param_values.push(Box::new(label.clone()));
            param_idx += 1;
        }

        // Label filters (OR).
        if !filter.labels_any.is_empty() {
            let placeholders: Vec<String> = filter
                .labels_any
                .iter()
                .enumerate()
                .map(|(j, _)| format!("?{}", param_idx + j))
                .collect();
            where_clauses.push(format!(
                "EXISTS (SELECT 1 FROM labels WHERE labels.issue_id = i.id AND labels.label IN ({}))",
                placeholders.join(",")
            ));
            for label in &filter.labels_any {
                param_values.push(Box::new(label.clone()));
            }
            param_idx += filter.labels_any.len();
        }

        // Parent scope via recursive CTE over parent-child edges. The scope
        // root itself is excluded by construction (only children seed it).
        let mut cte_sql = String::new();
        if let Some(ref scope) = filter.parent_scope {
            cte_sql = format!(
                "WITH RECURSIVE scope(id) AS (
                     SELECT issue_id FROM dependencies
                     WHERE depends_on_id = ?{param_idx} AND type = 'parent-child'
                     UNION
                     SELECT d.issue_id FROM dependencies d
                     INNER JOIN scope s ON d.depends_on_id = s.id
                     WHERE d.type = 'parent-child'
                 ) "
            );
            param_values.push(Box::new(scope.clone()));
            param_idx += 1;
            where_clauses.push("i.id IN (SELECT id FROM scope)".to_string());
        }

        let where_sql = where_clauses.join(" AND ");

        // Sort order.
        let order_sql = match filter.sort_policy {
            SortPolicy::Priority => "i.priority ASC, i.created_at ASC".to_string(),
            SortPolicy::Oldest => "i.created_at ASC".to_string(),
            // Hybrid: issues created inside the recency window come first,
            // ordered by priority; stale issues follow in age order with
            // priority ignored.
            _ => {
                let cutoff =
                    format_datetime(&(Utc::now() - Duration::hours(HYBRID_RECENCY_HOURS)));
                let sql = format!(
                    "CASE WHEN i.created_at >= ?{param_idx} THEN 0 ELSE 1 END ASC,
                     CASE WHEN i.created_at >= ?{param_idx} THEN i.priority ELSE 0 END ASC,
                     i.created_at ASC"
                );
                param_values.push(Box::new(cutoff));
                param_idx += 1;
                sql
            }
        };

        let sql = format!(
            "{cte_sql}SELECT {ISSUE_COLUMNS} FROM issues i WHERE {where_sql} ORDER BY {order_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;

        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        drop(stmt);

        // External-capability pass: batch-resolve every external ref the
        // candidates carry, then drop issues with an unsatisfied one. An
        // empty external_projects config skips the check entirely.
        let projects = external_projects_on_conn(&conn);
        if !projects.is_empty() {
            let mut refs_by_issue: HashMap<String, Vec<ExternalRef>> = HashMap::new();
            let mut all_refs: HashSet<ExternalRef> = HashSet::new();
            {
                let mut stmt = conn.prepare_cached(
                    "SELECT depends_on_id FROM dependencies
                     WHERE issue_id = ?1 AND depends_on_id LIKE 'external:%'",
                )?;
                for issue in &issues {
                    let targets: Vec<String> = stmt
                        .query_map([&issue.id], |row| row.get(0))?
                        .collect::<rusqlite::Result<_>>()?;
                    for target in targets {
                        if let Some(r) = ExternalRef::parse(&target) {
                            refs_by_issue.entry(issue.id.clone()).or_default().push(r.clone());
                            all_refs.insert(r);
                        }
                    }
                }
            }

            if !all_refs.is_empty() {
                let outcomes = external::resolve_batch(&projects, &all_refs);
                issues.retain(|issue| {
                    refs_by_issue.get(&issue.id).is_none_or(|refs| {
                        refs.iter().all(|r| {
                            outcomes.get(r).map(|o| o.satisfied).unwrap_or(false)
                        })
                    })
                });
            }
        }

        // Limit truncates after ordering and filtering.
        if let Some(limit) = filter.limit {
            issues.truncate(limit.max(0) as usize);
        }

        let _ = param_idx;
        Ok(issues)
    }

    /// Returns currently-blocked issues straight from the cache.
    pub fn get_blocked_issues_impl(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>> {
        let conn = self.lock_conn()?;

        let mut where_clauses: Vec<String> =
            vec!["i.status NOT IN ('closed', 'tombstone')".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(ref assignee) = filter.assignee {
            where_clauses.push(format!("i.assignee = ?{param_idx}"));
            param_values.push(Box::new(assignee.clone()));
            param_idx += 1;
        }
        if let Some(priority) = filter.priority {
            where_clauses.push(format!("i.priority = ?{param_idx}"));
            param_values.push(Box::new(priority));
            param_idx += 1;
        }

        let where_sql = where_clauses.join(" AND ");
        let limit_sql = filter
            .limit
            .map(|l| format!(" LIMIT {l}"))
            .unwrap_or_default();

        let sql = format!(
            "SELECT {ISSUE_COLUMNS}, b.blocked_by AS cache_blocked_by, b.transitive AS cache_transitive
             FROM issues i
             INNER JOIN blocked_issues_cache b ON b.issue_id = i.id
             WHERE {where_sql}
             ORDER BY i.priority ASC, i.created_at ASC{limit_sql}"
        );

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let issue = scan_issue(row)?;
            let blocked_by_json: String = row.get("cache_blocked_by")?;
            let transitive: i32 = row.get("cache_transitive")?;
            Ok((issue, blocked_by_json, transitive))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (issue, blocked_by_json, transitive) = row?;
            let blocked_by: Vec<String> =
                serde_json::from_str(&blocked_by_json).unwrap_or_default();
            result.push(BlockedIssue {
                issue,
                blocked_by,
                transitive: transitive != 0,
            });
        }

        let _ = param_idx;
        Ok(result)
    }

    /// Returns issues that depended on `closed_id` and are no longer blocked.
    pub fn get_unblocked_by_close_impl(&self, closed_id: &str) -> Result<Vec<Issue>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues i
             WHERE i.status IN ('open', 'in_progress')
               AND EXISTS (
                   SELECT 1 FROM dependencies d
                   WHERE d.issue_id = i.id AND d.depends_on_id = ?1
               )
               AND NOT EXISTS (
                   SELECT 1 FROM blocked_issues_cache b WHERE b.issue_id = i.id
               )
             ORDER BY i.priority ASC, i.created_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([closed_id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Returns epics where every child is closed.
    pub fn get_epics_eligible_for_closure_impl(&self) -> Result<Vec<EpicStatus>> {
        let conn = self.lock_conn()?;

        let sql = format!(
            "SELECT {ISSUE_COLUMNS},
                    (SELECT COUNT(*)
                     FROM dependencies d
                     INNER JOIN issues child ON child.id = d.issue_id
                     WHERE d.depends_on_id = i.id AND d.type = 'parent-child'
                    ) AS total_children,
                    (SELECT COUNT(*)
                     FROM dependencies d
                     INNER JOIN issues child ON child.id = d.issue_id
                     WHERE d.depends_on_id = i.id
                       AND d.type = 'parent-child'
                       AND child.status = 'closed'
                    ) AS closed_children
             FROM issues i
             WHERE i.issue_type = 'epic'
               AND i.status NOT IN ('closed', 'tombstone')
               AND (SELECT COUNT(*)
                    FROM dependencies d
                    INNER JOIN issues child ON child.id = d.issue_id
                    WHERE d.depends_on_id = i.id AND d.type = 'parent-child'
                   ) > 0
               AND (SELECT COUNT(*)
                    FROM dependencies d
                    INNER JOIN issues child ON child.id = d.issue_id
                    WHERE d.depends_on_id = i.id AND d.type = 'parent-child'
                   ) = (SELECT COUNT(*)
                        FROM dependencies d
                        INNER JOIN issues child ON child.id = d.issue_id
                        WHERE d.depends_on_id = i.id
                          AND d.type = 'parent-child'
                          AND child.status = 'closed'
                       )
             ORDER BY i.created_at ASC"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let issue = scan_issue(row)?;
            let total_children: i32 = row.get("total_children")?;
            let closed_children: i32 = row.get("closed_children")?;
            Ok(EpicStatus {
                epic: issue,
                total_children,
                closed_children,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Returns ids changed since the last export, oldest mark first.
    pub fn get_dirty_issues_impl(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT issue_id FROM dirty_issues ORDER BY marked_at, issue_id")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Clears dirty markers for the given ids.
    pub fn clear_dirty_issues_impl(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM dirty_issues WHERE issue_id IN ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    /// Returns aggregate statistics.
    pub fn get_statistics_impl(&self) -> Result<Statistics> {
        let conn = self.lock_conn()?;
        let count = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(Statistics {
            total_issues: count("SELECT COUNT(*) FROM issues")?,
            open_issues: count("SELECT COUNT(*) FROM issues WHERE status = 'open'")?,
            in_progress_issues: count(
                "SELECT COUNT(*) FROM issues WHERE status = 'in_progress'",
            )?,
            blocked_issues: count("SELECT COUNT(*) FROM issues WHERE status = 'blocked'")?,
            closed_issues: count("SELECT COUNT(*) FROM issues WHERE status = 'closed'")?,
            tombstone_issues: count("SELECT COUNT(*) FROM issues WHERE status = 'tombstone'")?,
            cached_blocked: count("SELECT COUNT(*) FROM blocked_issues_cache")?,
            dirty_issues: count("SELECT COUNT(*) FROM dirty_issues")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::dependency::Dependency;
    use braid_core::enums::{DependencyType, Status};
    use braid_core::issue::IssueBuilder;
    use pretty_assertions::assert_eq;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn create(store: &SqliteStore, id: &str) {
        let issue = IssueBuilder::new(format!("Issue {id}")).id(id).build();
        store.create_issue_impl(&issue, "alice").unwrap();
    }

    fn dep(store: &SqliteStore, from: &str, to: &str, dep_type: DependencyType) {
        store
            .add_dependency_impl(&Dependency::new(from, to, dep_type), "alice")
            .unwrap();
    }

    fn ready_ids(store: &SqliteStore, filter: &WorkFilter) -> Vec<String> {
        store
            .get_ready_work_impl(filter)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect()
    }

    #[test]
    fn ready_work_excludes_blocked() {
        let store = test_store();
        create(&store, "bd-blk1");
        create(&store, "bd-blk2");
        create(&store, "bd-rdy1");
        dep(&store, "bd-blk2", "bd-blk1", DependencyType::Blocks);

        let ids = ready_ids(&store, &WorkFilter::default());
        assert!(ids.contains(&"bd-blk1".to_string()));
        assert!(ids.contains(&"bd-rdy1".to_string()));
        assert!(!ids.contains(&"bd-blk2".to_string()));
    }

    #[test]
    fn hierarchical_blocking_scenario() {
        let store = test_store();
        create(&store, "bd-blocker");
        create(&store, "bd-epic");
        create(&store, "bd-task");
        dep(&store, "bd-epic", "bd-blocker", DependencyType::Blocks);
        dep(&store, "bd-task", "bd-epic", DependencyType::ParentChild);

        let ids = ready_ids(&store, &WorkFilter::default());
        assert_eq!(ids, vec!["bd-blocker"]);
        assert_eq!(
            store.blocked_ids_impl().unwrap(),
            vec!["bd-epic", "bd-task"]
        );

        store.close_issue_impl("bd-blocker", "done", "alice").unwrap();
        let ids = ready_ids(&store, &WorkFilter::default());
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"bd-epic".to_string()));
        assert!(ids.contains(&"bd-task".to_string()));
        assert!(store.blocked_ids_impl().unwrap().is_empty());
    }

    #[test]
    fn parent_scope_excludes_root() {
        let store = test_store();
        create(&store, "bd-scope");
        create(&store, "bd-in1");
        create(&store, "bd-in2");
        create(&store, "bd-out");
        dep(&store, "bd-in1", "bd-scope", DependencyType::ParentChild);
        dep(&store, "bd-in2", "bd-in1", DependencyType::ParentChild);

        let filter = WorkFilter {
            parent_scope: Some("bd-scope".to_string()),
            ..Default::default()
        };
        let ids = ready_ids(&store, &filter);
        assert!(ids.contains(&"bd-in1".to_string()));
        assert!(ids.contains(&"bd-in2".to_string()));
        assert!(!ids.contains(&"bd-scope".to_string()));
        assert!(!ids.contains(&"bd-out".to_string()));
    }

    #[test]
    fn priority_sort_policy() {
        let store = test_store();
        let old = Utc::now() - Duration::days(10);
        for (id, prio, offset) in [("bd-a", 3, 0), ("bd-b", 1, 1), ("bd-c", 1, 2)] {
            let issue = IssueBuilder::new(format!("Issue {id}"))
                .id(id)
                .priority(prio)
                .created_at(old + Duration::minutes(offset))
                .build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }

        let filter = WorkFilter {
            sort_policy: SortPolicy::Priority,
            ..Default::default()
        };
        let ids = ready_ids(&store, &filter);
        assert_eq!(ids, vec!["bd-b", "bd-c", "bd-a"]);
    }

    #[test]
    fn hybrid_sort_recent_before_stale() {
        let store = test_store();
        // Stale, top priority.
        let stale = IssueBuilder::new("Stale but urgent")
            .id("bd-stale")
            .priority(0)
            .created_at(Utc::now() - Duration::days(30))
            .build();
        // Recent, low priority.
        let recent = IssueBuilder::new("Fresh")
            .id("bd-fresh")
            .priority(4)
            .created_at(Utc::now() - Duration::hours(1))
            .build();
        store.create_issue_impl(&stale, "alice").unwrap();
        store.create_issue_impl(&recent, "alice").unwrap();

        let ids = ready_ids(&store, &WorkFilter::default());
        assert_eq!(ids, vec!["bd-fresh", "bd-stale"]);
    }

    #[test]
    fn oldest_sort_ignores_priority() {
        let store = test_store();
        let a = IssueBuilder::new("Older low prio")
            .id("bd-old")
            .priority(4)
            .created_at(Utc::now() - Duration::days(5))
            .build();
        let b = IssueBuilder::new("Newer high prio")
            .id("bd-new")
            .priority(0)
            .created_at(Utc::now() - Duration::days(1))
            .build();
        store.create_issue_impl(&a, "alice").unwrap();
        store.create_issue_impl(&b, "alice").unwrap();

        let filter = WorkFilter {
            sort_policy: SortPolicy::Oldest,
            ..Default::default()
        };
        assert_eq!(ready_ids(&store, &filter), vec!["bd-old", "bd-new"]);
    }

    #[test]
    fn limit_truncates_after_ordering() {
        let store = test_store();
        for i in 0..5 {
            let issue = IssueBuilder::new(format!("Issue {i}"))
                .id(format!("bd-l{i}"))
                .priority(i)
                .created_at(Utc::now() - Duration::minutes(5 - i as i64))
                .build();
            store.create_issue_impl(&issue, "alice").unwrap();
        }
        let filter = WorkFilter {
            sort_policy: SortPolicy::Priority,
            limit: Some(2),
            ..Default::default()
        };
        let ids = ready_ids(&store, &filter);
        assert_eq!(ids, vec!["bd-l0", "bd-l1"]);
    }

    #[test]
    fn external_dep_without_config_is_ready() {
        let store = test_store();
        create(&store, "bd-x");
        dep(&store, "bd-x", "external:auth:cap", DependencyType::Blocks);

        // No external_projects configured: the check is skipped entirely.
        let ids = ready_ids(&store, &WorkFilter::default());
        assert!(ids.contains(&"bd-x".to_string()));
    }

    #[test]
    fn external_dep_with_missing_project_blocks_readiness() {
        let store = test_store();
        create(&store, "bd-x");
        create(&store, "bd-y");
        dep(&store, "bd-x", "external:auth:cap", DependencyType::Blocks);
        store
            .set_config_impl("external_projects", "auth=/nonexistent/path")
            .unwrap();

        let ids = ready_ids(&store, &WorkFilter::default());
        assert!(!ids.contains(&"bd-x".to_string()));
        assert!(ids.contains(&"bd-y".to_string()));
    }

    #[test]
    fn unblocked_by_close() {
        let store = test_store();
        create(&store, "bd-a");
        create(&store, "bd-b");
        create(&store, "bd-c");
        dep(&store, "bd-b", "bd-a", DependencyType::Blocks);
        dep(&store, "bd-c", "bd-a", DependencyType::Blocks);
        dep(&store, "bd-c", "bd-b", DependencyType::Blocks);

        store.close_issue_impl("bd-a", "done", "alice").unwrap();
        let unblocked: Vec<String> = store
            .get_unblocked_by_close_impl("bd-a")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        // bd-b is free; bd-c still waits on bd-b.
        assert_eq!(unblocked, vec!["bd-b"]);
    }

    #[test]
    fn epics_eligible_for_closure() {
        let store = test_store();
        let epic = IssueBuilder::new("Epic")
            .id("bd-epic")
            .issue_type(braid_core::enums::IssueType::Epic)
            .build();
        store.create_issue_impl(&epic, "alice").unwrap();
        create(&store, "bd-ch1");
        create(&store, "bd-ch2");
        dep(&store, "bd-ch1", "bd-epic", DependencyType::ParentChild);
        dep(&store, "bd-ch2", "bd-epic", DependencyType::ParentChild);

        assert!(store.get_epics_eligible_for_closure_impl().unwrap().is_empty());

        store.close_issue_impl("bd-ch1", "done", "alice").unwrap();
        store.close_issue_impl("bd-ch2", "done", "alice").unwrap();

        let eligible = store.get_epics_eligible_for_closure_impl().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].epic.id, "bd-epic");
        assert_eq!(eligible[0].total_children, 2);
        assert_eq!(eligible[0].closed_children, 2);
    }

    #[test]
    fn ready_view_matches_ready_query() {
        let store = test_store();
        create(&store, "bd-v1");
        create(&store, "bd-v2");
        dep(&store, "bd-v2", "bd-v1", DependencyType::Blocks);

        let from_query: Vec<String> = ready_ids(&store, &WorkFilter::default());
        let conn = store.lock_conn().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM ready_issues ORDER BY id")
            .unwrap();
        let mut from_view: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        from_view.sort();
        let mut sorted_query = from_query.clone();
        sorted_query.sort();
        assert_eq!(sorted_query, from_view);
    }

    #[test]
    fn statistics_counts() {
        let store = test_store();
        create(&store, "bd-st1");
        let closed = IssueBuilder::new("Closed")
            .id("bd-st2")
            .status(Status::Closed)
            .closed_at(Utc::now())
            .build();
        store.create_issue_impl(&closed, "alice").unwrap();

        let stats = store.get_statistics_impl().unwrap();
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.open_issues, 1);
        assert_eq!(stats.closed_issues, 1);
        assert_eq!(stats.dirty_issues, 2);
    }

    #[test]
    fn dirty_list_clear() {
        let store = test_store();
        create(&store, "bd-d1");
        create(&store, "bd-d2");
        assert_eq!(store.get_dirty_issues_impl().unwrap().len(), 2);

        store
            .clear_dirty_issues_impl(&["bd-d1".to_string()])
            .unwrap();
        assert_eq!(store.get_dirty_issues_impl().unwrap(), vec!["bd-d2"]);
    }
}
