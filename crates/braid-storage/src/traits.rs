//! Storage and Transaction traits -- the public API for issue persistence.
//!
//! Consumers depend on these traits rather than on concrete implementations so
//! that alternative backends (mocks, proxies, etc.) can be substituted.

use chrono::{DateTime, Utc};

use braid_core::comment::{Comment, Event};
use braid_core::dependency::{Dependency, DependencyCounts};
use braid_core::enums::{DependencyType, IssueType, Status};
use braid_core::filter::{IssueFilter, WorkFilter};
use braid_core::issue::Issue;

use crate::error::Result;

// ---------------------------------------------------------------------------
// View / helper types
// ---------------------------------------------------------------------------

/// Typed partial-update struct for issues.
///
/// Only `Some` fields are applied; `None` fields are left unchanged.
/// `Option<Option<T>>` fields distinguish "leave alone" (outer `None`) from
/// "clear" (inner `None`).
#[derive(Debug, Clone, Default)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub estimated_minutes: Option<Option<i32>>,
    pub close_reason: Option<String>,
    pub external_ref: Option<Option<String>>,
    pub pinned: Option<bool>,
    pub is_template: Option<bool>,
    pub await_type: Option<String>,
    pub await_id: Option<String>,
    pub timeout: Option<Option<std::time::Duration>>,
    pub waiters: Option<Vec<String>>,
}

/// A node in a dependency tree traversal.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The issue at this node.
    pub issue: Issue,
    /// Depth from the root (0 = root).
    pub depth: i32,
    /// The dependency type of the edge leading to this node.
    pub dep_type: DependencyType,
    /// Set when traversal stopped here because depth hit the caller's max.
    pub truncated: bool,
}

/// An issue that is blocked, with the ids that block it.
#[derive(Debug, Clone)]
pub struct BlockedIssue {
    /// The blocked issue.
    pub issue: Issue,
    /// Direct blocker ids (empty for purely transitive rows).
    pub blocked_by: Vec<String>,
    /// True when blockedness was inherited from a parent-child ancestor.
    pub transitive: bool,
}

/// Status of an epic with respect to its children.
#[derive(Debug, Clone)]
pub struct EpicStatus {
    /// The epic issue.
    pub epic: Issue,
    /// Total number of child issues.
    pub total_children: i32,
    /// Number of closed child issues.
    pub closed_children: i32,
}

/// Compaction tier selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTier {
    /// First pass: summarize heavy text fields of old closed issues.
    Tier1,
    /// Second pass: aggressive summarization of long-lived level-1 issues.
    Tier2,
}

impl CompactionTier {
    /// The compaction level this tier transitions an issue to.
    pub fn level(self) -> i32 {
        match self {
            Self::Tier1 => 1,
            Self::Tier2 => 2,
        }
    }
}

/// Result of a compaction eligibility check.
#[derive(Debug, Clone)]
pub struct Eligibility {
    pub eligible: bool,
    /// Human-readable reason when not eligible.
    pub reason: Option<String>,
}

/// Aggregate statistics about the issue database.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_issues: i64,
    pub open_issues: i64,
    pub in_progress_issues: i64,
    pub blocked_issues: i64,
    pub closed_issues: i64,
    pub tombstone_issues: i64,
    /// Issues currently in the blocked cache.
    pub cached_blocked: i64,
    /// Issues awaiting export.
    pub dirty_issues: i64,
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Primary storage interface for issue persistence.
pub trait Storage: Send + Sync {
    // -- Issue CRUD ----------------------------------------------------------

    /// Creates a new issue and emits a "created" event. Fails with
    /// `Duplicate` when the id already exists.
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String>;

    /// Creates multiple issues in a single transaction; rolls back on the
    /// first validation failure so no phantom ids are observable.
    fn create_issues(&self, issues: &[Issue], actor: &str) -> Result<Vec<String>>;

    /// Retrieves an issue by its ID.
    fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Retrieves an issue by its external reference.
    fn get_issue_by_external_ref(&self, external_ref: &str) -> Result<Issue>;

    /// Retrieves multiple issues by their IDs.
    fn get_issues_by_ids(&self, ids: &[String]) -> Result<Vec<Issue>>;

    /// Applies partial updates to an issue and emits an "updated" event.
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;

    /// Closes an issue (sets status=closed, closed_at=now) and emits a
    /// "closed" event.
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;

    /// Deletes an issue: transitions it to a tombstone and removes its
    /// dependencies and labels.
    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()>;

    /// Searches issues by text query and optional filter.
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependencies --------------------------------------------------------

    /// Adds a dependency edge between two issues.
    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;

    /// Removes a dependency edge.
    fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<()>;

    /// Returns the edges leaving the given issue, with the target issues.
    fn get_dependencies(&self, issue_id: &str) -> Result<Vec<(Dependency, Option<Issue>)>>;

    /// Returns the edges pointing at the given issue, with the source issues.
    fn get_dependents(&self, issue_id: &str) -> Result<Vec<(Dependency, Issue)>>;

    /// Traverses the dependency tree from the given root.
    fn get_dependency_tree(
        &self,
        issue_id: &str,
        max_depth: i32,
        show_all_paths: bool,
        reverse: bool,
    ) -> Result<Vec<TreeNode>>;

    /// Diagnostic: returns every elementary cycle reachable in the blocking
    /// graph. The same cycle may be reported from multiple entry points.
    fn detect_cycles(&self) -> Result<Vec<Vec<String>>>;

    /// Bulk dependency/dependent counts. Missing ids count as (0, 0).
    fn get_dependency_counts(&self, ids: &[String]) -> Result<Vec<(String, DependencyCounts)>>;

    // -- Labels --------------------------------------------------------------

    /// Adds a label to an issue.
    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Removes a label from an issue.
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;

    /// Returns all labels for an issue.
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    /// Returns all issues with the given label.
    fn get_issues_by_label(&self, label: &str) -> Result<Vec<Issue>>;

    // -- Work queries --------------------------------------------------------

    /// Returns issues that are ready to work on: open or in-progress, not in
    /// the blocked cache, with all external capabilities satisfied.
    fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>>;

    /// Returns currently-blocked issues with their blockers.
    fn get_blocked_issues(&self, filter: &WorkFilter) -> Result<Vec<BlockedIssue>>;

    /// Returns issues that depended on `closed_id` and are no longer blocked.
    fn get_unblocked_by_close(&self, closed_id: &str) -> Result<Vec<Issue>>;

    /// Returns epics where all children are closed.
    fn get_epics_eligible_for_closure(&self) -> Result<Vec<EpicStatus>>;

    // -- Compaction ----------------------------------------------------------

    /// Returns candidate ids for the given compaction tier.
    fn get_compaction_candidates(&self, tier: CompactionTier) -> Result<Vec<String>>;

    /// Reports whether a specific issue is eligible for the given tier.
    fn check_compaction_eligibility(
        &self,
        id: &str,
        tier: CompactionTier,
    ) -> Result<Eligibility>;

    /// Persists a compaction transition: metadata only; the text rewrite
    /// happens in an external collaborator before this call.
    fn apply_compaction(
        &self,
        id: &str,
        tier: CompactionTier,
        commit: Option<&str>,
        original_size: i64,
        actor: &str,
    ) -> Result<()>;

    // -- Comments and events -------------------------------------------------

    /// Adds a comment to an issue and returns the created comment.
    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;

    /// Returns all comments for an issue.
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;

    /// Returns recent events for an issue.
    fn get_events(&self, issue_id: &str, limit: i32) -> Result<Vec<Event>>;

    // -- Dirty list ----------------------------------------------------------

    /// Returns ids changed since the last export.
    fn get_dirty_issues(&self) -> Result<Vec<String>>;

    /// Clears dirty markers for the given ids.
    fn clear_dirty_issues(&self, ids: &[String]) -> Result<()>;

    // -- Statistics ----------------------------------------------------------

    /// Returns aggregate statistics about the issue database.
    fn get_statistics(&self) -> Result<Statistics>;

    // -- Configuration -------------------------------------------------------

    /// Sets a configuration key-value pair.
    fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Gets a configuration value by key.
    fn get_config(&self, key: &str) -> Result<String>;

    /// Returns all configuration key-value pairs.
    fn get_all_config(&self) -> Result<std::collections::HashMap<String, String>>;

    // -- Transactions --------------------------------------------------------

    /// Executes a closure within a database transaction.
    ///
    /// If the closure returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    fn run_in_transaction(&self, f: &dyn Fn(&dyn Transaction) -> Result<()>) -> Result<()>;

    // -- Lifecycle -----------------------------------------------------------

    /// Closes the database connection and releases resources.
    fn close(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Transaction trait
// ---------------------------------------------------------------------------

/// Subset of [`Storage`] methods available inside a transaction.
///
/// All operations share a single database connection and are committed or
/// rolled back atomically.
pub trait Transaction {
    // -- Issue operations ----------------------------------------------------

    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String>;
    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()>;
    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()>;
    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()>;
    fn get_issue(&self, id: &str) -> Result<Issue>;
    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>>;

    // -- Dependency operations -----------------------------------------------

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()>;
    fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<()>;
    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>>;

    // -- Label operations ----------------------------------------------------

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()>;
    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>>;

    // -- Config operations ---------------------------------------------------

    fn set_config(&self, key: &str, value: &str) -> Result<()>;
    fn get_config(&self, key: &str) -> Result<String>;

    // -- Metadata operations -------------------------------------------------

    fn set_metadata(&self, key: &str, value: &str) -> Result<()>;
    fn get_metadata(&self, key: &str) -> Result<String>;

    // -- Comment operations --------------------------------------------------

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment>;
    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment>;
    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>>;
}
