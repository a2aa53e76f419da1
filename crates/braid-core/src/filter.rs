//! Filter types for querying issues.

use crate::enums::{IssueType, SortPolicy, Status};

/// Filter for issue search queries.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,

    /// AND semantics: issue must have ALL these labels. Whitespace in label
    /// values is the caller's responsibility to normalize.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    // Numeric ranges
    pub priority_min: Option<i32>,
    pub priority_max: Option<i32>,

    /// Filter by source_repo field (None = any).
    pub source_repo: Option<String>,

    /// Include tombstoned issues in results. Off by default.
    pub include_tombstones: bool,

    pub limit: Option<i32>,
}

/// Filter for ready/blocked work queries.
#[derive(Debug, Clone, Default)]
pub struct WorkFilter {
    /// Restrict to a single status. None means open or in_progress.
    pub status: Option<Status>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    /// Filter for issues with no assignee.
    pub unassigned: bool,

    /// AND semantics: issue must have ALL these labels.
    pub labels: Vec<String>,
    /// OR semantics: issue must have AT LEAST ONE of these labels.
    pub labels_any: Vec<String>,

    /// Restrict to descendants of this issue via parent-child edges. The
    /// scope root itself is excluded from results.
    pub parent_scope: Option<String>,

    pub sort_policy: SortPolicy,
    pub limit: Option<i32>,
}
