//! Issue struct -- the central domain model for the braid engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::enums::{IssueType, Status};

/// Helper for `skip_serializing_if` on `bool` fields.
fn is_false(b: &bool) -> bool {
    !b
}

/// Helper for `skip_serializing_if` on `Vec` fields.
fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Represents a trackable work item.
///
/// Fields are organised into logical groups for maintainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    // ===== Core Identification =====
    #[serde(default)]
    pub id: String,

    /// SHA-256 of canonical content, recomputed on every write.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_hash: String,

    // ===== Issue Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    // ===== Status & Workflow =====
    #[serde(default, skip_serializing_if = "Status::is_default")]
    pub status: Status,

    /// Priority 0-4. Always serialized: 0 is valid (critical).
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "IssueType::is_default")]
    pub issue_type: IssueType,

    // ===== Assignment =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i32>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    // ===== Deletion (tombstones) =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub delete_reason: String,

    // ===== External Integration =====
    /// Globally unique when set (enforced by a partial unique index).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Which repo owns this issue (multi-repo support). Not exported: the
    /// JSONL file an issue lives in implies its repo.
    #[serde(skip)]
    pub source_repo: String,

    // ===== Compaction Metadata =====
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub compaction_level: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compacted_at_commit: Option<String>,

    /// Size in bytes of the heavy text fields before compaction.
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub original_size: i64,

    // ===== Context Markers =====
    /// Protects the issue from compaction and from sync overrides.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,

    /// Ephemeral ("wisp") issues live only in the local database and are
    /// never exported.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    // ===== Gate Fields (used by wisps) =====
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub await_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub await_id: String,

    /// Max wait time before escalation, stored as nanoseconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_serde"
    )]
    pub timeout: Option<std::time::Duration>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub waiters: Vec<String>,

    // ===== Relational Data (populated for export/import) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<Dependency>,
}

/// Serde helper module for `Option<std::time::Duration>` stored as nanoseconds.
mod duration_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        dur: &Option<std::time::Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match dur {
            Some(d) => serializer.serialize_u64(d.as_nanos() as u64),
            None => serializer.serialize_u64(0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<std::time::Duration>, D::Error> {
        let ns = u64::deserialize(deserializer)?;
        if ns == 0 {
            Ok(None)
        } else {
            Ok(Some(std::time::Duration::from_nanos(ns)))
        }
    }
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            content_hash: String::new(),
            title: String::new(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: String::new(),
            estimated_minutes: None,
            created_at: now,
            created_by: String::new(),
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            deleted_at: None,
            deleted_by: String::new(),
            delete_reason: String::new(),
            external_ref: None,
            source_repo: String::new(),
            compaction_level: 0,
            compacted_at: None,
            compacted_at_commit: None,
            original_size: 0,
            pinned: false,
            is_template: false,
            ephemeral: false,
            await_type: String::new(),
            await_id: String::new(),
            timeout: None,
            waiters: Vec::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

impl Issue {
    /// Applies default values for fields omitted during JSONL import.
    pub fn set_defaults(&mut self) {
        if self.status.as_str().is_empty() {
            self.status = Status::Open;
        }
        if self.issue_type.as_str().is_empty() {
            self.issue_type = IssueType::Task;
        }
        if self.source_repo.is_empty() {
            self.source_repo = ".".to_string();
        }
    }

    /// Total size in bytes of the heavy text fields.
    ///
    /// This is the quantity recorded as `original_size` before compaction.
    pub fn text_size(&self) -> i64 {
        (self.description.len()
            + self.design.len()
            + self.acceptance_criteria.len()
            + self.notes.len()) as i64
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn design(mut self, design: impl Into<String>) -> Self {
        self.issue.design = design.into();
        self
    }

    pub fn acceptance_criteria(mut self, ac: impl Into<String>) -> Self {
        self.issue.acceptance_criteria = ac.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.issue.status = status;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: IssueType) -> Self {
        self.issue.issue_type = issue_type;
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn estimated_minutes(mut self, minutes: i32) -> Self {
        self.issue.estimated_minutes = Some(minutes);
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn created_by(mut self, by: impl Into<String>) -> Self {
        self.issue.created_by = by.into();
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn external_ref(mut self, ext: impl Into<String>) -> Self {
        self.issue.external_ref = Some(ext.into());
        self
    }

    pub fn source_repo(mut self, repo: impl Into<String>) -> Self {
        self.issue.source_repo = repo.into();
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.issue.pinned = pinned;
        self
    }

    pub fn is_template(mut self, is_template: bool) -> Self {
        self.issue.is_template = is_template;
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.issue.ephemeral = ephemeral;
        self
    }

    pub fn await_type(mut self, t: impl Into<String>) -> Self {
        self.issue.await_type = t.into();
        self
    }

    pub fn await_id(mut self, id: impl Into<String>) -> Self {
        self.issue.await_id = id.into();
        self
    }

    pub fn timeout(mut self, d: std::time::Duration) -> Self {
        self.issue.timeout = Some(d);
        self
    }

    /// Consumes the builder and returns the constructed [`Issue`].
    pub fn build(self) -> Issue {
        self.issue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_issue() {
        let issue = Issue::default();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.priority, 2);
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn builder_basic() {
        let issue = IssueBuilder::new("Fix the bug")
            .priority(1)
            .status(Status::InProgress)
            .issue_type(IssueType::Bug)
            .assignee("alice")
            .build();

        assert_eq!(issue.title, "Fix the bug");
        assert_eq!(issue.priority, 1);
        assert_eq!(issue.status, Status::InProgress);
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert_eq!(issue.assignee, "alice");
    }

    #[test]
    fn issue_serde_roundtrip() {
        let issue = IssueBuilder::new("Test issue")
            .id("bd-abc123")
            .priority(1)
            .description("A test description")
            .build();

        let json = serde_json::to_string(&issue).unwrap();
        let back: Issue = serde_json::from_str(&json).unwrap();

        assert_eq!(back.title, "Test issue");
        assert_eq!(back.id, "bd-abc123");
        assert_eq!(back.priority, 1);
        assert_eq!(back.description, "A test description");
    }

    #[test]
    fn source_repo_not_serialized() {
        let issue = IssueBuilder::new("Local only")
            .id("bd-xyz")
            .source_repo("some/repo")
            .build();
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("some/repo"));
    }

    #[test]
    fn issue_set_defaults() {
        let json = r#"{"title": "hello"}"#;
        let mut issue: Issue = serde_json::from_str(json).unwrap();
        issue.set_defaults();
        assert_eq!(issue.status, Status::Open);
        assert_eq!(issue.issue_type, IssueType::Task);
        assert_eq!(issue.source_repo, ".");
    }

    #[test]
    fn text_size_sums_heavy_fields() {
        let issue = IssueBuilder::new("t")
            .description("12345")
            .design("123")
            .notes("12")
            .build();
        assert_eq!(issue.text_size(), 10);
    }
}
