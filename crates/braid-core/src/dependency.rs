//! Dependency types -- relationships between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// Represents a relationship between issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    /// Target of the edge. Either a local issue id or an external reference
    /// of the form `external:<project>:<capability>`.
    pub depends_on_id: String,

    /// Dependency type (serialised as "type" in JSON).
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    /// Type-specific edge data (JSON blob).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,
}

impl Dependency {
    /// Creates an edge with the current timestamp.
    pub fn new(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: String::new(),
            metadata: String::new(),
        }
    }
}

/// Counts for dependencies and dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyCounts {
    /// Number of issues this issue depends on.
    pub dependency_count: i32,
    /// Number of issues that depend on this issue.
    pub dependent_count: i32,
}

/// Metadata for waits-for dependencies (fanout gates).
///
/// Stored as JSON in the `Dependency.metadata` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitsForMeta {
    /// Gate type: "all-children" or "any-children".
    pub gate: String,
}

impl Default for WaitsForMeta {
    fn default() -> Self {
        Self {
            gate: waits_for_gate::ALL_CHILDREN.to_string(),
        }
    }
}

/// Gate constants for waits-for dependencies.
pub mod waits_for_gate {
    /// Wait for all children of the target to close (vacuously satisfied
    /// when the target has no children).
    pub const ALL_CHILDREN: &str = "all-children";
    /// Proceed when the first child closes.
    pub const ANY_CHILDREN: &str = "any-children";
}

/// Parses the gate out of a waits-for edge's metadata, defaulting to
/// all-children on absent or malformed metadata.
pub fn waits_for_gate_of(metadata: &str) -> String {
    if metadata.is_empty() {
        return waits_for_gate::ALL_CHILDREN.to_string();
    }
    serde_json::from_str::<WaitsForMeta>(metadata)
        .map(|m| m.gate)
        .unwrap_or_else(|_| waits_for_gate::ALL_CHILDREN.to_string())
}

/// Close reason written when a tracking issue auto-closes because every
/// tracked dependency closed.
pub const TRACKS_AUTO_CLOSE_REASON: &str = "all tracked issues closed";

/// Keywords that indicate an issue was closed due to failure.
///
/// Used by conditional-blocks dependencies to decide whether the gate
/// disengages. Matched case-insensitively as a substring of the close reason.
pub const FAILURE_CLOSE_KEYWORDS: &[&str] = &[
    "failed",
    "rejected",
    "wontfix",
    "won't fix",
    "cancelled",
    "canceled",
    "abandoned",
    "blocked",
    "error",
    "timeout",
    "aborted",
];

/// Returns `true` if the close reason indicates the issue failed.
pub fn is_failure_close(close_reason: &str) -> bool {
    if close_reason.is_empty() {
        return false;
    }
    let lower = close_reason.to_lowercase();
    FAILURE_CLOSE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Prefix marking a dependency target as an external capability reference.
pub const EXTERNAL_REF_PREFIX: &str = "external:";

/// A parsed `external:<project>:<capability>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalRef {
    pub project: String,
    pub capability: String,
}

impl ExternalRef {
    /// Parses an external reference, returning `None` unless both the
    /// project and capability segments are non-empty.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(EXTERNAL_REF_PREFIX)?;
        let (project, capability) = rest.split_once(':')?;
        if project.is_empty() || capability.is_empty() {
            return None;
        }
        Some(Self {
            project: project.to_string(),
            capability: capability.to_string(),
        })
    }

    /// Label carried by a providing issue in the foreign repository.
    pub fn provides_label(&self) -> String {
        format!("provides:{}", self.capability)
    }
}

impl std::fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "external:{}:{}", self.project, self.capability)
    }
}

/// Returns `true` if the id is an external capability reference rather than
/// a local issue id.
pub fn is_external_ref(id: &str) -> bool {
    id.starts_with(EXTERNAL_REF_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_serde_roundtrip() {
        let dep = Dependency::new("bd-abc", "bd-def", DependencyType::Blocks);

        let json = serde_json::to_string(&dep).unwrap();
        assert!(json.contains(r#""type":"blocks""#));

        let back: Dependency = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dep_type, DependencyType::Blocks);
        assert_eq!(back.issue_id, "bd-abc");
    }

    #[test]
    fn failure_close_detection() {
        assert!(is_failure_close("Build failed"));
        assert!(is_failure_close("wontfix"));
        assert!(is_failure_close("REJECTED by reviewer"));
        assert!(is_failure_close("Task failed due to timeout"));
        assert!(is_failure_close("won't fix this one"));
        assert!(!is_failure_close(""));
        assert!(!is_failure_close("Completed successfully"));
        assert!(!is_failure_close("done"));
    }

    #[test]
    fn waits_for_meta_defaults_to_all_children() {
        assert_eq!(waits_for_gate_of(""), waits_for_gate::ALL_CHILDREN);
        assert_eq!(waits_for_gate_of("not json"), waits_for_gate::ALL_CHILDREN);
        assert_eq!(
            waits_for_gate_of(r#"{"gate":"any-children"}"#),
            waits_for_gate::ANY_CHILDREN
        );
    }

    #[test]
    fn external_ref_parse() {
        let r = ExternalRef::parse("external:auth:oauth-tokens").unwrap();
        assert_eq!(r.project, "auth");
        assert_eq!(r.capability, "oauth-tokens");
        assert_eq!(r.provides_label(), "provides:oauth-tokens");
        assert_eq!(r.to_string(), "external:auth:oauth-tokens");

        assert!(ExternalRef::parse("external:auth").is_none());
        assert!(ExternalRef::parse("external::cap").is_none());
        assert!(ExternalRef::parse("external:proj:").is_none());
        assert!(ExternalRef::parse("bd-abc").is_none());
    }

    #[test]
    fn external_ref_detection() {
        assert!(is_external_ref("external:p:c"));
        assert!(!is_external_ref("bd-123"));
    }
}
