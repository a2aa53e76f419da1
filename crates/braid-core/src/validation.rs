//! Issue validation rules.

use crate::enums::Status;
use crate::issue::Issue;

/// Error type for validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("title is required")]
    TitleRequired,

    #[error("title must be 500 characters or less (got {0})")]
    TitleTooLong(usize),

    #[error("priority must be between 0 and 4 (got {0})")]
    InvalidPriority(i32),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid issue type: {0}")]
    InvalidIssueType(String),

    #[error("estimated_minutes cannot be negative")]
    NegativeEstimate,

    #[error("closed issues must have closed_at timestamp")]
    ClosedWithoutTimestamp,

    #[error("non-closed issues cannot have closed_at timestamp")]
    NotClosedWithTimestamp,

    #[error("tombstone issues must have deleted_at timestamp")]
    TombstoneWithoutDeletedAt,

    #[error("status cannot be set to tombstone via update; use delete")]
    TombstoneViaUpdate,
}

/// Validates an issue using built-in rules only.
pub fn validate(issue: &Issue) -> Result<(), ValidationError> {
    validate_with_custom(issue, &[], &[])
}

/// Validates an issue, allowing custom statuses and types.
pub fn validate_with_custom(
    issue: &Issue,
    custom_statuses: &[&str],
    custom_types: &[&str],
) -> Result<(), ValidationError> {
    check_common(issue, custom_statuses)?;
    // IssueType must be valid.
    if !issue.issue_type.is_valid_with_custom(custom_types) {
        return Err(ValidationError::InvalidIssueType(
            issue.issue_type.as_str().to_owned(),
        ));
    }
    Ok(())
}

/// Validates an issue for import (federation trust model).
///
/// Built-in statuses are validated to catch typos. Non-built-in issue types
/// are trusted since the source repo already validated them.
pub fn validate_for_import(
    issue: &Issue,
    custom_statuses: &[&str],
) -> Result<(), ValidationError> {
    check_common(issue, custom_statuses)
}

fn check_common(issue: &Issue, custom_statuses: &[&str]) -> Result<(), ValidationError> {
    // Title required, max 500 chars.
    if issue.title.is_empty() {
        return Err(ValidationError::TitleRequired);
    }
    if issue.title.chars().count() > 500 {
        return Err(ValidationError::TitleTooLong(issue.title.chars().count()));
    }
    // Priority 0-4.
    if issue.priority < 0 || issue.priority > 4 {
        return Err(ValidationError::InvalidPriority(issue.priority));
    }
    // Status must be valid.
    if !issue.status.is_valid_with_custom(custom_statuses) {
        return Err(ValidationError::InvalidStatus(
            issue.status.as_str().to_owned(),
        ));
    }
    // Estimated minutes cannot be negative.
    if let Some(est) = issue.estimated_minutes {
        if est < 0 {
            return Err(ValidationError::NegativeEstimate);
        }
    }
    // Closed-at invariant: closed <=> closed_at set. Tombstones are exempt
    // (they keep whatever close state they died with) but need deleted_at.
    match issue.status {
        Status::Closed => {
            if issue.closed_at.is_none() {
                return Err(ValidationError::ClosedWithoutTimestamp);
            }
        }
        Status::Tombstone => {
            if issue.deleted_at.is_none() {
                return Err(ValidationError::TombstoneWithoutDeletedAt);
            }
        }
        _ => {
            if issue.closed_at.is_some() {
                return Err(ValidationError::NotClosedWithTimestamp);
            }
        }
    }

    Ok(())
}
