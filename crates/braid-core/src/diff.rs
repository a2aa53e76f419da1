//! Field-by-field comparison of issues.

use crate::issue::Issue;

/// Names of fields that differ between two issues, in declaration order.
///
/// Compares the substantive fields only: identity, bookkeeping timestamps,
/// and compaction metadata are not content.
pub fn changed_fields(a: &Issue, b: &Issue) -> Vec<&'static str> {
    let mut changed = Vec::new();
    let mut check = |name: &'static str, differs: bool| {
        if differs {
            changed.push(name);
        }
    };

    check("title", a.title != b.title);
    check("description", a.description != b.description);
    check("design", a.design != b.design);
    check(
        "acceptance_criteria",
        a.acceptance_criteria != b.acceptance_criteria,
    );
    check("notes", a.notes != b.notes);
    check("status", a.status != b.status);
    check("priority", a.priority != b.priority);
    check("issue_type", a.issue_type != b.issue_type);
    check("assignee", a.assignee != b.assignee);
    check(
        "estimated_minutes",
        a.estimated_minutes != b.estimated_minutes,
    );
    check("close_reason", a.close_reason != b.close_reason);
    check("delete_reason", a.delete_reason != b.delete_reason);
    check("external_ref", a.external_ref != b.external_ref);
    check("pinned", a.pinned != b.pinned);
    check("is_template", a.is_template != b.is_template);
    check("ephemeral", a.ephemeral != b.ephemeral);
    check("await_type", a.await_type != b.await_type);
    check("await_id", a.await_id != b.await_id);
    check("timeout", a.timeout != b.timeout);
    check("waiters", a.waiters != b.waiters);

    changed
}
