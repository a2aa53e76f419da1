//! Deterministic content hashing for issues.
//!
//! Produces a SHA-256 hex digest over all substantive fields (excluding ID,
//! timestamps, and compaction metadata) so that identical content produces
//! identical hashes across all clones. Hydrate uses the hash as its change
//! signal, so the field list and order must stay stable.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Separator byte written between fields.
const SEP: u8 = 0;

/// Computes a deterministic content hash for an issue.
pub fn compute_content_hash(issue: &Issue) -> String {
    let mut h = Sha256::new();

    // Core fields in stable order.
    write_str(&mut h, &issue.title);
    write_str(&mut h, &issue.description);
    write_str(&mut h, &issue.design);
    write_str(&mut h, &issue.acceptance_criteria);
    write_str(&mut h, &issue.notes);
    write_str(&mut h, issue.status.as_str());
    write_int(&mut h, issue.priority);
    write_str(&mut h, issue.issue_type.as_str());
    write_str(&mut h, &issue.assignee);
    write_str(&mut h, &issue.created_by);
    write_int(&mut h, issue.estimated_minutes.unwrap_or(0));

    // Close / delete state.
    write_str(&mut h, &issue.close_reason);
    write_str(&mut h, &issue.delete_reason);

    // External integration.
    write_str_opt(&mut h, issue.external_ref.as_deref());

    // Context markers.
    write_flag(&mut h, issue.pinned, "pinned");
    write_flag(&mut h, issue.is_template, "template");

    // Gate fields.
    write_str(&mut h, &issue.await_type);
    write_str(&mut h, &issue.await_id);
    write_duration(&mut h, issue.timeout);
    for waiter in &issue.waiters {
        write_str(&mut h, waiter);
    }

    format!("{:x}", h.finalize())
}

// -- helper writers --------------------------------------------------------

fn write_str(h: &mut Sha256, s: &str) {
    h.update(s.as_bytes());
    h.update([SEP]);
}

fn write_int(h: &mut Sha256, n: i32) {
    h.update(n.to_string().as_bytes());
    h.update([SEP]);
}

fn write_str_opt(h: &mut Sha256, s: Option<&str>) {
    if let Some(s) = s {
        h.update(s.as_bytes());
    }
    h.update([SEP]);
}

fn write_duration(h: &mut Sha256, d: Option<std::time::Duration>) {
    let ns = d.map(|d| d.as_nanos() as i64).unwrap_or(0);
    h.update(ns.to_string().as_bytes());
    h.update([SEP]);
}

fn write_flag(h: &mut Sha256, b: bool, label: &str) {
    if b {
        h.update(label.as_bytes());
    }
    h.update([SEP]);
}
