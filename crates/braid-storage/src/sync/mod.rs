//! Multi-repo synchronization: JSONL export/hydrate and resurrection.
//!
//! Each repository keeps its database and append log under a `.braid/`
//! directory; the JSONL file is the unit of exchange between clones (held in
//! version control and merged by git).

use std::path::{Path, PathBuf};

pub mod export;
pub mod hydrate;
pub mod resurrect;

pub use export::{ExportSummary, export_repos};
pub use hydrate::{HydrateSummary, hydrate_repos, remove_repo};

/// The per-repository data directory.
pub fn braid_dir(repo: &Path) -> PathBuf {
    repo.join(".braid")
}

/// The embedded database file of a repository.
pub fn db_path(repo: &Path) -> PathBuf {
    braid_dir(repo).join("braid.db")
}

/// The JSONL append log of a repository.
pub fn jsonl_path(repo: &Path) -> PathBuf {
    braid_dir(repo).join("issues.jsonl")
}

/// Resolves a `source_repo` value against the primary repository root.
/// `"."` is the primary repo itself; anything else is a path, taken as-is
/// when absolute and joined to the root otherwise.
pub(crate) fn resolve_repo_dir(root: &Path, source_repo: &str) -> PathBuf {
    if source_repo == "." || source_repo.is_empty() {
        root.to_path_buf()
    } else {
        let p = Path::new(source_repo);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            root.join(p)
        }
    }
}

/// Nanosecond mtime of a file, from a no-follow stat so a symlink's own
/// mtime is what gets cached.
pub(crate) fn mtime_ns(path: &Path) -> std::io::Result<i64> {
    let meta = std::fs::symlink_metadata(path)?;
    let mtime = meta.modified()?;
    let ns = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    Ok(ns)
}
