//! Batch resolver for `external:<project>:<capability>` dependencies.
//!
//! A capability is satisfied when the configured project path holds a
//! readable sibling database containing a closed issue labelled
//! `provides:<capability>`. Every failure mode (project not configured,
//! missing database, open error, query error) resolves to "unsatisfied"
//! with a human-readable reason; the ready planner treats those issues as
//! not ready rather than failing the query.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use braid_core::dependency::ExternalRef;

use crate::error::{Result, StorageError};
use crate::sync;

/// Outcome of resolving one external reference.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub satisfied: bool,
    /// Present when unsatisfied.
    pub reason: Option<String>,
}

impl ResolutionOutcome {
    fn satisfied() -> Self {
        Self {
            satisfied: true,
            reason: None,
        }
    }

    fn unsatisfied(reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason: Some(reason.into()),
        }
    }
}

/// Resolves a batch of external references.
///
/// Refs are grouped by project; each foreign database is opened read-only at
/// most once per batch and all of that project's capabilities are checked
/// with a single IN-query.
pub fn resolve_batch(
    projects: &HashMap<String, PathBuf>,
    refs: &HashSet<ExternalRef>,
) -> HashMap<ExternalRef, ResolutionOutcome> {
    let mut by_project: HashMap<&str, Vec<&ExternalRef>> = HashMap::new();
    for r in refs {
        by_project.entry(r.project.as_str()).or_default().push(r);
    }

    let mut outcomes = HashMap::new();
    for (project, project_refs) in by_project {
        match projects.get(project) {
            None => {
                for r in project_refs {
                    outcomes.insert(
                        r.clone(),
                        ResolutionOutcome::unsatisfied(format!(
                            "project '{project}' is not configured in external_projects"
                        )),
                    );
                }
            }
            Some(repo_path) => {
                let results = resolve_project(repo_path, &project_refs);
                outcomes.extend(results);
            }
        }
    }
    outcomes
}

/// Resolves all refs for one project against its database.
fn resolve_project(
    repo_path: &Path,
    refs: &[&ExternalRef],
) -> HashMap<ExternalRef, ResolutionOutcome> {
    let db_path = sibling_db_path(repo_path);
    let mut outcomes = HashMap::new();

    if !db_path.exists() {
        let reason = format!("no database at {}", db_path.display());
        for r in refs {
            outcomes.insert((*r).clone(), ResolutionOutcome::unsatisfied(reason.clone()));
        }
        return outcomes;
    }

    let conn = match Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => conn,
        Err(e) => {
            let reason = format!("cannot open {}: {e}", db_path.display());
            for r in refs {
                outcomes.insert((*r).clone(), ResolutionOutcome::unsatisfied(reason.clone()));
            }
            return outcomes;
        }
    };

    let labels: Vec<String> = refs.iter().map(|r| r.provides_label()).collect();
    let placeholders = labels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT DISTINCT l.label FROM labels l
         INNER JOIN issues i ON i.id = l.issue_id
         WHERE i.status = 'closed' AND l.label IN ({placeholders})"
    );

    let found: HashSet<String> = match conn
        .prepare(&sql)
        .and_then(|mut stmt| {
            stmt.query_map(rusqlite::params_from_iter(labels.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()
        }) {
        Ok(found) => found,
        Err(e) => {
            let reason = format!("query against {} failed: {e}", db_path.display());
            for r in refs {
                outcomes.insert((*r).clone(), ResolutionOutcome::unsatisfied(reason.clone()));
            }
            return outcomes;
        }
    };

    debug!(
        repo = %repo_path.display(),
        requested = refs.len(),
        satisfied = found.len(),
        "resolved external capabilities"
    );

    for r in refs {
        if found.contains(&r.provides_label()) {
            outcomes.insert((*r).clone(), ResolutionOutcome::satisfied());
        } else {
            outcomes.insert(
                (*r).clone(),
                ResolutionOutcome::unsatisfied(format!(
                    "no closed issue provides '{}' in {}",
                    r.capability,
                    repo_path.display()
                )),
            );
        }
    }
    outcomes
}

/// Locates the database inside a sibling repository. A path that already
/// names a database file is used directly.
fn sibling_db_path(repo_path: &Path) -> PathBuf {
    if repo_path.extension().is_some_and(|ext| ext == "db") {
        repo_path.to_path_buf()
    } else {
        sync::db_path(repo_path)
    }
}

/// Strict single-ref check for callers that want an error instead of an
/// unsatisfied outcome.
pub fn check_ref(projects: &HashMap<String, PathBuf>, r: &ExternalRef) -> Result<()> {
    let mut refs = HashSet::new();
    refs.insert(r.clone());
    let outcomes = resolve_batch(projects, &refs);
    match outcomes.get(r) {
        Some(o) if o.satisfied => Ok(()),
        Some(o) => Err(StorageError::Resolution {
            project: r.project.clone(),
            capability: r.capability.clone(),
            reason: o.reason.clone().unwrap_or_else(|| "unsatisfied".into()),
        }),
        None => Err(StorageError::Resolution {
            project: r.project.clone(),
            capability: r.capability.clone(),
            reason: "not resolved".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use braid_core::issue::IssueBuilder;

    fn provider_repo(dir: &Path, capability: &str, closed: bool) {
        let store = SqliteStore::open(sync::db_path(dir)).unwrap();
        let issue = IssueBuilder::new("Provider").id("bd-prov").build();
        store.create_issue_impl(&issue, "alice").unwrap();
        store
            .add_label_impl("bd-prov", &format!("provides:{capability}"), "alice")
            .unwrap();
        if closed {
            store.close_issue_impl("bd-prov", "shipped", "alice").unwrap();
        }
    }

    fn single_ref(spec: &str) -> (ExternalRef, HashSet<ExternalRef>) {
        let r = ExternalRef::parse(spec).unwrap();
        let mut set = HashSet::new();
        set.insert(r.clone());
        (r, set)
    }

    #[test]
    fn unconfigured_project_is_unsatisfied() {
        let (r, refs) = single_ref("external:auth:tokens");
        let outcomes = resolve_batch(&HashMap::new(), &refs);
        let o = &outcomes[&r];
        assert!(!o.satisfied);
        assert!(o.reason.as_ref().unwrap().contains("not configured"));
    }

    #[test]
    fn missing_database_is_unsatisfied() {
        let dir = tempfile::tempdir().unwrap();
        let mut projects = HashMap::new();
        projects.insert("auth".to_string(), dir.path().to_path_buf());

        let (r, refs) = single_ref("external:auth:tokens");
        let outcomes = resolve_batch(&projects, &refs);
        assert!(!outcomes[&r].satisfied);
    }

    #[test]
    fn closed_provider_satisfies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(sync::braid_dir(dir.path())).unwrap();
        provider_repo(dir.path(), "tokens", true);

        let mut projects = HashMap::new();
        projects.insert("auth".to_string(), dir.path().to_path_buf());

        let (r, refs) = single_ref("external:auth:tokens");
        let outcomes = resolve_batch(&projects, &refs);
        assert!(outcomes[&r].satisfied, "{:?}", outcomes[&r].reason);
    }

    #[test]
    fn open_provider_does_not_satisfy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(sync::braid_dir(dir.path())).unwrap();
        provider_repo(dir.path(), "tokens", false);

        let mut projects = HashMap::new();
        projects.insert("auth".to_string(), dir.path().to_path_buf());

        let (r, refs) = single_ref("external:auth:tokens");
        let outcomes = resolve_batch(&projects, &refs);
        assert!(!outcomes[&r].satisfied);
        assert!(outcomes[&r].reason.as_ref().unwrap().contains("no closed issue"));
    }

    #[test]
    fn check_ref_surfaces_resolution_error() {
        let (r, _) = single_ref("external:auth:tokens");
        let err = check_ref(&HashMap::new(), &r).unwrap_err();
        assert!(matches!(err, StorageError::Resolution { .. }));
        assert!(err.to_string().contains("auth"));
    }
}
