//! Storage error types.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g., "issue", "config").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A unique constraint was violated (strict insert, external-ref).
    #[error("duplicate {entity}: {id}")]
    Duplicate {
        /// The kind of entity.
        entity: String,
        /// The conflicting identifier.
        id: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(#[from] braid_core::validation::ValidationError),

    /// Adding a dependency would create a cycle in the dependency graph.
    #[error("adding this dependency would create a cycle")]
    CycleDetected,

    /// A hierarchical id constraint was violated.
    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    /// A schema migration cannot proceed given existing data.
    #[error("migration {name} failed: {reason}")]
    Migration {
        /// Name of the migration that failed.
        name: String,
        /// Underlying error description.
        reason: String,
    },

    /// Foreign-key or orphan-dependency violation detected at hydrate time.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// External-capability resolution failed.
    #[error("cannot resolve external:{project}:{capability}: {reason}")]
    Resolution {
        /// The configured project name.
        project: String,
        /// The requested capability.
        capability: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The operation was aborted via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The database is locked by another process.
    #[error("database locked: {0}")]
    DatabaseLocked(String),

    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction operation failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A raw SQLite query error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem or database file problem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Hierarchical-id violations.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("parent {parent} of {id} does not exist and could not be resurrected")]
    MissingParent {
        /// The child id being created.
        id: String,
        /// The missing parent id.
        parent: String,
    },

    #[error("parent-child edge is reversed: {parent} is an ancestor of {child}")]
    ReversedEdge {
        /// The alleged child (edge source).
        child: String,
        /// The alleged parent (edge target).
        parent: String,
    },

    #[error("hierarchy depth {depth} exceeds maximum {max} for {id}")]
    DepthExceeded {
        /// The offending id.
        id: String,
        /// Its nesting depth.
        depth: usize,
        /// The configured maximum.
        max: usize,
    },
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StorageError::NotFound`] for the given entity kind and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a [`StorageError::Duplicate`] for the given entity kind and id.
    pub fn duplicate(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity: entity.into(),
            id: id.into(),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry (e.g., database locked, connection errors).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseLocked(_) | Self::Connection(_) | Self::Transaction(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_predicate() {
        let err = StorageError::not_found("issue", "bd-zzz");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_predicate() {
        assert!(StorageError::Connection("gone".into()).is_retryable());
        assert!(!StorageError::CycleDetected.is_retryable());
    }

    #[test]
    fn hierarchy_error_message() {
        let err = StorageError::Hierarchy(HierarchyError::DepthExceeded {
            id: "bd-a.1.2.3.4".into(),
            depth: 4,
            max: 3,
        });
        assert!(err.to_string().contains("exceeds maximum 3"));
    }
}
