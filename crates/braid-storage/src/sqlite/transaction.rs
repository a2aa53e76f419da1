//! Transaction wrapper for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use braid_core::comment::Comment;
use braid_core::dependency::Dependency;
use braid_core::enums::DependencyType;
use braid_core::filter::IssueFilter;
use braid_core::issue::Issue;

use crate::cancel::CancelToken;
use crate::error::{Result, StorageError};
use crate::sqlite::comments;
use crate::sqlite::config;
use crate::sqlite::dependencies;
use crate::sqlite::issues;
use crate::sqlite::labels;
use crate::sqlite::store::SqliteStore;
use crate::traits::{IssueUpdates, Transaction};

/// A thin wrapper around a SQLite connection that is inside a transaction.
///
/// Holds a reference to the connection (which already has an active
/// transaction via `BEGIN`) and delegates to the same connection-level
/// helpers used by [`SqliteStore`].
pub(crate) struct SqliteTx<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) cancel: &'a CancelToken,
}

impl Transaction for SqliteTx<'_> {
    fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String> {
        issues::create_issue_on_conn(self.conn, self.cancel, issue, actor)
    }

    fn update_issue(&self, id: &str, updates: &IssueUpdates, actor: &str) -> Result<()> {
        issues::update_issue_on_conn(self.conn, self.cancel, id, updates, actor)
    }

    fn close_issue(&self, id: &str, reason: &str, actor: &str) -> Result<()> {
        issues::close_issue_on_conn(self.conn, self.cancel, id, reason, actor)
    }

    fn delete_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        issues::delete_issue_on_conn(self.conn, self.cancel, id, actor, reason)
    }

    fn get_issue(&self, id: &str) -> Result<Issue> {
        issues::get_issue_on_conn(self.conn, id)
    }

    fn search_issues(&self, query: &str, filter: &IssueFilter) -> Result<Vec<Issue>> {
        issues::search_issues_on_conn(self.conn, query, filter)
    }

    fn add_dependency(&self, dep: &Dependency, actor: &str) -> Result<()> {
        dependencies::add_dependency_on_conn(self.conn, self.cancel, dep, actor)
    }

    fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: &DependencyType,
        actor: &str,
    ) -> Result<()> {
        dependencies::remove_dependency_on_conn(
            self.conn,
            self.cancel,
            issue_id,
            depends_on_id,
            dep_type,
            actor,
        )
    }

    fn get_dependency_records(&self, issue_id: &str) -> Result<Vec<Dependency>> {
        dependencies::get_dependency_records_on_conn(self.conn, issue_id)
    }

    fn add_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::add_label_on_conn(self.conn, self.cancel, issue_id, label, actor)
    }

    fn remove_label(&self, issue_id: &str, label: &str, actor: &str) -> Result<()> {
        labels::remove_label_on_conn(self.conn, self.cancel, issue_id, label, actor)
    }

    fn get_labels(&self, issue_id: &str) -> Result<Vec<String>> {
        labels::get_labels_on_conn(self.conn, issue_id)
    }

    fn set_config(&self, key: &str, value: &str) -> Result<()> {
        config::set_config_on_conn(self.conn, key, value)
    }

    fn get_config(&self, key: &str) -> Result<String> {
        config::get_config_on_conn(self.conn, key)
            .ok_or_else(|| StorageError::not_found("config", key))
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        config::set_metadata_on_conn(self.conn, key, value)
    }

    fn get_metadata(&self, key: &str) -> Result<String> {
        config::get_metadata_on_conn(self.conn, key)
    }

    fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        comments::add_comment_on_conn(self.conn, issue_id, author, text)
    }

    fn import_comment(
        &self,
        issue_id: &str,
        author: &str,
        text: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        comments::import_comment_on_conn(self.conn, issue_id, author, text, created_at)
    }

    fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        comments::get_comments_on_conn(self.conn, issue_id)
    }
}

// ---------------------------------------------------------------------------
// SqliteStore::run_in_transaction
// ---------------------------------------------------------------------------

impl SqliteStore {
    /// Runs a closure inside a database transaction.
    pub fn run_in_transaction_impl(
        &self,
        f: &dyn Fn(&dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;

        let sqlite_tx = SqliteTx {
            conn: &tx,
            cancel: &self.cancel,
        };
        match f(&sqlite_tx) {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // Transaction is rolled back on drop.
                Err(e)
            }
        }
    }
}
