//! Core Git repository wrapper.
//!
//! Wraps `git2::Repository` with thread-safe access and provides the
//! high-level operations the Git backend needs: loading committed records
//! and schemas from the tip of `main`, and turning a write batch into a
//! single commit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;
use serde_json::Value;

use crate::storage::backend::WriteBatch;
use crate::storage::blob::{self, Record};
use crate::storage::commit::{self, CommitInfo, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{BranchName, CommitId, GitSignature, RecordId, RecordPath, TableName};

/// The main Git repository wrapper.
///
/// Clone this to share across threads - it uses Arc internally.
/// `git2::Repository` is `Send` but not `Sync`, so access is serialized
/// through a mutex.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        let storage = Self::wrap(repo, path, signature);
        // a repository created by another tool may lack main
        storage.head()?;
        Ok(storage)
    }

    /// Initialize a new repository with an empty initial commit on `main`.
    pub fn init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let storage = Self::wrap(repo, path, signature);

        storage.with_repo(|repo| {
            let commit_id = commit::create_initial_commit(repo, &storage.inner.signature)?;
            refs::init_main(repo, commit_id)?;
            Ok(())
        })?;

        tracing::info!(path = %path.display(), "initialized git storage");
        Ok(storage)
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path, signature)
        } else {
            Self::init(path, signature)
        }
    }

    fn wrap(repo: Repository, path: &Path, signature: GitSignature) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// tip of `main`
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(|repo| refs::resolve(repo, &BranchName::main()))
    }

    // ==================== Reads ====================

    /// List all tables holding at least one record.
    pub fn list_tables(&self, at: CommitId) -> StorageResult<Vec<TableName>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            Ok(tree.list_tables())
        })
    }

    /// Scan all records in a table.
    ///
    /// Warning: This reads every record into memory.
    pub fn scan_table(&self, table: &TableName, at: CommitId) -> StorageResult<Vec<Record>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let entries = tree.list_records(repo, table)?;

            let mut records = Vec::with_capacity(entries.len());
            for (id, blob_id) in entries {
                let bytes = blob::read_blob(repo, blob_id)?;
                records.push(blob::deserialize_record(&bytes, &id)?);
            }
            Ok(records)
        })
    }

    /// Load every stored schema document.
    pub fn load_schemas(&self, at: CommitId) -> StorageResult<Vec<(TableName, Value)>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut schemas = Vec::new();
            for (table, blob_id) in tree.list_schemas(repo)? {
                let bytes = blob::read_blob(repo, blob_id)?;
                schemas.push((table, serde_json::from_slice(&bytes)?));
            }
            Ok(schemas)
        })
    }

    // ==================== Writes ====================

    /// Store a schema document as its own commit on `main`.
    pub fn put_schema(&self, table: &TableName, schema: &Value) -> StorageResult<CommitId> {
        let bytes = serde_json::to_vec_pretty(schema)?;

        self.commit_on_main(CommitMessage::define_table(table.as_str()), |repo, mutator| {
            let blob_id = blob::write_raw_blob(repo, &bytes)?;
            mutator.put_schema(table, blob_id)
        })
    }

    /// Write every record of a batch in one commit on `main`.
    ///
    /// Either the whole batch lands or `main` is left untouched.
    pub fn commit_batch(&self, batch: &WriteBatch) -> StorageResult<CommitId> {
        let paths: Vec<String> = batch
            .entries()
            .iter()
            .map(|entry| RecordPath::new(entry.table.clone(), entry.record.id.clone()).to_string())
            .collect();
        let message = CommitMessage::batch(batch.tx_id(), batch.inserts(), batch.updates(), &paths);

        self.commit_on_main(message, |repo, mutator| {
            for entry in batch.entries() {
                let blob_id = blob::write_blob(repo, &entry.record)?;
                mutator.upsert_record(&entry.table, &entry.record.id, blob_id)?;
            }
            Ok(())
        })
    }

    fn commit_on_main<F>(&self, message: String, edit: F) -> StorageResult<CommitId>
    where
        F: FnOnce(&Repository, &mut TreeMutator<'_>) -> StorageResult<()>,
    {
        self.with_repo(|repo| {
            let main = BranchName::main();
            let parent = refs::resolve(repo, &main)?;
            let tree = commit::get_tree_at_commit(repo, parent)?;

            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            edit(repo, &mut mutator)?;
            let new_tree_id = mutator.write()?;

            let commit_id = commit::write_commit(repo, new_tree_id, Some(parent), &message, &self.inner.signature)?;

            refs::advance(repo, &main, parent, commit_id)?;
            tracing::debug!(commit = %commit_id.short(), "advanced main");
            Ok(commit_id)
        })
    }

    /// Commit history of `main`, newest first.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let head = refs::resolve(repo, &BranchName::main())?;
            commit::history(repo, head, limit)
        })
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .field("signature", &self.inner.signature)
            .finish()
    }
}
