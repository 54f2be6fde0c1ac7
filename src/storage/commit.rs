//! Commit objects and the commit log.
//!
//! In the Git backend every committed transaction becomes exactly one commit
//! on `main`, so the commit log doubles as the transaction log.

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::TreeHandle;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// A commit on `main` as reported by `Database::history`.
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    /// first line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    /// transaction id recorded in the message, if any
    pub fn tx_id(&self) -> Option<&str> {
        self.summary()
            .split_whitespace()
            .find_map(|word| word.strip_prefix("tx:"))
    }
}

/// Write a commit object for `tree_id`. No ref is moved.
pub fn write_commit(
    repo: &Repository,
    tree_id: TreeId,
    parent: Option<CommitId>,
    message: &str,
    signature: &GitSignature,
) -> StorageResult<CommitId> {
    let tree = repo.find_tree(tree_id.raw())?;
    let sig = signature.to_git2_signature()?;
    let parent = parent.map(|id| repo.find_commit(id.raw())).transpose()?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo.commit(None, &sig, &sig, message, &tree, &parents)?;
    Ok(CommitId::new(oid))
}

pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    Ok(TreeHandle::new(commit.tree()?))
}

/// Parentless commit over an empty tree.
pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    let tree_id = crate::storage::tree::create_initial_tree(repo)?;
    write_commit(repo, tree_id, None, &CommitMessage::init(), signature)
}

/// Commits reachable from `start`, newest first, at most `limit` of them.
pub fn history(repo: &Repository, start: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(start.raw())?;
    revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

    revwalk
        .take(limit.unwrap_or(usize::MAX))
        .map(|oid| -> StorageResult<CommitInfo> {
            let commit = repo.find_commit(oid?)?;
            Ok(CommitInfo::from_git2(&commit))
        })
        .collect()
}

/// message formatting for backend commits
pub struct CommitMessage;

impl CommitMessage {
    pub fn init() -> String {
        "[hookdb] Initialize repository".to_string()
    }

    /// message for a committed transaction
    ///
    /// the first line summarises counts, following lines list touched paths
    pub fn batch(tx_id: &str, inserts: usize, updates: usize, paths: &[String]) -> String {
        let mut message = format!("[COMMIT] {} insert(s), {} update(s) tx:{}", inserts, updates, tx_id);
        if !paths.is_empty() {
            message.push_str("\n\n");
            message.push_str(&paths.join("\n"));
        }
        message
    }

    pub fn define_table(table: &str) -> String {
        format!("[DEFINE TABLE] {}", table)
    }
}
