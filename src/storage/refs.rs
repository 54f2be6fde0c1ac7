//! The `main` branch ref.
//!
//! Committed state always lives on `main`. Advancing it is a compare-and-swap
//! so a second process writing to the same repository cannot be silently
//! overwritten.

use git2::{ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

/// Commit a branch currently points at.
pub fn resolve(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
    let missing = || StorageError::RefNotFound(branch.to_string());
    let commit = repo
        .find_reference(&branch.as_ref_path())
        .and_then(|reference| reference.peel_to_commit())
        .map_err(|_| missing())?;
    Ok(CommitId::new(commit.id()))
}

pub fn exists(repo: &Repository, branch: &BranchName) -> bool {
    repo.find_reference(&branch.as_ref_path()).is_ok()
}

/// Move `branch` from `expected` to `target`.
///
/// Fails with `ConcurrentModification` when the branch no longer points at
/// `expected`; the ref is left untouched in that case.
pub fn advance(repo: &Repository, branch: &BranchName, expected: CommitId, target: CommitId) -> StorageResult<()> {
    let moved = || StorageError::ConcurrentModification {
        branch: branch.to_string(),
    };

    if resolve(repo, branch)? != expected {
        return Err(moved());
    }

    let log = format!("advance {} to {}", branch, target.short());
    match repo.reference_matching(&branch.as_ref_path(), target.raw(), true, expected.raw(), &log) {
        Ok(_) => Ok(()),
        Err(e) if e.code() == ErrorCode::Modified => Err(moved()),
        Err(e) => Err(e.into()),
    }
}

/// Create `main` at `root` when missing and make it HEAD.
pub fn init_main(repo: &Repository, root: CommitId) -> StorageResult<()> {
    let main = BranchName::main();
    if !exists(repo, &main) {
        repo.reference(&main.as_ref_path(), root.raw(), false, "create main")?;
    }
    repo.set_head(&main.as_ref_path())?;
    Ok(())
}
