//! tree operations for table directories.
//!
//! in Git, a tree is a directory. In the Git backend:
//! - the root tree contains one directory per table plus metadata directories
//! - each table directory contains record blobs (`{id}.json`)
//! - the `_schemas` directory contains table definitions (`{table}.json`)
//!
//! this module provides safe abstractions over Git's tree manipulation.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RecordId, TableName, TreeId};

/// Directory holding serialized table schemas.
pub const SCHEMA_DIR: &str = "_schemas";

/// A read only handle to a git tree at a specific commit.
///
/// think of it as a snapshot - it won't change even if new commits are made.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// list all tables (top-level directories, excluding metadata)
    pub fn list_tables(&self) -> Vec<TableName> {
        self.tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Tree) {
                    return None;
                }
                // metadata directories start with '_' and fail validation
                TableName::new(entry.name()?).ok()
            })
            .collect()
    }

    /// get the subtree for a top-level directory, if present
    fn get_dir_tree(&self, repo: &'repo Repository, name: &str) -> StorageResult<Option<Tree<'repo>>> {
        match self.tree.get_name(name) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: name.into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(repo.find_tree(entry.id())?))
            }
            None => Ok(None),
        }
    }

    /// list `*.json` blobs of a directory as (stem, blob) pairs
    fn list_json_blobs(&self, repo: &'repo Repository, dir: &str) -> StorageResult<Vec<(String, BlobId)>> {
        let tree = match self.get_dir_tree(repo, dir)? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let entries = tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return None;
                }
                let stem = entry.name()?.strip_suffix(".json")?;
                Some((stem.to_string(), BlobId::new(entry.id())))
            })
            .collect();

        Ok(entries)
    }

    /// list all record ids in a table, with their blob ids
    ///
    /// a table without records has no directory; that reads as empty
    pub fn list_records(&self, repo: &'repo Repository, table: &TableName) -> StorageResult<Vec<(RecordId, BlobId)>> {
        self.list_json_blobs(repo, table.as_str())?
            .into_iter()
            .map(|(stem, blob)| Ok((RecordId::new(stem)?, blob)))
            .collect()
    }

    /// list schema documents as (table, blob) pairs
    pub fn list_schemas(&self, repo: &'repo Repository) -> StorageResult<Vec<(TableName, BlobId)>> {
        self.list_json_blobs(repo, SCHEMA_DIR)?
            .into_iter()
            .map(|(stem, blob)| Ok((TableName::new(stem)?, blob)))
            .collect()
    }
}

/// a mutable tree builder for making changes
///
/// changes accumulate and produce a new tree on `write`;
/// the original tree is not modified
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_record(&table, &id, blob_id)?;
/// mutator.put_schema(&table, schema_blob)?;
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// builders for directories touched so far
    modified_dirs: HashMap<String, Git2TreeBuilder<'repo>>,
    /// tree ids of directories present in the original tree
    original_dirs: HashMap<String, git2::Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(&tree.tree))?;

        let mut original_dirs = HashMap::new();
        for entry in tree.tree.iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original_dirs.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified_dirs: HashMap::new(),
            original_dirs,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified_dirs: HashMap::new(),
            original_dirs: HashMap::new(),
        })
    }

    /// get or create a builder for a top-level directory
    fn dir_builder(&mut self, dir: &str) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        if !self.modified_dirs.contains_key(dir) {
            let builder = match self.original_dirs.get(dir) {
                Some(original_id) => {
                    let original_tree = self.repo.find_tree(*original_id)?;
                    self.repo.treebuilder(Some(&original_tree))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified_dirs.insert(dir.to_string(), builder);
        }
        self.modified_dirs
            .get_mut(dir)
            .ok_or_else(|| StorageError::Internal(format!("missing tree builder for {}", dir)))
    }

    /// insert or replace a record blob, creating the table directory if needed
    pub fn upsert_record(&mut self, table: &TableName, id: &RecordId, blob_id: BlobId) -> StorageResult<()> {
        let filename = format!("{}.json", id);
        self.dir_builder(table.as_str())?
            .insert(&filename, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// store a table schema document
    pub fn put_schema(&mut self, table: &TableName, blob_id: BlobId) -> StorageResult<()> {
        let filename = format!("{}.json", table);
        self.dir_builder(SCHEMA_DIR)?
            .insert(&filename, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (dir, builder) in self.modified_dirs {
            let dir_tree_id = builder.write()?;
            self.root_builder.insert(&dir, dir_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// create the (empty) root tree of a new repository
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}
