//! In-memory mirror of a device's storages.
//!
//! The cache performs no I/O. The session feeds it listings and device
//! confirmations; the cache owns the tree, validates caller snapshots against
//! it and decides what a mutation has to ask of the device.

use std::collections::HashSet;

use crate::error::{DeviceError, Result};
use crate::fs::node::{NodeType, ObjectId, ObjectNode, Storage, StorageId};
use crate::fs::tree::FsTree;

/// What the device has to do for a folder creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FolderPlan {
    /// A folder with that name already exists.
    Existing(ObjectNode),
    /// Ask the device to create it.
    Create {
        storage_id: StorageId,
        /// `None` when creating at the top of the storage
        parent: Option<ObjectId>,
        parent_id: ObjectId,
    },
}

/// Reject names a device cannot hold as a single path component.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DeviceError::InvalidTarget("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(DeviceError::InvalidTarget(format!(
            "name contains a path separator: {:?}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(DeviceError::InvalidTarget(format!("reserved name: {:?}", name)));
    }
    Ok(())
}

/// Tree of storages, folders and files for one session.
pub struct FilesystemCache {
    tree: FsTree,
    retired: HashSet<ObjectId>,
}

impl Default for FilesystemCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemCache {
    pub fn new() -> Self {
        Self {
            tree: FsTree::new(0),
            retired: HashSet::new(),
        }
    }

    /// Generation of the current tree; 0 before the first rebuild.
    pub fn generation(&self) -> u64 {
        self.tree.generation()
    }

    /// Number of nodes, storage roots included.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    pub(crate) fn retired(&self) -> &HashSet<ObjectId> {
        &self.retired
    }

    /// Swap in a fully built tree, returning the one it replaces.
    pub(crate) fn replace(&mut self, tree: FsTree) -> FsTree {
        std::mem::replace(&mut self.tree, tree)
    }

    /// Forget everything, including retired ids. Used when a session ends.
    pub(crate) fn clear(&mut self) {
        self.tree = FsTree::new(0);
        self.retired.clear();
    }

    /// Resolve a caller snapshot against the current tree.
    pub fn resolve(&self, node: &ObjectNode) -> Result<&ObjectNode> {
        let current = self
            .tree
            .get(node.object_id)
            .ok_or(DeviceError::NotFound(node.object_id))?;
        if current.parent_id != node.parent_id
            || current.storage_id != node.storage_id
            || current.node_type != node.node_type
        {
            return Err(DeviceError::StaleReference(node.object_id));
        }
        Ok(current)
    }

    pub fn node(&self, object_id: ObjectId) -> Option<ObjectNode> {
        self.tree.get(object_id).cloned()
    }

    pub fn storages(&self) -> Vec<Storage> {
        self.tree.storages()
    }

    /// Children of a storage root or folder, ordered by case-insensitive name.
    pub fn entries_of(&self, folder: &ObjectNode) -> Result<Vec<ObjectNode>> {
        let current = self.resolve(folder)?;
        if current.is_file() {
            return Err(DeviceError::InvalidTarget(format!(
                "{} is a file",
                current.full_path()
            )));
        }
        let children = self
            .tree
            .children(current.object_id)
            .ok_or(DeviceError::NotFound(current.object_id))?;
        Ok(children.cloned().collect())
    }

    /// Child folder of `parent` named `name`, compared case-insensitively.
    pub fn folder_named(&self, parent: ObjectId, name: &str) -> Option<ObjectNode> {
        self.tree.folder_named(parent, name).cloned()
    }

    /// Look up `/<storage>/<component>/...` case-insensitively.
    pub fn lookup<'a>(&self, storage: &str, components: impl IntoIterator<Item = &'a str>) -> Option<ObjectNode> {
        let root = self.tree.storage_named(storage)?;
        self.tree.descend(root.object_id, components).cloned()
    }

    /// Decide how to satisfy a folder creation.
    pub(crate) fn plan_folder(&self, parent: &ObjectNode, name: &str) -> Result<FolderPlan> {
        let parent = self.resolve(parent)?;
        if parent.is_file() {
            return Err(DeviceError::InvalidTarget(format!(
                "cannot create a folder under file {}",
                parent.full_path()
            )));
        }
        validate_name(name)?;

        if let Some(existing) = self.tree.folder_named(parent.object_id, name) {
            return Ok(FolderPlan::Existing(existing.clone()));
        }
        if let Some(file) = self.tree.file_named(parent.object_id, name) {
            return Err(DeviceError::InvalidTarget(format!(
                "a file named {} already exists",
                file.full_path()
            )));
        }

        Ok(FolderPlan::Create {
            storage_id: parent.storage_id,
            parent: (!parent.is_storage_root()).then_some(parent.object_id),
            parent_id: parent.object_id,
        })
    }

    /// Record a folder the device has just created.
    pub(crate) fn insert_folder(
        &mut self,
        parent_id: ObjectId,
        object_id: ObjectId,
        name: &str,
    ) -> Result<ObjectNode> {
        if self.retired.contains(&object_id) || self.tree.get(object_id).is_some() {
            return Err(DeviceError::TransportError(format!(
                "device reissued object id {:#x}",
                object_id
            )));
        }
        self.tree
            .insert_child(parent_id, object_id, name, NodeType::Folder, 0)
            .cloned()
            .ok_or(DeviceError::NotFound(parent_id))
    }

    /// Handles to delete for `node`, children before parents.
    pub(crate) fn plan_delete(&self, node: &ObjectNode) -> Result<Vec<ObjectId>> {
        let current = self.resolve(node)?;
        if current.is_storage_root() {
            return Err(DeviceError::InvalidTarget(format!(
                "cannot delete storage {}",
                current.full_path()
            )));
        }
        Ok(self.tree.post_order(current.object_id))
    }

    /// Drop an object the device confirmed as deleted and retire its id.
    pub(crate) fn remove_confirmed(&mut self, object_id: ObjectId) {
        for id in self.tree.remove(object_id) {
            self.retired.insert(id);
        }
    }

    pub(crate) fn set_space(&mut self, storage_id: StorageId, free: u64, total: u64) {
        self.tree.set_space(storage_id, free, total);
    }

    /// Indented text rendering of the whole tree.
    pub fn dump(&self) -> String {
        self.tree.dump()
    }

    #[cfg(test)]
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        self.tree.validate()
    }
}
