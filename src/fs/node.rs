//! Filesystem node types.

use serde::{Deserialize, Serialize};

/// Device-assigned object handle.
pub type ObjectId = u32;

/// Device-assigned storage id. The root node of a storage uses it as its
/// object id.
pub type StorageId = u32;

/// Node type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    /// Regular file
    File = 0,
    /// Folder (MTP association)
    Folder = 1,
    /// Root of a storage
    Storage = 2,
}

impl NodeType {
    /// Check if this node type can have children.
    pub fn is_container(&self) -> bool {
        matches!(self, NodeType::Folder | NodeType::Storage)
    }
}

/// A folder or file on the device, as seen by the cache.
///
/// Values handed out by the library are snapshots: they stay valid to read,
/// but the cache re-validates them before acting on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    /// Display name
    pub name: String,
    /// Object handle (unique within a session)
    pub object_id: ObjectId,
    /// Containing folder, or the storage id for top-level objects.
    /// `None` only for storage roots.
    pub parent_id: Option<ObjectId>,
    /// Owning storage
    pub storage_id: StorageId,
    /// Node type
    pub node_type: NodeType,
    /// File size in bytes (0 for folders)
    pub size: u64,
    /// Full path, computed when the node enters the tree
    pub(crate) path: String,
    /// Ancestor handles, storage root first
    pub(crate) ancestors: Vec<ObjectId>,
}

impl ObjectNode {
    /// Root node of a storage.
    pub(crate) fn storage_root(storage_id: StorageId, description: &str) -> Self {
        ObjectNode {
            name: description.to_string(),
            object_id: storage_id,
            parent_id: None,
            storage_id,
            node_type: NodeType::Storage,
            size: 0,
            path: format!("/{}", description),
            ancestors: Vec::new(),
        }
    }

    /// Child of `parent`, with path and ancestry derived from it.
    pub(crate) fn child_of(
        parent: &ObjectNode,
        object_id: ObjectId,
        name: &str,
        node_type: NodeType,
        size: u64,
    ) -> Self {
        let mut ancestors = Vec::with_capacity(parent.ancestors.len() + 1);
        ancestors.extend_from_slice(&parent.ancestors);
        ancestors.push(parent.object_id);
        ObjectNode {
            name: name.to_string(),
            object_id,
            parent_id: Some(parent.object_id),
            storage_id: parent.storage_id,
            node_type,
            size: if node_type == NodeType::File { size } else { 0 },
            path: format!("{}/{}", parent.path.trim_end_matches('/'), name),
            ancestors,
        }
    }

    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    /// Check if this node can hold children (folder or storage root).
    pub fn is_folder(&self) -> bool {
        self.node_type.is_container()
    }

    pub fn is_storage_root(&self) -> bool {
        self.node_type == NodeType::Storage
    }

    /// Root-to-node name join, e.g. `/Internal storage/Music/a.mp3`.
    pub fn full_path(&self) -> &str {
        &self.path
    }

    /// Number of ancestors between this node and its storage root.
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Check if this node is a (strict) ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &ObjectNode) -> bool {
        self.storage_id == other.storage_id && other.ancestors.contains(&self.object_id)
    }
}

/// Free and total space of one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSpace {
    pub storage_id: StorageId,
    /// Free space in bytes
    pub free: u64,
    /// Capacity in bytes
    pub total: u64,
}

impl StorageSpace {
    /// Get used space in bytes.
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.free)
    }

    /// Get usage percentage.
    pub fn usage_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.used() as f64 / self.total as f64) * 100.0
        }
    }
}

/// Snapshot of a storage and its root node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub storage_id: StorageId,
    /// Human-readable description, e.g. "Internal storage"
    pub description: String,
    pub free_space: u64,
    pub capacity: u64,
    pub root: ObjectNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_properties() {
        assert!(!NodeType::File.is_container());
        assert!(NodeType::Folder.is_container());
        assert!(NodeType::Storage.is_container());
    }

    #[test]
    fn test_node_helper_methods() {
        let root = ObjectNode::storage_root(0x10001, "Internal storage");
        assert!(root.is_folder());
        assert!(root.is_storage_root());
        assert_eq!(root.parent_id, None);
        assert_eq!(root.full_path(), "/Internal storage");

        let music = ObjectNode::child_of(&root, 5, "Music", NodeType::Folder, 123);
        assert!(music.is_folder());
        assert!(!music.is_file());
        assert_eq!(music.size, 0, "folders never carry a size");
        assert_eq!(music.parent_id, Some(0x10001));
        assert_eq!(music.storage_id, 0x10001);
        assert_eq!(music.full_path(), "/Internal storage/Music");

        let song = ObjectNode::child_of(&music, 9, "a.mp3", NodeType::File, 4096);
        assert!(song.is_file());
        assert_eq!(song.size, 4096);
        assert_eq!(song.depth(), 2);
        assert_eq!(song.full_path(), "/Internal storage/Music/a.mp3");
    }

    #[test]
    fn test_is_ancestor_of() {
        let root = ObjectNode::storage_root(1, "Card");
        let a = ObjectNode::child_of(&root, 2, "a", NodeType::Folder, 0);
        let b = ObjectNode::child_of(&a, 3, "b", NodeType::Folder, 0);
        let c = ObjectNode::child_of(&root, 4, "c", NodeType::File, 1);

        assert!(root.is_ancestor_of(&b));
        assert!(a.is_ancestor_of(&b));
        assert!(!b.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&c));
    }

    #[test]
    fn test_storage_space_calculations() {
        let space = StorageSpace {
            storage_id: 1,
            free: 750,
            total: 1000,
        };

        assert_eq!(space.used(), 250);
        assert_eq!(space.usage_percent(), 25.0);

        let empty = StorageSpace {
            storage_id: 1,
            free: 0,
            total: 0,
        };
        assert_eq!(empty.usage_percent(), 0.0);
    }
}
