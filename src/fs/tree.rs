//! Arena-backed storage tree.
//!
//! Nodes live in a slot arena owned by the tree; each folder slot keeps its
//! children in a map ordered by case-folded name, and a side index maps
//! device handles to slots. Both are rebuilt from scratch with every tree, so
//! nothing in one generation points into another. Slots vacated by a removal
//! go on a free list and are reused by later insertions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::fs::node::{NodeType, ObjectId, ObjectNode, Storage, StorageId};
use crate::transport::{ObjectInfo, StorageInfo};

/// Parent handles devices use for objects at the top of a storage.
const TOP_LEVEL_PARENTS: [ObjectId; 2] = [0, 0xFFFF_FFFF];

/// Case-insensitive collation key.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ChildKey {
    folded: String,
    object_id: ObjectId,
}

struct Slot {
    node: ObjectNode,
    children: BTreeMap<ChildKey, usize>,
}

struct StorageEntry {
    info: StorageInfo,
    root: usize,
}

/// Outcome of adding one storage's listing to a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BuildStats {
    pub objects: usize,
    pub skipped: usize,
}

pub(crate) struct FsTree {
    generation: u64,
    storages: Vec<StorageEntry>,
    slots: Vec<Slot>,
    /// Vacated slots, reused before the arena grows.
    free: Vec<usize>,
    index: HashMap<ObjectId, usize>,
}

impl FsTree {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            storages: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of nodes, storage roots included.
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Add a storage and attach its listing.
    ///
    /// Entries are attached breadth-first from the storage root, so anything
    /// not reachable through folders (orphans, children of files, cycles) is
    /// never attached. Entries whose id is already known or retired, and
    /// folders whose name collides case-insensitively with an earlier sibling
    /// folder, are skipped together with their subtree.
    pub(crate) fn add_storage(
        &mut self,
        info: StorageInfo,
        objects: Vec<ObjectInfo>,
        retired: &HashSet<ObjectId>,
    ) -> BuildStats {
        let storage_id = info.storage_id;
        let mut stats = BuildStats::default();
        if self.index.contains_key(&storage_id) {
            tracing::warn!(storage_id, "duplicate storage id in listing, skipping storage");
            stats.skipped = objects.len();
            return stats;
        }

        let root = self.push(ObjectNode::storage_root(storage_id, &info.description));
        self.storages.push(StorageEntry { info, root });

        let mut by_parent: HashMap<ObjectId, Vec<ObjectInfo>> = HashMap::new();
        for object in objects {
            let parent = match object.parent_id {
                Some(p) if !TOP_LEVEL_PARENTS.contains(&p) => p,
                _ => storage_id,
            };
            by_parent.entry(parent).or_default().push(object);
        }

        let mut queue = VecDeque::from([root]);
        while let Some(parent_slot) = queue.pop_front() {
            let parent_id = self.node_at(parent_slot).object_id;
            let Some(mut children) = by_parent.remove(&parent_id) else {
                continue;
            };
            // Lowest handle wins when the device reports duplicate folders.
            children.sort_by_key(|o| o.object_id);
            for child in children {
                if retired.contains(&child.object_id) || self.index.contains_key(&child.object_id) {
                    tracing::warn!(
                        object_id = child.object_id,
                        name = %child.name,
                        "object id already used in this session, skipping"
                    );
                    stats.skipped += 1;
                    continue;
                }
                if child.is_folder && self.folder_named_at(parent_slot, &child.name).is_some() {
                    tracing::warn!(
                        object_id = child.object_id,
                        name = %child.name,
                        parent_id,
                        "duplicate folder name, skipping"
                    );
                    stats.skipped += 1;
                    continue;
                }
                let slot = self.attach(parent_slot, child.object_id, &child.name, child.node_type(), child.size);
                stats.objects += 1;
                if child.is_folder {
                    queue.push_back(slot);
                }
            }
        }

        let unreachable: usize = by_parent.values().map(Vec::len).sum();
        if unreachable > 0 {
            tracing::warn!(storage_id, unreachable, "listing entries without a reachable parent folder");
            stats.skipped += unreachable;
        }
        stats
    }

    fn push(&mut self, node: ObjectNode) -> usize {
        let fresh = Slot {
            node,
            children: BTreeMap::new(),
        };
        let object_id = fresh.node.object_id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = fresh;
                slot
            }
            None => {
                self.slots.push(fresh);
                self.slots.len() - 1
            }
        };
        self.index.insert(object_id, slot);
        slot
    }

    /// Slots allocated in the arena, vacated ones included.
    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn attach(
        &mut self,
        parent_slot: usize,
        object_id: ObjectId,
        name: &str,
        node_type: NodeType,
        size: u64,
    ) -> usize {
        let node = ObjectNode::child_of(self.node_at(parent_slot), object_id, name, node_type, size);
        let slot = self.push(node);
        self.slots[parent_slot].children.insert(
            ChildKey {
                folded: fold_name(name),
                object_id,
            },
            slot,
        );
        slot
    }

    fn node_at(&self, slot: usize) -> &ObjectNode {
        &self.slots[slot].node
    }

    fn slot(&self, object_id: ObjectId) -> Option<&Slot> {
        self.index.get(&object_id).map(|&slot| &self.slots[slot])
    }

    pub(crate) fn get(&self, object_id: ObjectId) -> Option<&ObjectNode> {
        self.slot(object_id).map(|s| &s.node)
    }

    /// Children of a folder in case-insensitive name order.
    pub(crate) fn children(&self, object_id: ObjectId) -> Option<impl Iterator<Item = &ObjectNode>> {
        let slot = self.slot(object_id)?;
        Some(slot.children.values().map(|&child| self.node_at(child)))
    }

    fn named_at(&self, parent_slot: usize, name: &str) -> impl Iterator<Item = &ObjectNode> {
        let folded = fold_name(name);
        let lo = ChildKey {
            folded: folded.clone(),
            object_id: ObjectId::MIN,
        };
        let hi = ChildKey {
            folded,
            object_id: ObjectId::MAX,
        };
        self.slots[parent_slot]
            .children
            .range(lo..=hi)
            .map(|(_, &child)| self.node_at(child))
    }

    fn folder_named_at(&self, parent_slot: usize, name: &str) -> Option<&ObjectNode> {
        self.named_at(parent_slot, name).find(|n| n.is_folder())
    }

    /// Child folder of `parent` whose name matches case-insensitively.
    pub(crate) fn folder_named(&self, parent: ObjectId, name: &str) -> Option<&ObjectNode> {
        let slot = *self.index.get(&parent)?;
        self.folder_named_at(slot, name)
    }

    /// First child file of `parent` whose name matches case-insensitively.
    pub(crate) fn file_named(&self, parent: ObjectId, name: &str) -> Option<&ObjectNode> {
        let slot = *self.index.get(&parent)?;
        self.named_at(slot, name).find(|n| n.is_file())
    }

    /// Attach a new child under `parent`. Returns `None` if the parent is
    /// missing or not a folder, or the id is already present.
    pub(crate) fn insert_child(
        &mut self,
        parent: ObjectId,
        object_id: ObjectId,
        name: &str,
        node_type: NodeType,
        size: u64,
    ) -> Option<&ObjectNode> {
        let parent_slot = *self.index.get(&parent)?;
        if !self.node_at(parent_slot).is_folder() || self.index.contains_key(&object_id) {
            return None;
        }
        let slot = self.attach(parent_slot, object_id, name, node_type, size);
        Some(self.node_at(slot))
    }

    /// Handles of `object_id` and all its descendants, children before parents.
    pub(crate) fn post_order(&self, object_id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![(object_id, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            let Some(slot) = self.slot(id) else { continue };
            stack.push((id, true));
            for &child in slot.children.values().rev() {
                stack.push((self.node_at(child).object_id, false));
            }
        }
        out
    }

    /// Detach `object_id` and its whole subtree. Returns the removed handles.
    pub(crate) fn remove(&mut self, object_id: ObjectId) -> Vec<ObjectId> {
        let Some(node) = self.get(object_id) else {
            return Vec::new();
        };
        if node.is_storage_root() {
            return Vec::new();
        }
        let key = ChildKey {
            folded: fold_name(&node.name),
            object_id,
        };
        let parent = node.parent_id;

        let removed = self.post_order(object_id);
        for id in &removed {
            if let Some(slot) = self.index.remove(id) {
                self.slots[slot].children.clear();
                self.free.push(slot);
            }
        }
        if let Some(parent_slot) = parent.and_then(|p| self.index.get(&p).copied()) {
            self.slots[parent_slot].children.remove(&key);
        }
        removed
    }

    /// Snapshots of every storage, in device order.
    pub(crate) fn storages(&self) -> Vec<Storage> {
        self.storages
            .iter()
            .map(|entry| Storage {
                storage_id: entry.info.storage_id,
                description: entry.info.description.clone(),
                free_space: entry.info.free_space,
                capacity: entry.info.capacity,
                root: self.node_at(entry.root).clone(),
            })
            .collect()
    }

    pub(crate) fn set_space(&mut self, storage_id: StorageId, free_space: u64, capacity: u64) {
        if let Some(entry) = self
            .storages
            .iter_mut()
            .find(|e| e.info.storage_id == storage_id)
        {
            entry.info.free_space = free_space;
            entry.info.capacity = capacity;
        }
    }

    /// Resolve `components` below `start`, case-insensitively, preferring
    /// folders over files at every step.
    pub(crate) fn descend<'a>(
        &self,
        start: ObjectId,
        components: impl IntoIterator<Item = &'a str>,
    ) -> Option<&ObjectNode> {
        let mut current = self.get(start)?;
        for component in components {
            let slot = *self.index.get(&current.object_id)?;
            current = self
                .folder_named_at(slot, component)
                .or_else(|| self.named_at(slot, component).next())?;
        }
        Some(current)
    }

    /// Storage root whose description matches case-insensitively.
    pub(crate) fn storage_named(&self, description: &str) -> Option<&ObjectNode> {
        let folded = fold_name(description);
        self.storages
            .iter()
            .find(|e| fold_name(&e.info.description) == folded)
            .map(|e| self.node_at(e.root))
    }

    /// Indented text rendering of every storage.
    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        for entry in &self.storages {
            let _ = writeln!(
                out,
                "{} [{:#x}] free={} capacity={}",
                entry.info.description,
                entry.info.storage_id,
                entry.info.free_space,
                entry.info.capacity
            );
            let mut stack: Vec<(usize, usize)> = self.child_slots(entry.root).rev().map(|s| (s, 1)).collect();
            while let Some((slot, depth)) = stack.pop() {
                let node = self.node_at(slot);
                let indent = "  ".repeat(depth);
                if node.is_folder() {
                    let _ = writeln!(out, "{}{}/ [{:#x}]", indent, node.name, node.object_id);
                    stack.extend(self.child_slots(slot).rev().map(|s| (s, depth + 1)));
                } else {
                    let _ = writeln!(
                        out,
                        "{}{} [{:#x}] {} bytes",
                        indent, node.name, node.object_id, node.size
                    );
                }
            }
        }
        out
    }

    fn child_slots(&self, slot: usize) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.slots[slot].children.values().copied()
    }

    /// Check every structural invariant, returning the first violation.
    #[cfg(test)]
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        for (&id, &slot) in &self.index {
            let node = self.node_at(slot);
            if node.object_id != id {
                return Err(format!("index maps {id:#x} to {:#x}", node.object_id));
            }
            let Some(parent_id) = node.parent_id else {
                if !node.is_storage_root() {
                    return Err(format!("{id:#x} has no parent"));
                }
                continue;
            };
            let Some(parent) = self.get(parent_id) else {
                return Err(format!("{id:#x} has missing parent {parent_id:#x}"));
            };
            if !parent.is_folder() {
                return Err(format!("{id:#x} lives under file {parent_id:#x}"));
            }
            if parent.storage_id != node.storage_id {
                return Err(format!("{id:#x} changes storage below {parent_id:#x}"));
            }
            let Some(parent_slot) = self.slot(parent_id) else {
                return Err(format!("{parent_id:#x} has no slot"));
            };
            let mut folders = HashSet::new();
            for &child in parent_slot.children.values() {
                let child = self.node_at(child);
                if child.is_folder() && !folders.insert(fold_name(&child.name)) {
                    return Err(format!("duplicate folder {:?} under {parent_id:#x}", child.name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: StorageId = 0x0001_0001;

    fn storage() -> StorageInfo {
        StorageInfo {
            storage_id: SID,
            description: "Internal storage".to_string(),
            capacity: 1000,
            free_space: 600,
        }
    }

    fn obj(object_id: ObjectId, parent_id: Option<ObjectId>, name: &str, is_folder: bool) -> ObjectInfo {
        ObjectInfo {
            object_id,
            parent_id,
            name: name.to_string(),
            is_folder,
            size: if is_folder { 0 } else { 10 },
        }
    }

    fn build(objects: Vec<ObjectInfo>) -> (FsTree, BuildStats) {
        let mut tree = FsTree::new(1);
        let stats = tree.add_storage(storage(), objects, &HashSet::new());
        (tree, stats)
    }

    #[test]
    fn test_build_from_unordered_listing() {
        let (tree, stats) = build(vec![
            obj(5, Some(3), "song.mp3", false),
            obj(3, Some(2), "Albums", true),
            obj(2, None, "Music", true),
            obj(4, Some(0xFFFF_FFFF), "notes.txt", false),
        ]);
        assert_eq!(stats, BuildStats { objects: 4, skipped: 0 });
        assert_eq!(tree.len(), 5);
        tree.validate().unwrap();

        let song = tree.get(5).unwrap();
        assert_eq!(song.full_path(), "/Internal storage/Music/Albums/song.mp3");
        assert_eq!(song.storage_id, SID);
        assert_eq!(tree.get(4).unwrap().parent_id, Some(SID));
    }

    #[test]
    fn test_children_ordered_case_insensitively() {
        let (tree, _) = build(vec![
            obj(2, None, "beta", true),
            obj(3, None, "Alpha", false),
            obj(4, None, "GAMMA", true),
        ]);
        let names: Vec<&str> = tree.children(SID).unwrap().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "GAMMA"]);
    }

    #[test]
    fn test_unreachable_entries_are_skipped() {
        let (tree, stats) = build(vec![
            obj(2, None, "file.txt", false),
            obj(3, Some(2), "under-file", true),
            obj(4, Some(99), "orphan", false),
            obj(5, Some(6), "cycle-a", true),
            obj(6, Some(5), "cycle-b", true),
        ]);
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.skipped, 4);
        assert!(tree.get(3).is_none());
        tree.validate().unwrap();
    }

    #[test]
    fn test_duplicate_folders_keep_lowest_handle() {
        let (tree, stats) = build(vec![
            obj(8, None, "DCIM", true),
            obj(7, None, "dcim", true),
            obj(9, Some(8), "inside-dup", false),
            obj(10, None, "dcim", false),
        ]);
        // The file named like the folder is fine, the second folder is not.
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(tree.folder_named(SID, "DcIm").unwrap().object_id, 7);
        assert_eq!(tree.file_named(SID, "DCIM").unwrap().object_id, 10);
        tree.validate().unwrap();
    }

    #[test]
    fn test_retired_ids_are_not_attached() {
        let mut tree = FsTree::new(2);
        let retired = HashSet::from([3]);
        let stats = tree.add_storage(
            storage(),
            vec![obj(2, None, "keep", true), obj(3, None, "gone", true)],
            &retired,
        );
        assert_eq!(stats.skipped, 1);
        assert!(tree.get(3).is_none());
    }

    #[test]
    fn test_insert_child_rules() {
        let (mut tree, _) = build(vec![obj(2, None, "f.txt", false)]);

        let created = tree.insert_child(SID, 10, "New", NodeType::Folder, 0).unwrap();
        assert_eq!(created.parent_id, Some(SID));

        assert!(tree.insert_child(2, 11, "x", NodeType::Folder, 0).is_none(), "under a file");
        assert!(tree.insert_child(SID, 10, "again", NodeType::Folder, 0).is_none(), "id reuse");
        assert!(tree.insert_child(404, 12, "x", NodeType::Folder, 0).is_none(), "missing parent");
        tree.validate().unwrap();
    }

    #[test]
    fn test_remove_subtree() {
        let (mut tree, _) = build(vec![
            obj(2, None, "a", true),
            obj(3, Some(2), "b", true),
            obj(4, Some(3), "c.txt", false),
            obj(5, None, "other", false),
        ]);

        assert_eq!(tree.post_order(2), vec![4, 3, 2]);
        let mut removed = tree.remove(2);
        removed.sort_unstable();
        assert_eq!(removed, vec![2, 3, 4]);
        assert_eq!(tree.len(), 2);
        let names: Vec<&str> = tree.children(SID).unwrap().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["other"]);
        tree.validate().unwrap();

        // Storage roots cannot be removed.
        assert!(tree.remove(SID).is_empty());
    }

    #[test]
    fn test_descend_prefers_folders() {
        let (tree, _) = build(vec![
            obj(2, None, "Books", false),
            obj(3, None, "books", true),
            obj(4, Some(3), "Dune.epub", false),
        ]);
        assert_eq!(tree.descend(SID, ["BOOKS"]).unwrap().object_id, 3);
        assert_eq!(tree.descend(SID, ["books", "dune.EPUB"]).unwrap().object_id, 4);
        assert!(tree.descend(SID, ["books", "missing"]).is_none());
        assert_eq!(tree.storage_named("internal STORAGE").unwrap().object_id, SID);
    }

    #[test]
    fn test_dump_lists_every_node() {
        let (tree, _) = build(vec![obj(2, None, "Music", true), obj(3, Some(2), "a.mp3", false)]);
        let dump = tree.dump();
        assert!(dump.starts_with("Internal storage [0x10001]"));
        assert!(dump.contains("  Music/ [0x2]"));
        assert!(dump.contains("    a.mp3 [0x3] 10 bytes"));
    }

    #[test]
    fn test_removed_slots_are_reused() {
        let (mut tree, _) = build(vec![obj(2, None, "Music", true)]);
        let base = tree.capacity();

        for round in 0..100u32 {
            let folder = 100 + round * 2;
            tree.insert_child(SID, folder, "tmp", NodeType::Folder, 0).unwrap();
            tree.insert_child(folder, folder + 1, "nested", NodeType::Folder, 0).unwrap();
            assert_eq!(tree.remove(folder), vec![folder + 1, folder]);
        }
        assert_eq!(tree.capacity(), base + 2);
        assert_eq!(tree.len(), 2);

        // A reused slot starts without children
        let reused = tree.insert_child(SID, 500, "Fresh", NodeType::Folder, 0).unwrap().clone();
        assert_eq!(reused.full_path(), "/Internal storage/Fresh");
        assert_eq!(tree.children(500).unwrap().count(), 0);
        tree.validate().unwrap();
    }
}
