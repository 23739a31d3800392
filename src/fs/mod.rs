//! Device filesystem cache.

mod cache;
pub(crate) mod node;
pub(crate) mod operations;
pub(crate) mod tree;

pub use cache::FilesystemCache;
pub use node::{NodeType, ObjectId, ObjectNode, Storage, StorageId, StorageSpace};
pub use operations::RebuildReport;
