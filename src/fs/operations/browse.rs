//! Filesystem browsing helpers.

use super::utils::split_path;
use crate::error::Result;
use crate::fs::{ObjectId, ObjectNode, Storage};
use crate::session::Session;
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// List the children of a storage root or folder.
    ///
    /// Children come back ordered by case-insensitive name. Files have no
    /// entries and are rejected with `InvalidTarget`.
    pub(crate) fn entries_of(&self, folder: &ObjectNode) -> Result<Vec<ObjectNode>> {
        self.ensure_open()?;
        self.cache.entries_of(folder)
    }

    pub(crate) fn storages(&self) -> Result<Vec<Storage>> {
        self.ensure_open()?;
        Ok(self.cache.storages())
    }

    /// Get a node by its object id.
    pub(crate) fn node(&self, object_id: ObjectId) -> Result<Option<ObjectNode>> {
        self.ensure_open()?;
        Ok(self.cache.node(object_id))
    }

    /// Get information about a file or folder.
    ///
    /// # Arguments
    /// * `path` - `/<storage description>/<folder>/.../<name>`, matched
    ///   case-insensitively
    pub(crate) fn stat(&self, path: &str) -> Result<Option<ObjectNode>> {
        self.ensure_open()?;
        let Some((storage, components)) = split_path(path) else {
            return Ok(None);
        };
        Ok(self
            .cache
            .lookup(&storage, components.iter().map(String::as_str)))
    }

    pub(crate) fn dump(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.cache.dump())
    }
}
