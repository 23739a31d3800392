//! Storage space queries.

use crate::error::Result;
use crate::fs::StorageSpace;
use crate::session::Session;
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Get free and total space of every storage, refreshing the cached figures.
    pub(crate) async fn free_space(&mut self) -> Result<Vec<StorageSpace>> {
        let handle = self.handle()?;
        let storages = self.cache.storages();
        let mut spaces = Vec::with_capacity(storages.len());
        for storage in storages {
            let space = self
                .io("free_space", self.transport.free_space(handle, storage.storage_id))
                .await?;
            self.cache.set_space(space.storage_id, space.free, space.total);
            spaces.push(space);
        }
        Ok(spaces)
    }
}
