//! Folder creation and deletion.

use crate::error::{DeviceError, Result};
use crate::fs::cache::FolderPlan;
use crate::fs::ObjectNode;
use crate::session::Session;
use crate::transport::{ResponseCode, Transport};

impl<T: Transport> Session<T> {
    /// Create a folder named `name` under `parent`.
    ///
    /// If `parent` already holds a folder whose name matches
    /// case-insensitively, that folder is returned and the device is not
    /// contacted.
    pub(crate) async fn create_folder(&mut self, parent: &ObjectNode, name: &str) -> Result<ObjectNode> {
        let handle = self.handle()?;
        match self.cache.plan_folder(parent, name)? {
            FolderPlan::Existing(node) => {
                tracing::debug!(object_id = node.object_id, path = node.full_path(), "folder already exists");
                Ok(node)
            }
            FolderPlan::Create {
                storage_id,
                parent,
                parent_id,
            } => {
                let object_id = self
                    .io(
                        "create_folder",
                        self.transport.create_folder(handle, storage_id, parent, name),
                    )
                    .await?;
                let node = self.cache.insert_folder(parent_id, object_id, name)?;
                tracing::debug!(object_id, path = node.full_path(), "created folder");
                Ok(node)
            }
        }
    }

    /// Remove a file or folder, descendants first.
    ///
    /// Each object leaves the cache only once the device confirmed its
    /// deletion, so an interrupted delete leaves the cache describing exactly
    /// what is still on the device.
    pub(crate) async fn delete_file_or_folder(&mut self, node: &ObjectNode) -> Result<()> {
        let handle = self.handle()?;
        let order = self.cache.plan_delete(node)?;
        let total = order.len();

        for (done, object_id) in order.into_iter().enumerate() {
            match self
                .io("delete_object", self.transport.delete_object(handle, object_id))
                .await
            {
                Ok(()) => {}
                Err(DeviceError::Response {
                    code: ResponseCode::InvalidObjectHandle,
                    ..
                }) => {
                    tracing::debug!(object_id, "object already gone from device");
                }
                Err(err) => {
                    tracing::warn!(object_id, done, total, %err, "delete interrupted");
                    return Err(err);
                }
            }
            self.cache.remove_confirmed(object_id);
        }

        tracing::debug!(object_id = node.object_id, removed = total, "deleted");
        Ok(())
    }
}
