//! Filesystem tree rebuild.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::tree::FsTree;
use crate::resources::ResourceScope;
use crate::session::Session;
use crate::transport::{DeviceHandle, ObjectListing, Transport};

/// Outcome of a rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    /// Generation of the tree now in place
    pub generation: u64,
    pub storages: usize,
    /// Objects attached to the tree, storage roots excluded
    pub objects: usize,
    /// Listing entries left out because they would break the tree
    pub skipped: usize,
    /// Native resources of superseded trees released by the swap
    pub released: usize,
}

impl<T: Transport> Session<T> {
    /// Re-read every storage and replace the tree.
    ///
    /// The new tree is built off to the side from fresh listings and only
    /// swapped in once complete. The listings backing the previous tree are
    /// released right after the swap; if anything fails, the previous tree
    /// stays current and the listings gathered so far are released instead.
    pub(crate) async fn rebuild(&mut self) -> Result<RebuildReport> {
        let handle = self.handle()?;
        self.next_generation += 1;
        let generation = self.next_generation;

        match self.build_tree(handle, generation).await {
            Ok((tree, mut report)) => {
                self.cache.replace(tree);
                report.released = self.resources.release_trees_before(generation);
                tracing::debug!(
                    generation,
                    objects = report.objects,
                    skipped = report.skipped,
                    released = report.released,
                    "tree rebuilt"
                );
                Ok(report)
            }
            Err(err) => {
                let released = self.resources.release_scope(ResourceScope::Tree(generation));
                tracing::warn!(generation, released, %err, "rebuild failed, keeping previous tree");
                Err(err)
            }
        }
    }

    async fn build_tree(
        &mut self,
        handle: DeviceHandle,
        generation: u64,
    ) -> Result<(FsTree, RebuildReport)> {
        let storages = self.io("storages", self.transport.storages(handle)).await?;
        let mut tree = FsTree::new(generation);
        let mut report = RebuildReport {
            generation,
            storages: storages.len(),
            ..RebuildReport::default()
        };

        for info in storages {
            let ObjectListing { objects, resource } = self
                .io("list_objects", self.transport.list_objects(handle, info.storage_id))
                .await?;
            self.resources.register(ResourceScope::Tree(generation), resource);

            let stats = tree.add_storage(info, objects, self.cache.retired());
            report.objects += stats.objects;
            report.skipped += stats.skipped;
        }

        Ok((tree, report))
    }
}
