//! # mtplib
//!
//! Filesystem cache and object management for MTP style devices.
//!
//! ## Features
//!
//! - **Device lifecycle**: scan for attachable devices, open one with a
//!   free-space check, close it from any task.
//! - **Filesystem cache**: an in-memory mirror of the device's storages,
//!   folders and files, rebuilt atomically from device listings.
//!   - Case-insensitive, idempotent folder creation.
//!   - Recursive deletion that only forgets what the device confirmed.
//!   - Path lookup (`stat`) and a text dump of the tree.
//! - **Bounded native resources**: every device handle and listing buffer is
//!   owned by a scope and released when that scope ends, so repeated scans
//!   and rebuilds do not accumulate memory.
//! - **Pluggable transport**: the [`Transport`] trait abstracts the device;
//!   [`MemoryTransport`] simulates one in-process.
//!
//! Node values returned by the session are snapshots. After a rebuild the
//! session re-validates them: a node that vanished yields
//! [`DeviceError::NotFound`], one that moved or changed kind yields
//! [`DeviceError::StaleReference`].
//!
//! ## Example
//!
//! ```no_run
//! use mtplib::{DeviceSession, MemoryTransport, SessionConfig};
//!
//! # async fn example() -> mtplib::Result<()> {
//! let session = DeviceSession::spawn(MemoryTransport::new(), SessionConfig::default());
//!
//! let devices = session.scan().await?;
//! let device = devices.first().ok_or(mtplib::DeviceError::NoDeviceFound)?;
//! let info = session.open(device, "sync").await?;
//!
//! // Create a folder at the top of the primary storage, twice
//! let root = &info.storages[0].root;
//! let folder = session.create_folder(root, "Podcasts").await?;
//! let again = session.create_folder(root, "PODCASTS").await?;
//! assert_eq!(folder.object_id, again.object_id);
//!
//! session.delete_file_or_folder(&folder).await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod resources;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::SessionConfig;
pub use error::{DeviceError, Result};
pub use fs::{
    FilesystemCache, NodeType, ObjectId, ObjectNode, RebuildReport, Storage, StorageId,
    StorageSpace,
};
pub use resources::{NativeResource, ReleaseResource, ResourceKind, ResourceStats};
pub use session::{DeviceSession, SessionInfo, SessionState};
pub use transport::{DeviceInfo, MemoryTransport, ResponseCode, Transport};
