//! Device transport capability.
//!
//! The cache never speaks a wire protocol itself. It drives a [`Transport`],
//! which enumerates devices, opens connections and performs object-level
//! operations. Results that own native memory carry a [`NativeResource`]
//! token that the caller must give back through
//! [`ReleaseResource::release`].

pub mod memory;
pub mod response;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::{NodeType, ObjectId, StorageId, StorageSpace};
use crate::resources::{NativeResource, ReleaseResource};

pub use memory::{FailOp, MemoryTransport};
pub use response::ResponseCode;

/// An attachable device as reported by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
    pub serial: Option<String>,
    pub manufacturer: String,
    pub model: String,
}

impl DeviceInfo {
    /// Human-readable name, e.g. "Google Pixel 7".
    pub fn display_name(&self) -> String {
        format!("{} {}", self.manufacturer, self.model)
    }

    /// Check whether `other` is the same physical device.
    ///
    /// Serial numbers survive re-enumeration, bus addresses do not.
    pub fn same_device(&self, other: &DeviceInfo) -> bool {
        if self.vendor_id != other.vendor_id || self.product_id != other.product_id {
            return false;
        }
        match (&self.serial, &other.serial) {
            (Some(a), Some(b)) => a == b,
            _ => self.bus == other.bus && self.address == other.address,
        }
    }
}

/// Handle to an open device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Result of a device scan.
#[derive(Debug)]
pub struct DeviceList {
    pub devices: Vec<DeviceInfo>,
    /// Native buffer the scan was read into
    pub resource: NativeResource,
}

/// Result of a successful connect.
#[derive(Debug)]
pub struct Connected {
    pub handle: DeviceHandle,
    /// Native connection; releasing it disconnects
    pub resource: NativeResource,
}

/// Storage description as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub storage_id: StorageId,
    pub description: String,
    pub capacity: u64,
    pub free_space: u64,
}

/// One entry of a storage's object listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object_id: ObjectId,
    /// `None` (or the storage id) for objects at the top of the storage
    pub parent_id: Option<ObjectId>,
    pub name: String,
    pub is_folder: bool,
    pub size: u64,
}

impl ObjectInfo {
    pub fn node_type(&self) -> NodeType {
        if self.is_folder {
            NodeType::Folder
        } else {
            NodeType::File
        }
    }
}

/// Full object listing of one storage.
#[derive(Debug)]
pub struct ObjectListing {
    pub objects: Vec<ObjectInfo>,
    /// Native buffer backing the listing
    pub resource: NativeResource,
}

/// Operations the cache needs from a device transport.
///
/// All operations may suspend; the session bounds them with a timeout and
/// drops them when closed, so implementations should not leave native state
/// half-built across an await point.
pub trait Transport: ReleaseResource {
    /// Enumerate attachable devices.
    fn list_devices(&self) -> impl Future<Output = Result<DeviceList>> + Send;

    /// Open a connection to `device`.
    fn connect(&self, device: &DeviceInfo) -> impl Future<Output = Result<Connected>> + Send;

    /// Storages exposed by the device, primary storage first.
    fn storages(&self, handle: DeviceHandle)
    -> impl Future<Output = Result<Vec<StorageInfo>>> + Send;

    /// Every object on `storage_id`, in no particular order.
    fn list_objects(
        &self,
        handle: DeviceHandle,
        storage_id: StorageId,
    ) -> impl Future<Output = Result<ObjectListing>> + Send;

    /// Create a folder and return its new object id. `parent` is `None` for
    /// the top of the storage.
    fn create_folder(
        &self,
        handle: DeviceHandle,
        storage_id: StorageId,
        parent: Option<ObjectId>,
        name: &str,
    ) -> impl Future<Output = Result<ObjectId>> + Send;

    /// Delete a single object.
    fn delete_object(
        &self,
        handle: DeviceHandle,
        object_id: ObjectId,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Free and total space of a storage.
    fn free_space(
        &self,
        handle: DeviceHandle,
        storage_id: StorageId,
    ) -> impl Future<Output = Result<StorageSpace>> + Send;
}
