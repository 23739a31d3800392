//! In-process simulated devices.
//!
//! [`MemoryTransport`] behaves like a bus with MTP devices attached to it. It
//! hands out native resource tokens exactly like a real backend would and
//! keeps track of which ones are still outstanding, which makes resource leaks
//! observable without a device.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{DeviceError, Result};
use crate::fs::{ObjectId, StorageId, StorageSpace};
use crate::resources::{NativeResource, ReleaseResource, ResourceId, ResourceKind};
use crate::transport::{
    Connected, DeviceHandle, DeviceInfo, DeviceList, ObjectInfo, ObjectListing, ResponseCode,
    StorageInfo, Transport,
};

/// Native bytes accounted per listed object, on top of its name.
const OBJECT_RECORD_BYTES: u64 = 64;
/// Native bytes accounted per scanned device.
const DEVICE_RECORD_BYTES: u64 = 128;
/// Native bytes accounted per open connection.
const CONNECTION_BYTES: u64 = 4096;

/// Transport operations, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    ListDevices,
    Connect,
    Storages,
    ListObjects,
    CreateFolder,
    DeleteObject,
    FreeSpace,
}

struct SimStorage {
    info: StorageInfo,
    objects: BTreeMap<ObjectId, ObjectInfo>,
}

struct SimDevice {
    info: DeviceInfo,
    attached: bool,
    storages: Vec<SimStorage>,
}

struct State {
    devices: Vec<SimDevice>,
    /// Open connections by handle; a handle shares its id with its resource.
    connections: HashMap<u64, usize>,
    outstanding: HashMap<ResourceId, (ResourceKind, u64)>,
    next_object_id: ObjectId,
    next_resource: ResourceId,
    /// Scripted outcomes per operation; `None` lets a call through.
    failures: HashMap<FailOp, VecDeque<Option<DeviceError>>>,
    calls: HashMap<FailOp, usize>,
    latency: Duration,
}

impl State {
    fn begin(&mut self, op: FailOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn allocate(&mut self, kind: ResourceKind, bytes: u64) -> NativeResource {
        let id = self.next_resource;
        self.next_resource = self.next_resource.wrapping_add(1);
        self.outstanding.insert(id, (kind, bytes));
        NativeResource::new(id, kind, bytes)
    }

    fn allocate_object_id(&mut self) -> ObjectId {
        loop {
            let id = self.next_object_id;
            self.next_object_id += 1;
            let clashes_with_storage = self
                .devices
                .iter()
                .flat_map(|d| d.storages.iter())
                .any(|s| s.info.storage_id == id);
            if !clashes_with_storage {
                return id;
            }
        }
    }

    fn device(&mut self, handle: DeviceHandle) -> Result<&mut SimDevice> {
        let index = *self
            .connections
            .get(&handle.0)
            .ok_or_else(|| DeviceError::from_response(ResponseCode::SessionNotOpen))?;
        let device = &mut self.devices[index];
        if !device.attached {
            return Err(DeviceError::TransportError(format!(
                "{} was disconnected",
                device.info.display_name()
            )));
        }
        Ok(device)
    }

    fn storage_mut(&mut self, storage_id: StorageId) -> Option<&mut SimStorage> {
        self.devices
            .iter_mut()
            .flat_map(|d| d.storages.iter_mut())
            .find(|s| s.info.storage_id == storage_id)
    }
}

/// Simulated MTP bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                devices: Vec::new(),
                connections: HashMap::new(),
                outstanding: HashMap::new(),
                next_object_id: 1,
                next_resource: rand::random::<u32>() as u64,
                failures: HashMap::new(),
                calls: HashMap::new(),
                latency: Duration::ZERO,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Attach a device with the given storages (primary first). Re-attaching
    /// a known device keeps its objects.
    pub fn attach(&self, info: DeviceInfo, storages: Vec<StorageInfo>) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.info.same_device(&info)) {
            device.attached = true;
            return;
        }
        state.devices.push(SimDevice {
            info,
            attached: true,
            storages: storages
                .into_iter()
                .map(|info| SimStorage {
                    info,
                    objects: BTreeMap::new(),
                })
                .collect(),
        });
    }

    /// Unplug a device. Open connections to it start failing.
    pub fn detach(&self, info: &DeviceInfo) {
        let mut state = self.lock();
        for device in state.devices.iter_mut().filter(|d| d.info.same_device(info)) {
            device.attached = false;
        }
    }

    /// Place an object on the device, as if created outside the session.
    pub fn add_object(
        &self,
        storage_id: StorageId,
        parent: Option<ObjectId>,
        name: &str,
        is_folder: bool,
        size: u64,
    ) -> Result<ObjectId> {
        let mut state = self.lock();
        let object_id = state.allocate_object_id();
        let storage = state
            .storage_mut(storage_id)
            .ok_or_else(|| DeviceError::from_response(ResponseCode::InvalidStorageId))?;
        if let Some(parent_id) = parent.filter(|p| *p != storage_id) {
            match storage.objects.get(&parent_id) {
                Some(p) if p.is_folder => {}
                _ => return Err(DeviceError::from_response(ResponseCode::InvalidParentObject)),
            }
        }
        storage.objects.insert(
            object_id,
            ObjectInfo {
                object_id,
                parent_id: parent,
                name: name.to_string(),
                is_folder,
                size: if is_folder { 0 } else { size },
            },
        );
        Ok(object_id)
    }

    pub fn add_folder(
        &self,
        storage_id: StorageId,
        parent: Option<ObjectId>,
        name: &str,
    ) -> Result<ObjectId> {
        self.add_object(storage_id, parent, name, true, 0)
    }

    pub fn add_file(
        &self,
        storage_id: StorageId,
        parent: Option<ObjectId>,
        name: &str,
        size: u64,
    ) -> Result<ObjectId> {
        self.add_object(storage_id, parent, name, false, size)
    }

    /// Delete an object (and its descendants) behind the session's back.
    pub fn remove_object(&self, object_id: ObjectId) -> bool {
        let mut state = self.lock();
        state
            .devices
            .iter_mut()
            .flat_map(|d| d.storages.iter_mut())
            .any(|s| remove_recursive(s, object_id))
    }

    /// Move an object to another folder of the same storage, behind the
    /// session's back. `None` moves it to the top of the storage.
    pub fn move_object(&self, object_id: ObjectId, new_parent: Option<ObjectId>) -> Result<()> {
        let mut state = self.lock();
        let storage = state
            .devices
            .iter_mut()
            .flat_map(|d| d.storages.iter_mut())
            .find(|s| s.objects.contains_key(&object_id))
            .ok_or_else(|| DeviceError::from_response(ResponseCode::InvalidObjectHandle))?;
        if let Some(parent_id) = new_parent.filter(|p| *p != storage.info.storage_id) {
            match storage.objects.get(&parent_id) {
                Some(p) if p.is_folder && parent_id != object_id => {}
                _ => return Err(DeviceError::from_response(ResponseCode::InvalidParentObject)),
            }
        }
        if let Some(object) = storage.objects.get_mut(&object_id) {
            object.parent_id = new_parent;
        }
        Ok(())
    }

    /// Whether the device still has `object_id`.
    pub fn contains(&self, object_id: ObjectId) -> bool {
        let state = self.lock();
        state
            .devices
            .iter()
            .flat_map(|d| d.storages.iter())
            .any(|s| s.objects.contains_key(&object_id))
    }

    /// Objects currently on a storage.
    pub fn object_count(&self, storage_id: StorageId) -> usize {
        let mut state = self.lock();
        state.storage_mut(storage_id).map_or(0, |s| s.objects.len())
    }

    pub fn set_free_space(&self, storage_id: StorageId, free_space: u64) {
        let mut state = self.lock();
        if let Some(storage) = state.storage_mut(storage_id) {
            storage.info.free_space = free_space;
        }
    }

    /// Delay applied to every device call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Make the next call to `op` fail with `err`. Calls queue up.
    pub fn fail_next(&self, op: FailOp, err: DeviceError) {
        self.lock().failures.entry(op).or_default().push_back(Some(err));
    }

    /// Queue a pass-through: the matching call to `op` succeeds.
    pub fn pass_next(&self, op: FailOp) {
        self.lock().failures.entry(op).or_default().push_back(None);
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: FailOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Native resources handed out and not yet released.
    pub fn outstanding_resources(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Native bytes handed out and not yet released.
    pub fn outstanding_bytes(&self) -> u64 {
        self.lock().outstanding.values().map(|(_, bytes)| bytes).sum()
    }

    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }
}

fn remove_recursive(storage: &mut SimStorage, object_id: ObjectId) -> bool {
    if storage.objects.remove(&object_id).is_none() {
        return false;
    }
    let children: Vec<ObjectId> = storage
        .objects
        .values()
        .filter(|o| o.parent_id == Some(object_id))
        .map(|o| o.object_id)
        .collect();
    for child in children {
        remove_recursive(storage, child);
    }
    true
}

impl ReleaseResource for MemoryTransport {
    fn release(&self, resource: NativeResource) -> Result<()> {
        let mut state = self.lock();
        if state.outstanding.remove(&resource.id).is_none() {
            return Err(DeviceError::TransportError(format!(
                "unknown native resource {}",
                resource.id
            )));
        }
        if resource.kind == ResourceKind::DeviceHandle {
            state.connections.remove(&resource.id);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    async fn list_devices(&self) -> Result<DeviceList> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::ListDevices)?;
        let devices: Vec<DeviceInfo> = state
            .devices
            .iter()
            .filter(|d| d.attached)
            .map(|d| d.info.clone())
            .collect();
        let bytes = DEVICE_RECORD_BYTES * (devices.len() as u64 + 1);
        let resource = state.allocate(ResourceKind::DeviceList, bytes);
        Ok(DeviceList { devices, resource })
    }

    async fn connect(&self, device: &DeviceInfo) -> Result<Connected> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::Connect)?;
        let index = state
            .devices
            .iter()
            .position(|d| d.attached && d.info.same_device(device))
            .ok_or(DeviceError::NoDeviceFound)?;
        let resource = state.allocate(ResourceKind::DeviceHandle, CONNECTION_BYTES);
        let handle = DeviceHandle(resource.id);
        state.connections.insert(handle.0, index);
        Ok(Connected { handle, resource })
    }

    async fn storages(&self, handle: DeviceHandle) -> Result<Vec<StorageInfo>> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::Storages)?;
        let device = state.device(handle)?;
        Ok(device.storages.iter().map(|s| s.info.clone()).collect())
    }

    async fn list_objects(
        &self,
        handle: DeviceHandle,
        storage_id: StorageId,
    ) -> Result<ObjectListing> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::ListObjects)?;
        let device = state.device(handle)?;
        let storage = device
            .storages
            .iter()
            .find(|s| s.info.storage_id == storage_id)
            .ok_or_else(|| DeviceError::from_response(ResponseCode::InvalidStorageId))?;
        let objects: Vec<ObjectInfo> = storage.objects.values().cloned().collect();
        let bytes = objects
            .iter()
            .map(|o| OBJECT_RECORD_BYTES + o.name.len() as u64)
            .sum();
        let resource = state.allocate(ResourceKind::ObjectListing, bytes);
        Ok(ObjectListing { objects, resource })
    }

    async fn create_folder(
        &self,
        handle: DeviceHandle,
        storage_id: StorageId,
        parent: Option<ObjectId>,
        name: &str,
    ) -> Result<ObjectId> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::CreateFolder)?;
        let object_id = state.allocate_object_id();
        let device = state.device(handle)?;
        let storage = device
            .storages
            .iter_mut()
            .find(|s| s.info.storage_id == storage_id)
            .ok_or_else(|| DeviceError::from_response(ResponseCode::InvalidStorageId))?;
        if let Some(parent_id) = parent.filter(|p| *p != storage_id) {
            match storage.objects.get(&parent_id) {
                Some(p) if p.is_folder => {}
                _ => return Err(DeviceError::from_response(ResponseCode::InvalidParentObject)),
            }
        }
        storage.objects.insert(
            object_id,
            ObjectInfo {
                object_id,
                parent_id: parent,
                name: name.to_string(),
                is_folder: true,
                size: 0,
            },
        );
        Ok(object_id)
    }

    async fn delete_object(&self, handle: DeviceHandle, object_id: ObjectId) -> Result<()> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::DeleteObject)?;
        let device = state.device(handle)?;
        if device
            .storages
            .iter_mut()
            .any(|s| remove_recursive(s, object_id))
        {
            Ok(())
        } else {
            Err(DeviceError::from_response(ResponseCode::InvalidObjectHandle))
        }
    }

    async fn free_space(&self, handle: DeviceHandle, storage_id: StorageId) -> Result<StorageSpace> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(FailOp::FreeSpace)?;
        let device = state.device(handle)?;
        let storage = device
            .storages
            .iter()
            .find(|s| s.info.storage_id == storage_id)
            .ok_or_else(|| DeviceError::from_response(ResponseCode::InvalidStorageId))?;
        Ok(StorageSpace {
            storage_id,
            free: storage.info.free_space,
            total: storage.info.capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STORAGE: StorageId = 0x0001_0001;

    fn phone() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x04e8,
            product_id: 0x6860,
            bus: 1,
            address: 7,
            serial: Some("R58M".to_string()),
            manufacturer: "Samsung".to_string(),
            model: "Galaxy".to_string(),
        }
    }

    fn bus_with_phone() -> MemoryTransport {
        let bus = MemoryTransport::new();
        bus.attach(
            phone(),
            vec![StorageInfo {
                storage_id: STORAGE,
                description: "Phone".to_string(),
                capacity: 1 << 30,
                free_space: 1 << 29,
            }],
        );
        bus
    }

    #[tokio::test]
    async fn test_object_ids_are_never_reused() {
        let bus = bus_with_phone();
        let a = bus.add_folder(STORAGE, None, "a").unwrap();
        assert!(bus.remove_object(a));
        let b = bus.add_folder(STORAGE, None, "b").unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_listing_resources_are_accounted() {
        let bus = bus_with_phone();
        bus.add_file(STORAGE, None, "x.txt", 3).unwrap();

        let connected = bus.connect(&phone()).await.unwrap();
        let listing = bus.list_objects(connected.handle, STORAGE).await.unwrap();
        assert_eq!(listing.objects.len(), 1);
        assert_eq!(bus.outstanding_resources(), 2);
        assert_eq!(
            bus.outstanding_bytes(),
            CONNECTION_BYTES + OBJECT_RECORD_BYTES + "x.txt".len() as u64
        );

        bus.release(listing.resource).unwrap();
        bus.release(connected.resource).unwrap();
        assert_eq!(bus.outstanding_resources(), 0);
        assert_eq!(bus.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_release_of_unknown_resource_fails() {
        let bus = MemoryTransport::new();
        let bogus = NativeResource::new(1, ResourceKind::ObjectListing, 10);
        assert!(bus.release(bogus).is_err());
    }

    #[tokio::test]
    async fn test_detached_device_fails_connected_calls() {
        let bus = bus_with_phone();
        let connected = bus.connect(&phone()).await.unwrap();
        bus.detach(&phone());

        let err = bus.storages(connected.handle).await.unwrap_err();
        assert!(matches!(err, DeviceError::TransportError(_)));
        assert!(matches!(
            bus.connect(&phone()).await.unwrap_err(),
            DeviceError::NoDeviceFound
        ));
        bus.release(connected.resource).unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_descendants() {
        let bus = bus_with_phone();
        let connected = bus.connect(&phone()).await.unwrap();
        let dir = bus.add_folder(STORAGE, None, "dir").unwrap();
        let file = bus.add_file(STORAGE, Some(dir), "f", 1).unwrap();

        bus.delete_object(connected.handle, dir).await.unwrap();
        assert!(!bus.contains(file));
        let err = bus.delete_object(connected.handle, dir).await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Response {
                code: ResponseCode::InvalidObjectHandle,
                ..
            }
        ));
        bus.release(connected.resource).unwrap();
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let bus = bus_with_phone();
        bus.fail_next(FailOp::ListDevices, DeviceError::TransportError("usb".into()));

        assert!(bus.list_devices().await.is_err());
        let list = bus.list_devices().await.unwrap();
        assert_eq!(list.devices.len(), 1);
        assert_eq!(bus.calls(FailOp::ListDevices), 2);
        bus.release(list.resource).unwrap();

        bus.pass_next(FailOp::ListDevices);
        bus.fail_next(FailOp::ListDevices, DeviceError::TransportError("usb".into()));
        let list = bus.list_devices().await.unwrap();
        bus.release(list.resource).unwrap();
        assert!(bus.list_devices().await.is_err());
        assert_eq!(bus.outstanding_resources(), 0);
    }

    #[tokio::test]
    async fn test_create_under_file_is_rejected_by_device() {
        let bus = bus_with_phone();
        let connected = bus.connect(&phone()).await.unwrap();
        let file = bus.add_file(STORAGE, None, "f", 1).unwrap();

        let err = bus
            .create_folder(connected.handle, STORAGE, Some(file), "x")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Response {
                code: ResponseCode::InvalidParentObject,
                ..
            }
        ));
        bus.release(connected.resource).unwrap();
    }

    #[tokio::test]
    async fn test_move_object() {
        let bus = bus_with_phone();
        let dir = bus.add_folder(STORAGE, None, "dir").unwrap();
        let file = bus.add_file(STORAGE, None, "f", 1).unwrap();

        bus.move_object(file, Some(dir)).unwrap();
        assert!(bus.move_object(dir, Some(file)).is_err(), "files cannot hold objects");
        assert!(bus.move_object(dir, Some(dir)).is_err());

        let connected = bus.connect(&phone()).await.unwrap();
        let listing = bus.list_objects(connected.handle, STORAGE).await.unwrap();
        let moved = listing.objects.iter().find(|o| o.object_id == file).unwrap();
        assert_eq!(moved.parent_id, Some(dir));
        bus.release(listing.resource).unwrap();
        bus.release(connected.resource).unwrap();
    }
}
