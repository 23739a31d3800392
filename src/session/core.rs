//! Session state and connection lifecycle.
//!
//! [`Session`] is owned by the session actor. It holds the transport, the
//! resource guard and the filesystem cache, and is never shared: every
//! operation runs to completion (or is interrupted by close) before the next
//! one starts.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::fs::{FilesystemCache, Storage};
use crate::resources::{ResourceGuard, ResourceScope, ResourceStats};
use crate::transport::{Connected, DeviceHandle, DeviceInfo, DeviceList, Transport};

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No device is open
    Closed,
    /// Devices have been enumerated, none is open yet
    Scanning,
    /// A device is open and its tree is loaded
    Open,
}

/// Summary of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub device: DeviceInfo,
    /// Caller-supplied label given to `open`
    pub label: String,
    pub storages: Vec<Storage>,
    /// Generation of the current tree
    pub generation: u64,
}

struct OpenDevice {
    device: DeviceInfo,
    label: String,
    handle: DeviceHandle,
}

enum Link {
    Closed,
    Scanning,
    Open(OpenDevice),
}

pub(crate) struct Session<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) config: SessionConfig,
    pub(crate) resources: ResourceGuard<T>,
    pub(crate) cache: FilesystemCache,
    pub(crate) next_generation: u64,
    link: Link,
    close_signal: watch::Receiver<u64>,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        config: SessionConfig,
        close_signal: watch::Receiver<u64>,
    ) -> Self {
        Session {
            resources: ResourceGuard::new(Arc::clone(&transport)),
            transport,
            config,
            cache: FilesystemCache::new(),
            next_generation: 0,
            link: Link::Closed,
            close_signal,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match self.link {
            Link::Closed => SessionState::Closed,
            Link::Scanning => SessionState::Scanning,
            Link::Open(_) => SessionState::Open,
        }
    }

    /// Latest close epoch; commands sent under an older one are stale.
    pub(crate) fn close_epoch(&self) -> u64 {
        *self.close_signal.borrow()
    }

    /// Consume a pending close request, if any.
    pub(crate) fn take_close_request(&mut self) -> bool {
        match self.close_signal.has_changed() {
            Ok(true) => {
                self.close_signal.borrow_and_update();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn resource_stats(&self) -> ResourceStats {
        self.resources.stats()
    }

    /// Handle of the open device.
    pub(crate) fn handle(&self) -> Result<DeviceHandle> {
        match &self.link {
            Link::Open(open) => Ok(open.handle),
            _ => Err(DeviceError::NotConnected),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.handle().map(|_| ())
    }

    pub(crate) fn info(&self) -> Result<SessionInfo> {
        let Link::Open(open) = &self.link else {
            return Err(DeviceError::NotConnected);
        };
        Ok(SessionInfo {
            device: open.device.clone(),
            label: open.label.clone(),
            storages: self.cache.storages(),
            generation: self.cache.generation(),
        })
    }

    /// Await a device call, bounded by the I/O timeout and interrupted by
    /// close. A close already requested wins over a call that is ready.
    pub(crate) async fn io<R>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        let mut close_signal = self.close_signal.clone();
        let timeout = self.config.io_timeout();
        tokio::select! {
            biased;

            Ok(()) = close_signal.changed() => {
                tracing::debug!(op, "device call interrupted by close");
                Err(DeviceError::NotConnected)
            }
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(res) => {
                    if let Err(err) = &res {
                        tracing::debug!(op, %err, "device call failed");
                    }
                    res
                }
                Err(_) => {
                    tracing::debug!(op, ?timeout, "device call timed out");
                    Err(DeviceError::TransportError(format!(
                        "{} timed out after {:?}",
                        op, timeout
                    )))
                }
            },
        }
    }

    /// Enumerate attachable devices.
    pub(crate) async fn scan(&mut self) -> Result<Vec<DeviceInfo>> {
        let DeviceList { devices, resource } =
            self.io("list_devices", self.transport.list_devices()).await?;
        self.resources.register(ResourceScope::Scan, resource);
        self.resources.release_scope(ResourceScope::Scan);

        if matches!(self.link, Link::Closed) {
            self.link = Link::Scanning;
        }
        tracing::debug!(count = devices.len(), "scanned devices");
        Ok(devices)
    }

    /// Open `candidate` and load its tree.
    pub(crate) async fn open(&mut self, candidate: &DeviceInfo, label: &str) -> Result<SessionInfo> {
        if matches!(self.link, Link::Open(_)) {
            return Err(DeviceError::AlreadyOpen);
        }
        match self.try_open(candidate, label).await {
            Ok(info) => {
                tracing::info!(
                    device = %info.device.display_name(),
                    label,
                    storages = info.storages.len(),
                    "device opened"
                );
                Ok(info)
            }
            Err(err) => {
                tracing::warn!(device = %candidate.display_name(), %err, "failed to open device");
                self.teardown();
                Err(err)
            }
        }
    }

    async fn try_open(&mut self, candidate: &DeviceInfo, label: &str) -> Result<SessionInfo> {
        let device = self
            .scan()
            .await?
            .into_iter()
            .find(|d| d.same_device(candidate))
            .ok_or(DeviceError::NoDeviceFound)?;

        let Connected { handle, resource } =
            self.io("connect", self.transport.connect(&device)).await?;
        self.resources.register(ResourceScope::Session, resource);

        let storages = self.io("storages", self.transport.storages(handle)).await?;
        let primary = storages
            .first()
            .ok_or_else(|| DeviceError::TransportError("device reports no storage".to_string()))?;
        let space = self
            .io("free_space", self.transport.free_space(handle, primary.storage_id))
            .await?;
        if space.free < self.config.min_free_space {
            return Err(DeviceError::NotEnoughSpace {
                available: space.free,
                required: self.config.min_free_space,
            });
        }

        self.link = Link::Open(OpenDevice {
            device,
            label: label.to_string(),
            handle,
        });
        self.rebuild().await?;
        self.info()
    }

    /// Release everything and return to `Closed`. Never fails.
    pub(crate) fn close(&mut self) {
        let was_open = matches!(self.link, Link::Open(_));
        let released = self.teardown();
        if was_open {
            tracing::info!(released, "device closed");
        } else if released > 0 {
            tracing::debug!(released, "released resources of a closed session");
        }
    }

    fn teardown(&mut self) -> usize {
        let released = self.resources.release_all();
        self.cache.clear();
        self.link = Link::Closed;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StorageId;
    use crate::transport::{FailOp, MemoryTransport, StorageInfo};

    const STORAGE: StorageId = 0x0001_0001;

    fn reader() -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0x1949,
            product_id: 0x0004,
            bus: 3,
            address: 2,
            serial: Some("G000A1".to_string()),
            manufacturer: "Amazon".to_string(),
            model: "Kindle".to_string(),
        }
    }

    async fn open_session(
        bus: &MemoryTransport,
    ) -> (Session<MemoryTransport>, watch::Sender<u64>, SessionInfo) {
        bus.attach(
            reader(),
            vec![StorageInfo {
                storage_id: STORAGE,
                description: "Kindle".to_string(),
                capacity: 8 << 30,
                free_space: 4 << 30,
            }],
        );
        let (tx, rx) = watch::channel(0u64);
        let mut session = Session::new(Arc::new(bus.clone()), SessionConfig::default(), rx);
        let info = session.open(&reader(), "test").await.unwrap();
        (session, tx, info)
    }

    #[tokio::test]
    async fn test_pending_close_wins_over_ready_call() {
        let bus = MemoryTransport::new();
        let (mut session, tx, info) = open_session(&bus).await;
        let root = info.storages[0].root.clone();

        tx.send_modify(|epoch| *epoch += 1);
        for i in 0..64 {
            let err = session.create_folder(&root, &format!("f{i}")).await.unwrap_err();
            assert!(matches!(err, DeviceError::NotConnected));
        }
        assert_eq!(bus.calls(FailOp::CreateFolder), 0);
        assert_eq!(bus.object_count(STORAGE), 0);
    }

    #[tokio::test]
    async fn test_pending_close_stops_recursive_delete() {
        let bus = MemoryTransport::new();
        let books = {
            let (mut session, tx, info) = open_session(&bus).await;
            let books = session.create_folder(&info.storages[0].root, "Books").await.unwrap();
            for name in ["a", "b", "c", "d"] {
                session.create_folder(&books, name).await.unwrap();
            }

            tx.send_modify(|epoch| *epoch += 1);
            let err = session.delete_file_or_folder(&books).await.unwrap_err();
            assert!(matches!(err, DeviceError::NotConnected));
            assert!(session.take_close_request());
            session.close();
            books
        };
        assert_eq!(bus.calls(FailOp::DeleteObject), 0);
        assert!(bus.contains(books.object_id));
        assert_eq!(bus.object_count(STORAGE), 5);
        assert_eq!(bus.outstanding_resources(), 0);
    }
}
