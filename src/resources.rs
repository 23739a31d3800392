//! Scoped ownership of native device resources.
//!
//! Device handles and the buffers backing scans and object listings are owned
//! by the transport's native layer. Every such allocation is handed to the
//! library as a [`NativeResource`] token, which is registered with a
//! [`ResourceGuard`] under a [`ResourceScope`] and later given back to the
//! transport exactly once:
//!
//! - `Scan` resources are released before a scan returns.
//! - `Tree(generation)` resources live as long as the tree built from them and
//!   are released when a newer rebuild replaces it.
//! - `Session` resources (the device handle) are released on close.
//!
//! Release never depends on a collector: it happens synchronously when a scope
//! ends, and dropping the guard releases whatever is still held.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier the transport gives to a native allocation.
pub type ResourceId = u64;

/// Kind of native allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Open connection to a device
    DeviceHandle,
    /// Buffer holding the result of a device scan
    DeviceList,
    /// Buffer holding the object listing of one storage
    ObjectListing,
}

/// Token for a native allocation held on behalf of the library.
///
/// Deliberately neither `Clone` nor `Copy`: giving it back to the transport
/// consumes it, so it can only be released once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NativeResource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub bytes: u64,
}

impl NativeResource {
    pub fn new(id: ResourceId, kind: ResourceKind, bytes: u64) -> Self {
        Self { id, kind, bytes }
    }
}

/// Gives native resources back to whoever allocated them.
pub trait ReleaseResource: Send + Sync + 'static {
    /// Called exactly once per resource.
    fn release(&self, resource: NativeResource) -> Result<()>;
}

/// Lifetime a resource is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceScope {
    /// The device handle of the open session
    Session,
    /// A device scan in progress
    Scan,
    /// The tree built by the rebuild with this generation
    Tree(u64),
}

/// Accounting snapshot of a guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// Resources currently held
    pub live: usize,
    /// Bytes currently held
    pub live_bytes: u64,
    /// Resources registered over the guard's lifetime
    pub acquired: u64,
    /// Resources released over the guard's lifetime
    pub released: u64,
    /// Releases the transport reported as failed
    pub failed_releases: u64,
}

/// Owner of every native resource acquired by a session.
pub struct ResourceGuard<R: ReleaseResource> {
    releaser: Arc<R>,
    held: BTreeMap<ResourceScope, Vec<NativeResource>>,
    stats: ResourceStats,
}

impl<R: ReleaseResource> ResourceGuard<R> {
    /// Create a guard that releases through `releaser`.
    pub fn new(releaser: Arc<R>) -> Self {
        Self {
            releaser,
            held: BTreeMap::new(),
            stats: ResourceStats::default(),
        }
    }

    /// Take ownership of `resource` until `scope` ends.
    pub fn register(&mut self, scope: ResourceScope, resource: NativeResource) {
        tracing::trace!(
            ?scope,
            id = resource.id,
            kind = ?resource.kind,
            bytes = resource.bytes,
            "registered native resource"
        );
        self.stats.live += 1;
        self.stats.live_bytes += resource.bytes;
        self.stats.acquired += 1;
        self.held.entry(scope).or_default().push(resource);
    }

    /// Release every resource registered under `scope`.
    ///
    /// Returns the number of resources released. Release failures are logged
    /// and counted, never propagated, so one bad resource cannot keep the
    /// others alive.
    pub fn release_scope(&mut self, scope: ResourceScope) -> usize {
        let Some(resources) = self.held.remove(&scope) else {
            return 0;
        };
        let count = resources.len();
        // Newest first, mirroring acquisition order.
        for resource in resources.into_iter().rev() {
            self.release_one(scope, resource);
        }
        count
    }

    /// Release every tree generation older than `current`.
    pub fn release_trees_before(&mut self, current: u64) -> usize {
        let stale: Vec<ResourceScope> = self
            .held
            .keys()
            .filter(|scope| matches!(scope, ResourceScope::Tree(generation) if *generation < current))
            .copied()
            .collect();
        stale.into_iter().map(|scope| self.release_scope(scope)).sum()
    }

    /// Release everything the guard holds.
    pub fn release_all(&mut self) -> usize {
        // Trees and scans first, the device handle last.
        let mut scopes: Vec<ResourceScope> = self.held.keys().copied().collect();
        scopes.sort_by_key(|scope| matches!(scope, ResourceScope::Session));
        scopes.into_iter().map(|scope| self.release_scope(scope)).sum()
    }

    /// Whether anything is held under `scope`.
    pub fn holds(&self, scope: ResourceScope) -> bool {
        self.held.get(&scope).is_some_and(|v| !v.is_empty())
    }

    pub fn stats(&self) -> ResourceStats {
        self.stats
    }

    fn release_one(&mut self, scope: ResourceScope, resource: NativeResource) {
        let id = resource.id;
        let bytes = resource.bytes;
        self.stats.live = self.stats.live.saturating_sub(1);
        self.stats.live_bytes = self.stats.live_bytes.saturating_sub(bytes);
        self.stats.released += 1;
        match self.releaser.release(resource) {
            Ok(()) => tracing::trace!(?scope, id, bytes, "released native resource"),
            Err(err) => {
                self.stats.failed_releases += 1;
                tracing::warn!(?scope, id, %err, "failed to release native resource");
            }
        }
    }
}

impl<R: ReleaseResource> Drop for ResourceGuard<R> {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            tracing::debug!(released, "released native resources on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::DeviceError;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<ResourceId>>,
        fail_on: Option<ResourceId>,
    }

    impl ReleaseResource for Recorder {
        fn release(&self, resource: NativeResource) -> Result<()> {
            self.released.lock().unwrap().push(resource.id);
            if Some(resource.id) == self.fail_on {
                return Err(DeviceError::TransportError("release failed".into()));
            }
            Ok(())
        }
    }

    fn listing(id: ResourceId, bytes: u64) -> NativeResource {
        NativeResource::new(id, ResourceKind::ObjectListing, bytes)
    }

    #[test]
    fn test_register_and_release_scope() {
        let recorder = Arc::new(Recorder::default());
        let mut guard = ResourceGuard::new(Arc::clone(&recorder));

        guard.register(ResourceScope::Tree(1), listing(1, 100));
        guard.register(ResourceScope::Tree(1), listing(2, 50));
        guard.register(ResourceScope::Scan, NativeResource::new(3, ResourceKind::DeviceList, 10));

        let stats = guard.stats();
        assert_eq!(stats.live, 3);
        assert_eq!(stats.live_bytes, 160);

        assert_eq!(guard.release_scope(ResourceScope::Tree(1)), 2);
        assert_eq!(*recorder.released.lock().unwrap(), vec![2, 1]);
        assert_eq!(guard.stats().live, 1);
        assert_eq!(guard.stats().live_bytes, 10);

        // Releasing an empty scope is a no-op.
        assert_eq!(guard.release_scope(ResourceScope::Tree(1)), 0);
    }

    #[test]
    fn test_release_trees_before_keeps_current() {
        let recorder = Arc::new(Recorder::default());
        let mut guard = ResourceGuard::new(Arc::clone(&recorder));

        guard.register(ResourceScope::Tree(1), listing(1, 1));
        guard.register(ResourceScope::Tree(2), listing(2, 1));
        guard.register(ResourceScope::Tree(3), listing(3, 1));
        guard.register(ResourceScope::Session, NativeResource::new(4, ResourceKind::DeviceHandle, 0));

        assert_eq!(guard.release_trees_before(3), 2);
        assert!(guard.holds(ResourceScope::Tree(3)));
        assert!(guard.holds(ResourceScope::Session));
        assert!(!guard.holds(ResourceScope::Tree(1)));
    }

    #[test]
    fn test_release_all_releases_session_last() {
        let recorder = Arc::new(Recorder::default());
        let mut guard = ResourceGuard::new(Arc::clone(&recorder));

        guard.register(ResourceScope::Session, NativeResource::new(1, ResourceKind::DeviceHandle, 0));
        guard.register(ResourceScope::Tree(5), listing(2, 8));

        assert_eq!(guard.release_all(), 2);
        assert_eq!(*recorder.released.lock().unwrap(), vec![2, 1]);
        assert_eq!(guard.stats().live, 0);
        assert_eq!(guard.stats().acquired, guard.stats().released);
    }

    #[test]
    fn test_failed_release_does_not_block_others() {
        let recorder = Arc::new(Recorder {
            released: Mutex::new(Vec::new()),
            fail_on: Some(2),
        });
        let mut guard = ResourceGuard::new(Arc::clone(&recorder));

        guard.register(ResourceScope::Tree(1), listing(1, 1));
        guard.register(ResourceScope::Tree(1), listing(2, 1));
        guard.register(ResourceScope::Tree(1), listing(3, 1));

        assert_eq!(guard.release_all(), 3);
        assert_eq!(recorder.released.lock().unwrap().len(), 3);
        assert_eq!(guard.stats().failed_releases, 1);
        assert_eq!(guard.stats().live, 0);
    }

    #[test]
    fn test_drop_releases_everything() {
        let recorder = Arc::new(Recorder::default());
        {
            let mut guard = ResourceGuard::new(Arc::clone(&recorder));
            guard.register(ResourceScope::Tree(1), listing(1, 1));
            guard.register(ResourceScope::Session, NativeResource::new(2, ResourceKind::DeviceHandle, 0));
        }
        assert_eq!(recorder.released.lock().unwrap().len(), 2);
    }
}
