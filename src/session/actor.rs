//! Actor-based session runtime.
//!
//! A [`DeviceSession`] is a cheap, cloneable handle to a task that owns the
//! device connection, the filesystem cache and the native resources. Commands
//! are processed one at a time, so callers never observe a half-built tree.
//! `close()` bypasses the queue through a watch channel: bumping the close
//! epoch interrupts whatever device call is in flight, and every command sent
//! before the close fails with `NotConnected`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::config::SessionConfig;
use crate::error::{DeviceError, Result};
use crate::fs::{ObjectId, ObjectNode, RebuildReport, Storage, StorageSpace};
use crate::resources::ResourceStats;
use crate::session::core::{Session, SessionInfo, SessionState};
use crate::transport::{DeviceInfo, Transport};

/// Handle to a device session.
///
/// # Example
/// ```no_run
/// use mtplib::{DeviceSession, MemoryTransport, SessionConfig};
///
/// # async fn example() -> mtplib::Result<()> {
/// let session = DeviceSession::spawn(MemoryTransport::new(), SessionConfig::default());
/// let devices = session.scan().await?;
/// if let Some(device) = devices.first() {
///     let info = session.open(device, "backup").await?;
///     for storage in &info.storages {
///         for entry in session.entries_of(&storage.root).await? {
///             println!("{}", entry.full_path());
///         }
///     }
/// }
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceSession {
    tx: mpsc::Sender<Envelope>,
    close_epoch: Arc<watch::Sender<u64>>,
}

struct Envelope {
    epoch: u64,
    command: Command,
}

enum Command {
    Scan {
        reply: oneshot::Sender<Result<Vec<DeviceInfo>>>,
    },
    Open {
        device: DeviceInfo,
        label: String,
        reply: oneshot::Sender<Result<SessionInfo>>,
    },
    Info {
        reply: oneshot::Sender<Result<SessionInfo>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    ResourceStats {
        reply: oneshot::Sender<ResourceStats>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RebuildReport>>,
    },
    Storages {
        reply: oneshot::Sender<Result<Vec<Storage>>>,
    },
    EntriesOf {
        folder: ObjectNode,
        reply: oneshot::Sender<Result<Vec<ObjectNode>>>,
    },
    Node {
        object_id: ObjectId,
        reply: oneshot::Sender<Result<Option<ObjectNode>>>,
    },
    Stat {
        path: String,
        reply: oneshot::Sender<Result<Option<ObjectNode>>>,
    },
    CreateFolder {
        parent: ObjectNode,
        name: String,
        reply: oneshot::Sender<Result<ObjectNode>>,
    },
    Delete {
        node: ObjectNode,
        reply: oneshot::Sender<Result<()>>,
    },
    FreeSpace {
        reply: oneshot::Sender<Result<Vec<StorageSpace>>>,
    },
    Dump {
        reply: oneshot::Sender<Result<String>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

fn not_connected<R>() -> Result<R> {
    Err(DeviceError::NotConnected)
}

impl Command {
    /// Answer a command that was overtaken by a close.
    ///
    /// Returns the command back if it still has to run.
    fn reject(self) -> Option<Command> {
        match self {
            Command::Scan { reply } => drop(reply.send(not_connected())),
            Command::Open { reply, .. } | Command::Info { reply } => drop(reply.send(not_connected())),
            Command::Rebuild { reply } => drop(reply.send(not_connected())),
            Command::Storages { reply } => drop(reply.send(not_connected())),
            Command::EntriesOf { reply, .. } => drop(reply.send(not_connected())),
            Command::Node { reply, .. } | Command::Stat { reply, .. } => {
                drop(reply.send(not_connected()))
            }
            Command::CreateFolder { reply, .. } => drop(reply.send(not_connected())),
            Command::Delete { reply, .. } => drop(reply.send(not_connected())),
            Command::FreeSpace { reply } => drop(reply.send(not_connected())),
            Command::Dump { reply } => drop(reply.send(not_connected())),
            Command::State { reply } => drop(reply.send(SessionState::Closed)),
            survivor @ (Command::ResourceStats { .. } | Command::Close { .. }) => {
                return Some(survivor);
            }
        }
        None
    }
}

impl DeviceSession {
    /// Start a session task driving `transport`.
    ///
    /// Must be called from within a tokio runtime. The task ends, releasing
    /// every native resource, once the last handle is dropped.
    pub fn spawn<T: Transport>(transport: T, config: SessionConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_depth());
        let (close_tx, close_rx) = watch::channel(0u64);
        let actor = SessionActor {
            session: Session::new(Arc::new(transport), config, close_rx),
            rx,
        };
        tokio::spawn(actor.run());
        DeviceSession {
            tx,
            close_epoch: Arc::new(close_tx),
        }
    }

    async fn send(&self, command: Command) -> bool {
        let epoch = *self.close_epoch.borrow();
        self.tx.send(Envelope { epoch, command }).await.is_ok()
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<Result<R>>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        if !self.send(build(tx)).await {
            return Err(DeviceError::NotConnected);
        }
        rx.await.map_err(|_| DeviceError::NotConnected)?
    }

    /// Enumerate attachable devices.
    ///
    /// The returned list is an owned snapshot; iterate it as often as needed.
    pub async fn scan(&self) -> Result<Vec<DeviceInfo>> {
        self.request(|reply| Command::Scan { reply }).await
    }

    /// Open `device` and load its storages.
    ///
    /// Fails with `NoDeviceFound` if the device is gone, `NotEnoughSpace` if
    /// its primary storage is below the configured floor, and `AlreadyOpen`
    /// if a device is open already. On failure the session is left closed.
    pub async fn open(&self, device: &DeviceInfo, label: &str) -> Result<SessionInfo> {
        self.request(|reply| Command::Open {
            device: device.clone(),
            label: label.to_string(),
            reply,
        })
        .await
    }

    pub async fn info(&self) -> Result<SessionInfo> {
        self.request(|reply| Command::Info { reply }).await
    }

    pub async fn state(&self) -> SessionState {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::State { reply: tx }).await {
            return SessionState::Closed;
        }
        rx.await.unwrap_or(SessionState::Closed)
    }

    /// Native resource accounting of the session.
    pub async fn resource_stats(&self) -> ResourceStats {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::ResourceStats { reply: tx }).await {
            return ResourceStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Re-read the device and replace the tree.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        self.request(|reply| Command::Rebuild { reply }).await
    }

    pub async fn storages(&self) -> Result<Vec<Storage>> {
        self.request(|reply| Command::Storages { reply }).await
    }

    /// Children of a storage root or folder, ordered by case-insensitive name.
    pub async fn entries_of(&self, folder: &ObjectNode) -> Result<Vec<ObjectNode>> {
        self.request(|reply| Command::EntriesOf {
            folder: folder.clone(),
            reply,
        })
        .await
    }

    pub async fn node(&self, object_id: ObjectId) -> Result<Option<ObjectNode>> {
        self.request(|reply| Command::Node { object_id, reply })
            .await
    }

    /// Look up `/<storage>/<folder>/.../<name>`, case-insensitively.
    pub async fn stat(&self, path: &str) -> Result<Option<ObjectNode>> {
        self.request(|reply| Command::Stat {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Create a folder, or return the existing one with the same name.
    pub async fn create_folder(&self, parent: &ObjectNode, name: &str) -> Result<ObjectNode> {
        self.request(|reply| Command::CreateFolder {
            parent: parent.clone(),
            name: name.to_string(),
            reply,
        })
        .await
    }

    /// Delete a file, or a folder with everything below it.
    pub async fn delete_file_or_folder(&self, node: &ObjectNode) -> Result<()> {
        self.request(|reply| Command::Delete {
            node: node.clone(),
            reply,
        })
        .await
    }

    /// Free and total space of every storage.
    pub async fn free_space(&self) -> Result<Vec<StorageSpace>> {
        self.request(|reply| Command::FreeSpace { reply }).await
    }

    /// Indented text rendering of the tree.
    pub async fn dump(&self) -> Result<String> {
        self.request(|reply| Command::Dump { reply }).await
    }

    /// Close the device and release every native resource.
    ///
    /// Interrupts an in-flight device call, which then fails with
    /// `NotConnected`. Idempotent and infallible.
    pub async fn close(&self) {
        self.close_epoch.send_modify(|epoch| *epoch += 1);
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Close { reply: tx }).await {
            let _ = rx.await;
        }
    }
}

struct SessionActor<T: Transport> {
    session: Session<T>,
    rx: mpsc::Receiver<Envelope>,
}

impl<T: Transport> SessionActor<T> {
    async fn run(mut self) {
        while let Some(Envelope { epoch, command }) = self.rx.recv().await {
            if self.session.take_close_request() {
                self.session.close();
            }
            let command = if epoch < self.session.close_epoch() {
                match command.reject() {
                    Some(command) => command,
                    None => continue,
                }
            } else {
                command
            };
            self.handle_command(command).await;
        }
        self.session.close();
        tracing::debug!("session actor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Scan { reply } => {
                let res = self.session.scan().await;
                let _ = reply.send(res);
            }
            Command::Open {
                device,
                label,
                reply,
            } => {
                let res = self.session.open(&device, &label).await;
                let _ = reply.send(res);
            }
            Command::Info { reply } => {
                let _ = reply.send(self.session.info());
            }
            Command::State { reply } => {
                let _ = reply.send(self.session.state());
            }
            Command::ResourceStats { reply } => {
                let _ = reply.send(self.session.resource_stats());
            }
            Command::Rebuild { reply } => {
                let res = self.session.rebuild().await;
                let _ = reply.send(res);
            }
            Command::Storages { reply } => {
                let _ = reply.send(self.session.storages());
            }
            Command::EntriesOf { folder, reply } => {
                let _ = reply.send(self.session.entries_of(&folder));
            }
            Command::Node { object_id, reply } => {
                let _ = reply.send(self.session.node(object_id));
            }
            Command::Stat { path, reply } => {
                let _ = reply.send(self.session.stat(&path));
            }
            Command::CreateFolder {
                parent,
                name,
                reply,
            } => {
                let res = self.session.create_folder(&parent, &name).await;
                let _ = reply.send(res);
            }
            Command::Delete { node, reply } => {
                let res = self.session.delete_file_or_folder(&node).await;
                let _ = reply.send(res);
            }
            Command::FreeSpace { reply } => {
                let res = self.session.free_space().await;
                let _ = reply.send(res);
            }
            Command::Dump { reply } => {
                let _ = reply.send(self.session.dump());
            }
            Command::Close { reply } => {
                self.session.close();
                let _ = reply.send(());
            }
        }
    }
}
