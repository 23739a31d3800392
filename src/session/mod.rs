//! Device session lifecycle.

pub mod actor;
mod core;

pub use actor::DeviceSession;
pub(crate) use self::core::Session;
pub use self::core::{SessionInfo, SessionState};
