//! Session operations on the filesystem cache, split into focused modules.

mod browse;
mod dir_ops;
mod quota;
mod tree;
mod utils;

pub use tree::RebuildReport;
