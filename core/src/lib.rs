//! RoomDB - single-file record store with per-record locking

pub mod config;
pub mod error;
pub mod storage;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use storage::{LockCookie, RecordId, Store};
