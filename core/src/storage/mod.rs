//! Fixed-schema record storage with per-record locking

pub mod engine;
pub mod field;
pub mod id;
pub mod record;
pub mod schema;

// Re-export core types
pub use engine::{RecordView, Store};
pub use field::{FieldDefinition, FieldKind};
pub use id::{IdGenerator, LockCookie, RecordId};
pub use record::{Record, RecordStatus};
pub use schema::{FIELDS, MAGIC, Schema};

#[cfg(test)]
mod tests;
