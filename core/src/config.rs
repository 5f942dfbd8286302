//! Store configuration

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings for a [`Store`](crate::storage::Store) instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
	/// Record number given to the first slot loaded
	pub first_record_number: u32,
	/// First lock cookie handed out
	pub first_lock_cookie: u64,
	/// fsync after every write-back pass (default: true)
	pub sync_on_write: bool,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			first_record_number: 0,
			first_lock_cookie: 1000,
			sync_on_write: true,
		}
	}
}

impl StoreConfig {
	/// Load from a JSON file. A missing file yields the defaults.
	pub fn load_from_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
		match fs::read_to_string(path.as_ref()) {
			Ok(contents) => serde_json::from_str(&contents)
				.map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e))),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
			Err(e) => Err(StoreError::Io(e)),
		}
	}
}
