//! In-memory record with its own cooperative lock
//!
//! Each record is a small monitor: a mutex over its state plus a condition
//! variable waiters park on while somebody else owns the record. Releasing
//! the lock wakes every waiter and each one re-checks ownership, so there is
//! no ordering among waiters.

use crate::error::{StoreError, StoreResult};
use crate::storage::id::{LockCookie, RecordId};
use crate::storage::schema::Schema;
use parking_lot::{Condvar, Mutex};

/// Validity flag as stored in the first byte of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
	Valid,
	Deleted,
}

impl RecordStatus {
	pub const VALID_FLAG: u8 = 0x00;
	pub const DELETED_FLAG: u8 = 0xFF;

	pub fn flag(self) -> u8 {
		match self {
			RecordStatus::Valid => Self::VALID_FLAG,
			RecordStatus::Deleted => Self::DELETED_FLAG,
		}
	}

	pub fn from_flag(flag: u8) -> StoreResult<Self> {
		match flag {
			Self::VALID_FLAG => Ok(RecordStatus::Valid),
			Self::DELETED_FLAG => Ok(RecordStatus::Deleted),
			other => Err(StoreError::RecordFormat(format!(
				"unknown record flag 0x{:02X}",
				other
			))),
		}
	}
}

/// Consistent copy of a record taken for write-back
#[derive(Debug, Clone)]
pub struct RecordImage {
	pub status: RecordStatus,
	pub values: Vec<String>,
	pub revision: u64,
}

#[derive(Debug)]
struct RecordState {
	values: Vec<String>,
	status: RecordStatus,
	owner: Option<LockCookie>,
	/// Bumped on every mutation
	revision: u64,
	/// Last revision known to be on disk
	flushed: u64,
	interrupted: bool,
	/// No longer part of the store; mutations would be lost
	detached: bool,
}

impl RecordState {
	fn check_owner(&self, id: RecordId, cookie: LockCookie) -> StoreResult<()> {
		match self.owner {
			Some(owner) if owner == cookie => Ok(()),
			Some(_) => Err(StoreError::Security(format!(
				"record {} is locked with a different cookie",
				id
			))),
			None => Err(StoreError::Security(format!("record {} is not locked", id))),
		}
	}

	/// Ownership check for mutations, which also refuses records dropped from
	/// the store
	fn check_mutable(&self, id: RecordId, cookie: LockCookie) -> StoreResult<()> {
		if self.detached {
			return Err(StoreError::Interrupted(id));
		}
		self.check_owner(id, cookie)
	}

	fn touch(&mut self) {
		self.revision += 1;
	}
}

/// One row of the store
#[derive(Debug)]
pub struct Record {
	id: RecordId,
	state: Mutex<RecordState>,
	released: Condvar,
}

impl Record {
	/// A record read from disk; clean until modified
	pub fn loaded(id: RecordId, status: RecordStatus, values: Vec<String>) -> Self {
		Self::with_state(id, status, values, 0)
	}

	/// A record that exists only in memory until the next write-back
	pub fn created(id: RecordId, values: Vec<String>) -> Self {
		Self::with_state(id, RecordStatus::Valid, values, 1)
	}

	fn with_state(id: RecordId, status: RecordStatus, values: Vec<String>, revision: u64) -> Self {
		Self {
			id,
			state: Mutex::new(RecordState {
				values,
				status,
				owner: None,
				revision,
				flushed: 0,
				interrupted: false,
				detached: false,
			}),
			released: Condvar::new(),
		}
	}

	pub fn id(&self) -> RecordId {
		self.id
	}

	/// Take the lock for `cookie`, waiting for as long as another cookie owns it.
	///
	/// Re-locking with the current owner's cookie is a no-op.
	pub fn lock(&self, cookie: LockCookie) -> StoreResult<()> {
		let mut state = self.state.lock();
		loop {
			if state.interrupted {
				return Err(StoreError::Interrupted(self.id));
			}
			if state.status == RecordStatus::Deleted {
				return Err(StoreError::RecordNotFound(self.id));
			}
			match state.owner {
				None => {
					state.owner = Some(cookie);
					tracing::debug!("Record {} locked by cookie {}", self.id, cookie);
					return Ok(());
				}
				Some(owner) if owner == cookie => return Ok(()),
				Some(owner) => {
					tracing::debug!(
						"Cookie {} waiting on record {} held by {}",
						cookie,
						self.id,
						owner
					);
					self.released.wait(&mut state);
				}
			}
		}
	}

	/// Release the lock held by `cookie` and wake every waiter
	pub fn unlock(&self, cookie: LockCookie) -> StoreResult<()> {
		let mut state = self.state.lock();
		state.check_owner(self.id, cookie)?;
		state.owner = None;
		drop(state);

		tracing::debug!("Record {} unlocked by cookie {}", self.id, cookie);
		self.released.notify_all();
		Ok(())
	}

	/// Replace every value. `values` must already be validated against the schema.
	pub fn set_values(&self, cookie: LockCookie, values: Vec<String>) -> StoreResult<()> {
		let mut state = self.state.lock();
		state.check_mutable(self.id, cookie)?;
		if values.len() != state.values.len() {
			return Err(StoreError::SchemaMismatch(format!(
				"expected {} values, got {}",
				state.values.len(),
				values.len()
			)));
		}
		state.values = values;
		state.touch();
		Ok(())
	}

	/// Validate `raw` with `schema` and replace every value on success
	pub fn update<S: AsRef<str>>(
		&self,
		schema: &Schema,
		cookie: LockCookie,
		raw: &[S],
	) -> StoreResult<()> {
		// Ownership is checked first so a stranger learns nothing about validity
		self.state.lock().check_mutable(self.id, cookie)?;
		let values = schema.validate_row(raw)?;
		self.set_values(cookie, values)
	}

	/// Copy of the current values. Never waits on the record lock.
	pub fn values(&self) -> Vec<String> {
		self.state.lock().values.clone()
	}

	/// Tombstone the record. Waiters wake up to find the record gone, while
	/// `cookie` keeps the tombstone until it unlocks, so it can still
	/// `mark_valid` it.
	pub fn mark_deleted(&self, cookie: LockCookie) -> StoreResult<()> {
		let mut state = self.state.lock();
		state.check_mutable(self.id, cookie)?;
		state.status = RecordStatus::Deleted;
		state.touch();
		drop(state);

		self.released.notify_all();
		Ok(())
	}

	/// Undo a tombstone. Only the cookie that deleted the record can do this,
	/// and only before it unlocks.
	pub fn mark_valid(&self, cookie: LockCookie) -> StoreResult<()> {
		let mut state = self.state.lock();
		state.check_mutable(self.id, cookie)?;
		if state.status != RecordStatus::Valid {
			state.status = RecordStatus::Valid;
			state.touch();
		}
		Ok(())
	}

	pub fn status(&self) -> RecordStatus {
		self.state.lock().status
	}

	pub fn is_deleted(&self) -> bool {
		self.status() == RecordStatus::Deleted
	}

	pub fn is_dirty(&self) -> bool {
		let state = self.state.lock();
		state.revision != state.flushed
	}

	pub fn is_locked(&self) -> bool {
		self.state.lock().owner.is_some()
	}

	pub fn owner(&self) -> Option<LockCookie> {
		self.state.lock().owner
	}

	/// Snapshot for write-back, or `None` when the record is clean
	pub fn dirty_image(&self) -> Option<RecordImage> {
		let state = self.state.lock();
		if state.revision == state.flushed {
			return None;
		}
		Some(RecordImage {
			status: state.status,
			values: state.values.clone(),
			revision: state.revision,
		})
	}

	/// Record that `revision` reached disk. Later mutations keep the record dirty.
	pub fn mark_flushed(&self, revision: u64) {
		let mut state = self.state.lock();
		if revision > state.flushed {
			state.flushed = revision;
		}
	}

	/// Fail every current and future `lock` call on this record
	pub fn interrupt(&self) {
		self.state.lock().interrupted = true;
		self.released.notify_all();
	}

	/// Cut the record loose from its store. Waiters are interrupted and any
	/// later mutation fails with `Interrupted` instead of changing a copy
	/// nobody will write back.
	pub fn detach(&self) {
		let mut state = self.state.lock();
		state.interrupted = true;
		state.detached = true;
		drop(state);
		self.released.notify_all();
	}

	pub fn is_detached(&self) -> bool {
		self.state.lock().detached
	}

	/// Case-insensitive prefix match of each non-empty criterion
	pub fn matches<S: AsRef<str>>(&self, criteria: &[S]) -> bool {
		let state = self.state.lock();
		if state.status == RecordStatus::Deleted {
			return false;
		}
		criteria
			.iter()
			.zip(&state.values)
			.all(|(criterion, value)| starts_with_ignore_case(value, criterion.as_ref()))
	}
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
	if prefix.is_empty() {
		return true;
	}
	value.to_lowercase().starts_with(&prefix.to_lowercase())
}
