//! Record numbers, lock cookies and the counter that mints them

use crate::error::{StoreError, StoreResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Record number. Assigned at load or creation time, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u32);

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Proof of ownership of a record lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockCookie(pub u64);

impl fmt::Display for LockCookie {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Monotonic counter. Values are unique for the lifetime of the generator.
#[derive(Debug)]
pub struct IdGenerator {
	next: AtomicU64,
}

impl IdGenerator {
	pub fn starting_at(first: u64) -> Self {
		Self {
			next: AtomicU64::new(first),
		}
	}

	/// Take the next value
	pub fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::SeqCst)
	}

	/// Value the next call to `next` will return
	#[cfg(test)]
	pub fn peek(&self) -> u64 {
		self.next.load(Ordering::SeqCst)
	}

	/// Next record number. Fails once the 32-bit space is used up rather
	/// than wrapping onto numbers already handed out.
	pub fn next_record_id(&self) -> StoreResult<RecordId> {
		let value = self.next();
		u32::try_from(value)
			.map(RecordId)
			.map_err(|_| StoreError::IdsExhausted(value))
	}

	pub fn next_cookie(&self) -> LockCookie {
		LockCookie(self.next())
	}
}

impl Default for IdGenerator {
	fn default() -> Self {
		Self::starting_at(0)
	}
}
