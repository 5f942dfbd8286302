//! Fixed-width field definitions and their codecs

use crate::error::{StoreError, StoreResult};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
	static ref DATE_PATTERN: Regex = Regex::new(r"^[0-9]{1,4}/[0-9]{1,2}/[0-9]{1,2}$").unwrap();
	static ref CURRENCY_PATTERN: Regex = Regex::new(r"^\$[0-9]{1,4}\.[0-9]{2}$").unwrap();
	static ref OWNER_PATTERN: Regex = Regex::new(r"^([0-9]{8})?$").unwrap();
}

/// Length of a `yyyy/mm/dd` value
pub const DATE_LENGTH: usize = 10;

/// Length of an owner id
pub const OWNER_LENGTH: usize = 8;

/// Validation rule attached to a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
	/// Any text that fits the field
	Text,
	/// Digits only, between `min_digits` and `max_digits` of them
	Numeric { min_digits: usize, max_digits: usize },
	/// `Y` or `N`, stored upper-case
	YesNo,
	/// `yyyy/mm/dd`, shape only
	Date,
	/// `$` amount with two decimals, e.g. `$150.00`
	Currency,
	/// Eight digit customer id, or empty when unowned
	Owner,
}

/// A named fixed-width column of the record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
	pub name: &'static str,
	pub length: usize,
	pub kind: FieldKind,
}

impl FieldDefinition {
	pub const fn new(name: &'static str, length: usize, kind: FieldKind) -> Self {
		Self { name, length, kind }
	}

	/// Names compare case-insensitively
	pub fn matches_name(&self, other: &str) -> bool {
		self.name.eq_ignore_ascii_case(other)
	}

	/// Check a submitted value and return the form that gets stored.
	///
	/// Values are trimmed first. Anything longer than the field is rejected
	/// rather than truncated.
	pub fn validate(&self, raw: &str) -> StoreResult<String> {
		let value = raw.trim();

		if value.len() > self.length {
			return Err(StoreError::field(
				self.name,
				format!(
					"{} bytes exceeds field length of {}",
					value.len(),
					self.length
				),
			));
		}

		match self.kind {
			FieldKind::Text => Ok(value.to_string()),
			FieldKind::Numeric {
				min_digits,
				max_digits,
			} => {
				let digits = value.len();
				if digits < min_digits
					|| digits > max_digits
					|| !value.bytes().all(|b| b.is_ascii_digit())
				{
					return Err(StoreError::field(
						self.name,
						format!(
							"must be a number of {} to {} digits",
							min_digits, max_digits
						),
					));
				}
				Ok(value.to_string())
			}
			FieldKind::YesNo => {
				let upper = value.to_ascii_uppercase();
				if upper != "Y" && upper != "N" {
					return Err(StoreError::field(self.name, "may only be Y or N"));
				}
				Ok(upper)
			}
			FieldKind::Date => {
				if value.len() != DATE_LENGTH || !DATE_PATTERN.is_match(value) {
					return Err(StoreError::field(self.name, "must follow yyyy/mm/dd"));
				}
				Ok(value.to_string())
			}
			FieldKind::Currency => {
				if !CURRENCY_PATTERN.is_match(value) {
					return Err(StoreError::field(
						self.name,
						"must be an amount of the form $xxxx.xx",
					));
				}
				Ok(value.to_string())
			}
			FieldKind::Owner => {
				if !OWNER_PATTERN.is_match(value) {
					return Err(StoreError::field(
						self.name,
						format!("must be exactly {} digits or empty", OWNER_LENGTH),
					));
				}
				Ok(value.to_string())
			}
		}
	}

	/// Append the space-padded value to `buf`, exactly `length` bytes.
	///
	/// Callers pass values that already went through `validate`.
	pub fn encode_into(&self, value: &str, buf: &mut Vec<u8>) -> StoreResult<()> {
		let bytes = value.as_bytes();
		if bytes.len() > self.length {
			return Err(StoreError::field(
				self.name,
				format!("cannot encode {} bytes into {}", bytes.len(), self.length),
			));
		}
		buf.extend_from_slice(bytes);
		buf.resize(buf.len() + self.length - bytes.len(), b' ');
		Ok(())
	}

	/// Decode a stored slot. No re-validation: what is on disk was validated
	/// when it was written.
	pub fn decode(&self, bytes: &[u8]) -> StoreResult<String> {
		if bytes.len() != self.length {
			return Err(StoreError::RecordFormat(format!(
				"field '{}' expects {} bytes, got {}",
				self.name,
				self.length,
				bytes.len()
			)));
		}
		Ok(String::from_utf8_lossy(bytes).trim().to_string())
	}
}
