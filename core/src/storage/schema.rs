//! Built-in record layout and on-disk header verification
//!
//! File layout (big-endian):
//!
//! ```text
//! magic         u32   (259)
//! field count   u16
//! per field:    u8 name length, name bytes, u8 field length
//! records:      u8 flag (0x00 valid, 0xFF deleted), fixed-width fields
//! ```
//!
//! The layout is fixed in code. A file is only ever checked against it.

use crate::error::{StoreError, StoreResult};
use crate::storage::field::{DATE_LENGTH, FieldDefinition, FieldKind, OWNER_LENGTH};
use crate::storage::record::RecordStatus;
use lazy_static::lazy_static;
use std::io::{ErrorKind, Read, Write};

/// Value expected in the first four bytes of a store file
pub const MAGIC: u32 = 259;

/// Size of the status flag preceding every record
pub const FLAG_SIZE: usize = 1;

/// The hotel room layout every store file must carry
pub const FIELDS: [FieldDefinition; 7] = [
	FieldDefinition::new("name", 64, FieldKind::Text),
	FieldDefinition::new("location", 64, FieldKind::Text),
	FieldDefinition::new(
		"size",
		4,
		FieldKind::Numeric {
			min_digits: 1,
			max_digits: 4,
		},
	),
	FieldDefinition::new("smoking", 1, FieldKind::YesNo),
	FieldDefinition::new("rate", 8, FieldKind::Currency),
	FieldDefinition::new("date", DATE_LENGTH, FieldKind::Date),
	FieldDefinition::new("owner", OWNER_LENGTH, FieldKind::Owner),
];

lazy_static! {
	static ref BUILTIN: Schema = Schema::new(&FIELDS);
}

/// Ordered field definitions plus the sizes derived from them
#[derive(Debug)]
pub struct Schema {
	fields: &'static [FieldDefinition],
	record_size: usize,
	header_size: usize,
}

impl Schema {
	pub(crate) fn new(fields: &'static [FieldDefinition]) -> Self {
		let record_size = FLAG_SIZE + fields.iter().map(|f| f.length).sum::<usize>();
		let header_size = 4 + 2 + fields.iter().map(|f| 2 + f.name.len()).sum::<usize>();
		Self {
			fields,
			record_size,
			header_size,
		}
	}

	/// The layout compiled into this binary
	pub fn builtin() -> &'static Schema {
		&BUILTIN
	}

	pub fn fields(&self) -> &'static [FieldDefinition] {
		self.fields
	}

	pub fn field_count(&self) -> usize {
		self.fields.len()
	}

	/// Bytes per record slot, flag included
	pub fn record_size(&self) -> usize {
		self.record_size
	}

	/// Bytes before the first record slot
	pub fn header_size(&self) -> usize {
		self.header_size
	}

	/// Byte offset of the slot at `index`
	pub fn slot_offset(&self, index: usize) -> u64 {
		(self.header_size + index * self.record_size) as u64
	}

	/// Validate a full row, all or nothing
	pub fn validate_row<S: AsRef<str>>(&self, values: &[S]) -> StoreResult<Vec<String>> {
		if values.len() != self.fields.len() {
			return Err(StoreError::SchemaMismatch(format!(
				"expected {} values, got {}",
				self.fields.len(),
				values.len()
			)));
		}

		self.fields
			.iter()
			.zip(values)
			.map(|(field, value)| field.validate(value.as_ref()))
			.collect()
	}

	/// Read the header from `reader` and check it against this layout
	pub fn verify_header<R: Read>(&self, reader: &mut R) -> StoreResult<()> {
		let mut magic = [0u8; 4];
		read_header_bytes(reader, &mut magic)?;
		let magic = u32::from_be_bytes(magic);
		if magic != MAGIC {
			return Err(StoreError::SchemaMismatch(format!(
				"incorrect magic value: expected {}, found {}",
				MAGIC, magic
			)));
		}

		let mut count = [0u8; 2];
		read_header_bytes(reader, &mut count)?;
		let count = u16::from_be_bytes(count) as usize;
		if count != self.fields.len() {
			return Err(StoreError::SchemaMismatch(format!(
				"incorrect number of fields: expected {}, found {}",
				self.fields.len(),
				count
			)));
		}

		for field in self.fields {
			let mut name_len = [0u8; 1];
			read_header_bytes(reader, &mut name_len)?;

			let mut name = vec![0u8; name_len[0] as usize];
			read_header_bytes(reader, &mut name)?;
			let name = String::from_utf8_lossy(&name);
			if !field.matches_name(&name) {
				return Err(StoreError::SchemaMismatch(format!(
					"field name mismatch: expected '{}', found '{}'",
					field.name, name
				)));
			}

			let mut length = [0u8; 1];
			read_header_bytes(reader, &mut length)?;
			if length[0] as usize != field.length {
				return Err(StoreError::SchemaMismatch(format!(
					"field length mismatch for '{}': expected {}, found {}",
					field.name, field.length, length[0]
				)));
			}
		}

		Ok(())
	}

	/// Write the header for this layout
	pub fn write_header<W: Write>(&self, writer: &mut W) -> StoreResult<()> {
		let mut buf = Vec::with_capacity(self.header_size);
		buf.extend_from_slice(&MAGIC.to_be_bytes());
		buf.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
		for field in self.fields {
			let name = field.name.to_ascii_lowercase();
			buf.push(name.len() as u8);
			buf.extend_from_slice(name.as_bytes());
			buf.push(field.length as u8);
		}
		writer.write_all(&buf)?;
		Ok(())
	}

	/// Serialize one record slot
	pub fn encode_record(&self, status: RecordStatus, values: &[String]) -> StoreResult<Vec<u8>> {
		if values.len() != self.fields.len() {
			return Err(StoreError::SchemaMismatch(format!(
				"expected {} values, got {}",
				self.fields.len(),
				values.len()
			)));
		}

		let mut buf = Vec::with_capacity(self.record_size);
		buf.push(status.flag());
		for (field, value) in self.fields.iter().zip(values) {
			field.encode_into(value, &mut buf)?;
		}
		Ok(buf)
	}

	/// Parse one record slot
	pub fn decode_record(&self, bytes: &[u8]) -> StoreResult<(RecordStatus, Vec<String>)> {
		if bytes.len() != self.record_size {
			return Err(StoreError::RecordFormat(format!(
				"record slot is {} bytes, expected {}",
				bytes.len(),
				self.record_size
			)));
		}

		let status = RecordStatus::from_flag(bytes[0])?;
		let mut values = Vec::with_capacity(self.fields.len());
		let mut offset = FLAG_SIZE;
		for field in self.fields {
			values.push(field.decode(&bytes[offset..offset + field.length])?);
			offset += field.length;
		}
		Ok((status, values))
	}
}

fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8]) -> StoreResult<()> {
	match reader.read_exact(buf) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(StoreError::SchemaMismatch(
			"end of file reached while reading header".into(),
		)),
		Err(e) => Err(StoreError::Io(e)),
	}
}
