//! The store: record cache, id index and selective write-back

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::id::{IdGenerator, LockCookie, RecordId};
use crate::storage::record::{Record, RecordImage, RecordStatus};
use crate::storage::schema::Schema;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view of one slot, for dumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
	pub id: RecordId,
	pub status: RecordStatus,
	pub dirty: bool,
	pub values: Vec<String>,
}

impl fmt::Display for RecordView {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let dirty = if self.dirty { '*' } else { ' ' };
		let status = match self.status {
			RecordStatus::Valid => 'V',
			RecordStatus::Deleted => 'D',
		};
		write!(f, "{}{} {:>5}", dirty, status, self.id.0)?;
		for (field, value) in Schema::builtin().fields().iter().zip(&self.values) {
			write!(f, " {:<width$}", value, width = field.length)?;
		}
		Ok(())
	}
}

/// Records in load order plus the id lookup built from them
struct Loaded {
	records: Vec<Arc<Record>>,
	index: BTreeMap<RecordId, Arc<Record>>,
}

/// Single-file fixed-schema record store shared by many threads.
///
/// Records are cached in full. Every slot stays at its physical position for
/// the lifetime of the cache, so write-back can address each record by its
/// index in `records`. Deleted records keep their slot as a tombstone.
///
/// Lock order: `records` before `index`.
pub struct Store {
	path: PathBuf,
	config: StoreConfig,
	schema: &'static Schema,
	records: Mutex<Vec<Arc<Record>>>,
	index: RwLock<BTreeMap<RecordId, Arc<Record>>>,
	record_numbers: IdGenerator,
	lock_cookies: IdGenerator,
	closed: AtomicBool,
}

impl Store {
	/// Open and load an existing store file
	pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
		Self::open_with_config(path, StoreConfig::default())
	}

	pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> StoreResult<Self> {
		let store = Self {
			path: path.as_ref().to_path_buf(),
			schema: Schema::builtin(),
			records: Mutex::new(Vec::new()),
			index: RwLock::new(BTreeMap::new()),
			record_numbers: IdGenerator::starting_at(config.first_record_number as u64),
			lock_cookies: IdGenerator::starting_at(config.first_lock_cookie),
			closed: AtomicBool::new(false),
			config,
		};
		store.load()?;
		Ok(store)
	}

	/// Create a store file holding only the header. Fails if `path` exists.
	pub fn create_file<P: AsRef<Path>>(path: P) -> StoreResult<()> {
		let mut file = OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(path.as_ref())?;
		Schema::builtin().write_header(&mut file)?;
		file.sync_all()?;

		tracing::info!("Created empty store at {}", path.as_ref().display());
		Ok(())
	}

	/// Drop the cache and load the file again.
	///
	/// On failure the current cache is kept. Record numbers keep counting up
	/// from where they were. Old records are detached before the lists are
	/// released: blocked callers are interrupted, and a change made to an old
	/// record but not yet written fails with `Interrupted`.
	pub fn reload(&self) -> StoreResult<()> {
		let mut records = self.records.lock();
		let loaded = self.read_file()?;
		let mut index = self.index.write();

		let old = std::mem::replace(&mut *records, loaded.records);
		*index = loaded.index;
		for record in &old {
			record.detach();
		}
		Ok(())
	}

	fn load(&self) -> StoreResult<()> {
		let loaded = self.read_file()?;
		let mut records = self.records.lock();
		let mut index = self.index.write();
		*records = loaded.records;
		*index = loaded.index;
		Ok(())
	}

	fn read_file(&self) -> StoreResult<Loaded> {
		let file = File::open(&self.path)?;
		let mut reader = BufReader::new(file);
		self.schema.verify_header(&mut reader)?;

		let mut body = Vec::new();
		reader.read_to_end(&mut body)?;

		let record_size = self.schema.record_size();
		if body.len() % record_size != 0 {
			return Err(StoreError::RecordFormat(format!(
				"{} trailing bytes after the last complete record",
				body.len() % record_size
			)));
		}

		// Decode everything before numbering so a bad slot burns no ids
		let rows = body
			.chunks(record_size)
			.map(|slot| self.schema.decode_record(slot))
			.collect::<StoreResult<Vec<_>>>()?;

		let mut records = Vec::with_capacity(rows.len());
		let mut index = BTreeMap::new();
		for (status, values) in rows {
			let id = self.record_numbers.next_record_id()?;
			let record = Arc::new(Record::loaded(id, status, values));
			if status == RecordStatus::Valid {
				index.insert(id, Arc::clone(&record));
			}
			records.push(record);
		}

		tracing::info!(
			"Loaded {} records ({} live) from {}",
			records.len(),
			index.len(),
			self.path.display()
		);
		Ok(Loaded { records, index })
	}

	fn resolve(&self, id: RecordId) -> StoreResult<Arc<Record>> {
		self.index
			.read()
			.get(&id)
			.cloned()
			.ok_or(StoreError::RecordNotFound(id))
	}

	/// Current values of a live record
	pub fn read(&self, id: RecordId) -> StoreResult<Vec<String>> {
		let record = self.resolve(id)?;
		if record.is_deleted() {
			return Err(StoreError::RecordNotFound(id));
		}
		Ok(record.values())
	}

	/// Ids of live records matching every non-empty criterion as a
	/// case-insensitive prefix, ascending. Missing trailing criteria match
	/// anything.
	pub fn find<S: AsRef<str>>(&self, criteria: &[S]) -> StoreResult<Vec<RecordId>> {
		if criteria.len() > self.schema.field_count() {
			return Err(StoreError::SchemaMismatch(format!(
				"expected at most {} criteria, got {}",
				self.schema.field_count(),
				criteria.len()
			)));
		}

		let candidates: Vec<Arc<Record>> = self.index.read().values().cloned().collect();
		Ok(candidates
			.iter()
			.filter(|record| record.matches(criteria))
			.map(|record| record.id())
			.collect())
	}

	/// Lock a record, blocking while another caller owns it
	pub fn lock(&self, id: RecordId) -> StoreResult<LockCookie> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(StoreError::Interrupted(id));
		}
		let record = self.resolve(id)?;
		let cookie = self.lock_cookies.next_cookie();
		record.lock(cookie)?;
		Ok(cookie)
	}

	/// Release a lock. Also releases a tombstone still held by the cookie that
	/// deleted it.
	pub fn unlock(&self, id: RecordId, cookie: LockCookie) -> StoreResult<()> {
		match self.resolve(id) {
			Ok(record) => record.unlock(cookie),
			Err(_) => self.slot_record(&self.records.lock(), id)?.unlock(cookie),
		}
	}

	/// Any record still in the list, tombstones included
	fn slot_record(&self, records: &[Arc<Record>], id: RecordId) -> StoreResult<Arc<Record>> {
		// Ids are handed out in list order
		records
			.binary_search_by_key(&id, |record| record.id())
			.map(|slot| Arc::clone(&records[slot]))
			.map_err(|_| StoreError::RecordNotFound(id))
	}

	/// Replace every value of a locked record and write it back
	pub fn update<S: AsRef<str>>(
		&self,
		id: RecordId,
		values: &[S],
		cookie: LockCookie,
	) -> StoreResult<()> {
		let record = self.resolve(id)?;
		record.update(self.schema, cookie, values)?;

		let records = self.records.lock();
		if record.is_detached() {
			tracing::warn!("Update of record {} dropped by a concurrent reload", id);
			return Err(StoreError::Interrupted(id));
		}
		self.write_records(&records)
	}

	/// Tombstone a locked record. Its slot stays, its id stops resolving.
	pub fn delete(&self, id: RecordId, cookie: LockCookie) -> StoreResult<()> {
		{
			let _records = self.records.lock();
			let mut index = self.index.write();
			let record = index
				.get(&id)
				.cloned()
				.ok_or(StoreError::RecordNotFound(id))?;
			record.mark_deleted(cookie)?;
			index.remove(&id);
		}

		tracing::debug!("Record {} deleted", id);
		self.write_back()
	}

	/// Revive a record deleted with `cookie`, before that cookie unlocks it.
	/// The id resolves again and the slot is rewritten as valid.
	pub fn restore(&self, id: RecordId, cookie: LockCookie) -> StoreResult<()> {
		{
			let records = self.records.lock();
			let record = self.slot_record(&records, id)?;
			let mut index = self.index.write();
			record.mark_valid(cookie)?;
			index.insert(id, record);
		}

		tracing::debug!("Record {} restored", id);
		self.write_back()
	}

	/// Append a new valid record and write it back
	pub fn create<S: AsRef<str>>(&self, values: &[S]) -> StoreResult<RecordId> {
		let values = self.schema.validate_row(values)?;

		let id = {
			let mut records = self.records.lock();
			let id = self.record_numbers.next_record_id()?;
			let record = Arc::new(Record::created(id, values));
			records.push(Arc::clone(&record));
			self.index.write().insert(id, record);
			id
		};

		tracing::debug!("Record {} created", id);
		self.write_back()?;
		Ok(id)
	}

	/// Write every dirty record back to the file
	pub fn flush(&self) -> StoreResult<()> {
		self.write_back()
	}

	/// Overwrite the slots of dirty records, skipping clean ones.
	///
	/// Slots past the current end of file are appended. The pass holds the
	/// record list so no record is added while slots are being addressed.
	fn write_back(&self) -> StoreResult<()> {
		let records = self.records.lock();
		self.write_records(&records)
	}

	fn write_records(&self, records: &[Arc<Record>]) -> StoreResult<()> {
		let dirty: Vec<(usize, &Arc<Record>, RecordImage)> = records
			.iter()
			.enumerate()
			.filter_map(|(slot, record)| record.dirty_image().map(|image| (slot, record, image)))
			.collect();
		if dirty.is_empty() {
			return Ok(());
		}

		let result = self.write_slots(&dirty);
		if let Err(e) = &result {
			tracing::warn!("Write-back to {} failed: {}", self.path.display(), e);
			return result;
		}

		for (_, record, image) in &dirty {
			record.mark_flushed(image.revision);
		}
		tracing::info!("Wrote {} dirty record(s) to {}", dirty.len(), self.path.display());
		Ok(())
	}

	fn write_slots(&self, dirty: &[(usize, &Arc<Record>, RecordImage)]) -> StoreResult<()> {
		let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
		self.schema.verify_header(&mut file)?;

		for (slot, _, image) in dirty {
			let bytes = self.schema.encode_record(image.status, &image.values)?;
			file.seek(SeekFrom::Start(self.schema.slot_offset(*slot)))?;
			file.write_all(&bytes)?;
		}

		if self.config.sync_on_write {
			file.sync_all()?;
		} else {
			file.flush()?;
		}
		Ok(())
	}

	/// Interrupt every blocked `lock` call and refuse new ones
	pub fn shutdown(&self) {
		self.closed.store(true, Ordering::SeqCst);
		for record in self.records.lock().iter() {
			record.interrupt();
		}
		tracing::info!("Store at {} shut down", self.path.display());
	}

	/// Physical slots, tombstones and unsaved appends included
	pub fn record_count(&self) -> usize {
		self.records.lock().len()
	}

	/// Ids that currently resolve
	pub fn live_count(&self) -> usize {
		self.index.read().len()
	}

	pub fn is_locked(&self, id: RecordId) -> StoreResult<bool> {
		Ok(self.resolve(id)?.is_locked())
	}

	/// Every slot in physical order
	pub fn snapshot(&self) -> Vec<RecordView> {
		self.records
			.lock()
			.iter()
			.map(|record| RecordView {
				id: record.id(),
				status: record.status(),
				dirty: record.is_dirty(),
				values: record.values(),
			})
			.collect()
	}

	pub fn schema(&self) -> &'static Schema {
		self.schema
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}
