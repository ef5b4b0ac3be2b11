use std::{
  collections::HashMap,
  fs,
  path::Path,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use bytes::Bytes;
use fs2::FileExt;
use log::{error, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
  data::{
    data_file::{get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME},
    log_record::{
      decode_log_record_pos, LogRecord, LogRecordPos, LogRecordType, RecordLimits,
    },
  },
  errors::{Errors, Result},
  index::{new_indexer, Indexer},
  merge::load_merge_files,
  option::{IOManagerType, IteratorOptions, Options},
  util,
};

pub const FILE_LOCK_NAME: &str = "lock";
const INITIAL_FILE_ID: u32 = 0;

/// Storage engine statistics snapshot.
#[derive(Debug)]
pub struct Stat {
  /// Number of live keys.
  pub key_num: usize,
  /// Number of datafiles on disk, the active one included.
  pub data_file_num: usize,
  /// Bytes occupied by superseded records and tombstones, reclaimable by
  /// a merge.
  pub reclaimable_size: u64,
  /// Total bytes the database directory occupies on disk.
  pub disk_size: u64,
}

/// The storage engine: one active datafile receiving appends, any number
/// of immutable older datafiles, and an in-memory index locating the
/// newest record of every live key.
///
/// The engine is safe to share across threads. Writes serialize on the
/// active file's lock; reads only take shared locks and use positioned
/// I/O, so they proceed in parallel.
pub struct Engine {
  pub(crate) options: Arc<Options>,

  /// The datafile currently open for appending, always the highest id.
  pub(crate) active_data_file: RwLock<DataFile>,

  /// Closed, immutable datafiles by id.
  pub(crate) old_data_files: RwLock<HashMap<u32, DataFile>>,

  pub(crate) index: Box<dyn Indexer>,

  /// Held exclusively for the engine's lifetime to keep other instances
  /// out of the directory.
  file_lock: fs::File,

  /// Bytes appended since the last sync, for the `bytes_per_sync` option.
  bytes_written: AtomicUsize,

  /// Bytes occupied by records a merge would discard.
  pub(crate) reclaim_size: AtomicU64,

  pub(crate) merging_lock: Mutex<()>,

  is_closed: AtomicBool,
}

impl Engine {
  /// Opens (or creates) the database in `options.dir_path`.
  ///
  /// Takes the directory's exclusive lock, finalizes any interrupted
  /// merge, then rebuilds the index by replaying every datafile in id
  /// order. A truncated record at a file's tail is discarded as the
  /// remnant of a crashed writer; corruption anywhere else aborts with
  /// [`Errors::InvalidRecordCrc`].
  pub fn open(options: Options) -> Result<Self> {
    check_options(&options)?;

    let dir_path = options.dir_path.clone();
    if !dir_path.is_dir() {
      if let Err(e) = fs::create_dir_all(&dir_path) {
        error!("failed to create database directory: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }

    let file_lock = match fs::OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(dir_path.join(FILE_LOCK_NAME))
    {
      Ok(file) => file,
      Err(e) => {
        error!("failed to open the lock file: {}", e);
        return Err(Errors::FailedToOpenDataFile);
      }
    };
    if file_lock.try_lock_exclusive().is_err() {
      return Err(Errors::DatabaseLocked);
    }

    let limits = record_limits(&options);

    // a finished merge left by a previous instance is swapped in before
    // the directory is enumerated
    load_merge_files(&dir_path)?;

    let mut data_files = load_data_files(&dir_path, options.mmap_at_startup, limits)?;

    let active_data_file = match data_files.pop() {
      Some(data_file) => data_file,
      None => DataFile::new(
        &dir_path,
        INITIAL_FILE_ID,
        IOManagerType::StandardFileIO,
        limits,
      )?,
    };
    let mut old_data_files = HashMap::new();
    for data_file in data_files {
      old_data_files.insert(data_file.get_file_id(), data_file);
    }

    let engine = Engine {
      index: new_indexer(&options.index_type),
      options: Arc::new(options),
      active_data_file: RwLock::new(active_data_file),
      old_data_files: RwLock::new(old_data_files),
      file_lock,
      bytes_written: AtomicUsize::new(0),
      reclaim_size: AtomicU64::new(0),
      merging_lock: Mutex::new(()),
      is_closed: AtomicBool::new(false),
    };

    engine.load_index()?;

    if engine.options.mmap_at_startup {
      engine.reset_io_type()?;
    }

    Ok(engine)
  }

  /// Stores `value` under `key`, replacing any previous value.
  pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
    self.check_open()?;
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    if key.len() > self.options.max_key_size {
      return Err(Errors::KeyTooLarge);
    }
    if value.len() > self.options.max_value_size {
      return Err(Errors::ValueTooLarge);
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: value.to_vec(),
      rec_type: LogRecordType::Normal,
      timestamp: util::now_millis(),
    };

    // the index update happens under the same writer lock as the append,
    // totally ordering concurrent mutations of the same key
    let mut active_file = self.active_data_file.write();
    let pos = self.append_to_active(&mut active_file, &record)?;
    if let Some(old_pos) = self.index.put(key.to_vec(), pos) {
      self
        .reclaim_size
        .fetch_add(old_pos.size as u64, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Fetches the current value of `key`.
  pub fn get(&self, key: Bytes) -> Result<Bytes> {
    self.check_open()?;
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }

    let pos = self.index.get(key.to_vec()).ok_or(Errors::KeyNotFound)?;
    self.get_value_by_position(&pos)
  }

  /// Whether `key` currently exists. Index only, no disk access.
  pub fn has(&self, key: Bytes) -> Result<bool> {
    self.check_open()?;
    Ok(self.index.get(key.to_vec()).is_some())
  }

  /// Removes `key`. Deleting an absent key is a successful no-op; an
  /// existing key gets a durable tombstone appended before it leaves the
  /// index.
  pub fn delete(&self, key: Bytes) -> Result<()> {
    self.check_open()?;
    if key.is_empty() {
      return Err(Errors::KeyIsEmpty);
    }
    if self.index.get(key.to_vec()).is_none() {
      return Ok(());
    }

    let record = LogRecord {
      key: key.to_vec(),
      value: Vec::new(),
      rec_type: LogRecordType::Deleted,
      timestamp: util::now_millis(),
    };

    let mut active_file = self.active_data_file.write();
    let pos = self.append_to_active(&mut active_file, &record)?;
    // the tombstone is dead weight the moment it lands
    self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
    if let Some(old_pos) = self.index.delete(key.to_vec()) {
      self
        .reclaim_size
        .fetch_add(old_pos.size as u64, Ordering::SeqCst);
    }
    Ok(())
  }

  /// Number of live keys.
  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// A snapshot of every live key, each exactly once, in no particular
  /// order guarantee beyond the backing index's.
  pub fn keys(&self) -> Result<Vec<Bytes>> {
    self.check_open()?;
    self.index.list_keys()
  }

  /// Invokes `f` with every live key; the first error `f` returns aborts
  /// the walk and is propagated unchanged.
  pub fn fold<F>(&self, mut f: F) -> Result<()>
  where
    F: FnMut(Bytes) -> Result<()>,
  {
    self.check_open()?;
    for key in self.index.list_keys()? {
      f(key)?;
    }
    Ok(())
  }

  /// Invokes `f` with every live key beginning with `prefix`; errors from
  /// `f` abort the scan and propagate.
  pub fn scan<F>(&self, prefix: Bytes, mut f: F) -> Result<()>
  where
    F: FnMut(Bytes) -> Result<()>,
  {
    self.check_open()?;
    let mut index_iter = self.index.iterator(IteratorOptions {
      prefix: prefix.to_vec(),
      reverse: false,
    });
    while let Some((key, _)) = index_iter.next() {
      f(Bytes::copy_from_slice(key))?;
    }
    Ok(())
  }

  /// Flushes the active datafile to durable storage.
  pub fn sync(&self) -> Result<()> {
    self.check_open()?;
    self.active_data_file.read().sync()
  }

  /// Syncs, releases the directory lock and marks the engine closed. A
  /// second close is a no-op; every other operation fails afterwards.
  pub fn close(&self) -> Result<()> {
    if self.is_closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }

    self.active_data_file.read().sync()?;
    if let Err(e) = self.file_lock.unlock() {
      error!("failed to unlock the database directory: {}", e);
      return Err(Errors::FailedToUnlockDatabaseDir);
    }
    Ok(())
  }

  /// Point-in-time statistics.
  pub fn stat(&self) -> Result<Stat> {
    self.check_open()?;
    let old_files = self.old_data_files.read();
    Ok(Stat {
      key_num: self.index.len(),
      data_file_num: old_files.len() + 1,
      reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
      disk_size: util::file::dir_disk_size(&self.options.dir_path),
    })
  }

  fn check_open(&self) -> Result<()> {
    if self.is_closed.load(Ordering::SeqCst) {
      return Err(Errors::DatabaseClosed);
    }
    Ok(())
  }

  pub(crate) fn record_limits(&self) -> RecordLimits {
    record_limits(&self.options)
  }

  /// Appends an already-built record, taking the writer lock itself.
  pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
    let mut active_file = self.active_data_file.write();
    self.append_to_active(&mut active_file, record)
  }

  /// Appends `record` to the active file the caller has locked, syncing
  /// and rotating as configured. Returns the record's locator.
  fn append_to_active(
    &self,
    active_file: &mut DataFile,
    record: &LogRecord,
  ) -> Result<LogRecordPos> {
    let enc_record = record.encode();
    let write_off = active_file.get_write_off();
    active_file.write(&enc_record)?;

    let written = self
      .bytes_written
      .fetch_add(enc_record.len(), Ordering::SeqCst)
      + enc_record.len();
    let need_sync = self.options.sync_writes
      || (self.options.bytes_per_sync > 0 && written >= self.options.bytes_per_sync);
    if need_sync {
      active_file.sync()?;
      self.bytes_written.store(0, Ordering::SeqCst);
    }

    let file_id = active_file.get_file_id();
    if active_file.get_write_off() >= self.options.data_file_size {
      active_file.sync()?;
      let new_file = DataFile::new(
        &self.options.dir_path,
        file_id + 1,
        IOManagerType::StandardFileIO,
        self.record_limits(),
      )?;
      let rotated = std::mem::replace(active_file, new_file);
      self.old_data_files.write().insert(file_id, rotated);
    }

    Ok(LogRecordPos {
      file_id,
      offset: write_off,
      size: enc_record.len() as u32,
      timestamp: record.timestamp,
    })
  }

  /// Reads the record a locator points at and returns its value.
  pub(crate) fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Bytes> {
    let active_file = self.active_data_file.read();
    let read_rec = if active_file.get_file_id() == pos.file_id {
      active_file.read_log_record(pos.offset)?
    } else {
      let old_files = self.old_data_files.read();
      match old_files.get(&pos.file_id) {
        Some(data_file) => data_file.read_log_record(pos.offset)?,
        None => return Err(Errors::DataFileNotFound),
      }
    };

    if read_rec.record.rec_type == LogRecordType::Deleted {
      return Err(Errors::KeyNotFound);
    }
    Ok(read_rec.record.value.into())
  }

  pub(crate) fn is_engine_empty(&self) -> bool {
    let active_file = self.active_data_file.read();
    let old_files = self.old_data_files.read();
    active_file.get_write_off() == 0 && old_files.is_empty()
  }

  /// Rebuilds the index from the hint file (when a finished merge left
  /// one) and the datafiles.
  fn load_index(&self) -> Result<()> {
    let non_merge_file_id = self.get_non_merge_file_id();

    let mut hint_covers_merged_files = false;
    if non_merge_file_id.is_some() && self.options.dir_path.join(HINT_FILE_NAME).is_file() {
      match self.load_index_from_hint_file() {
        Ok(()) => hint_covers_merged_files = true,
        Err(e) => {
          // a bad hint only costs startup time, the datafiles are the
          // source of truth
          warn!("hint file unusable ({}), falling back to a full scan", e);
        }
      }
    }

    let skip_below = if hint_covers_merged_files {
      non_merge_file_id
    } else {
      None
    };
    self.load_index_from_data_files(skip_below)
  }

  /// File ids below the returned id were rewritten by the last finished
  /// merge and are fully described by the hint file. An unreadable
  /// marker just forfeits the hint shortcut.
  fn get_non_merge_file_id(&self) -> Option<u32> {
    use crate::data::data_file::MERGE_FINISHED_FILE_NAME;
    let marker = self.options.dir_path.join(MERGE_FINISHED_FILE_NAME);
    if !marker.is_file() {
      return None;
    }
    crate::merge::read_non_merge_file_id(&self.options.dir_path)
  }

  fn load_index_from_hint_file(&self) -> Result<()> {
    let hint_file = DataFile::new_hint_file(&self.options.dir_path, self.record_limits())?;
    let mut offset = 0;
    loop {
      match hint_file.read_log_record(offset) {
        Ok(read_rec) => {
          let pos = decode_log_record_pos(&read_rec.record.value);
          self.index.put(read_rec.record.key, pos);
          offset += read_rec.size;
        }
        Err(Errors::ReadDataFileEOF) => break,
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  fn load_index_from_data_files(&self, skip_below: Option<u32>) -> Result<()> {
    let old_files = self.old_data_files.read();
    let mut file_ids: Vec<u32> = old_files.keys().copied().collect();
    file_ids.sort();

    for file_id in file_ids {
      if let Some(non_merge_file_id) = skip_below {
        if file_id < non_merge_file_id {
          continue;
        }
      }
      if let Some(data_file) = old_files.get(&file_id) {
        self.replay_data_file(data_file, false)?;
      }
    }

    let active_file = self.active_data_file.read();
    let tail = self.replay_data_file(&active_file, true)?;
    if tail < active_file.file_size() {
      // the active file is opened in append mode, so the torn tail has
      // to go or the next record would land past the recovered offset
      self.truncate_active_tail(active_file.get_file_id(), tail)?;
    }
    active_file.set_write_off(tail);
    Ok(())
  }

  fn truncate_active_tail(&self, file_id: u32, tail: u64) -> Result<()> {
    let path = get_data_file_name(&self.options.dir_path, file_id);
    let file = fs::OpenOptions::new().write(true).open(&path).map_err(|e| {
      error!("failed to reopen the active file for truncation: {}", e);
      Errors::FailedToOpenDataFile
    })?;
    file.set_len(tail).map_err(|e| {
      error!("failed to truncate the active file: {}", e);
      Errors::FailedToWriteToDataFile
    })
  }

  /// Replays one datafile into the index and returns the offset of the
  /// first byte past the last intact record.
  ///
  /// Only the active file may legitimately end in damage (the write a
  /// crash interrupted), so bad bytes there are cut off while the same
  /// finding in an immutable file aborts the open.
  fn replay_data_file(&self, data_file: &DataFile, is_active: bool) -> Result<u64> {
    let file_id = data_file.get_file_id();
    let mut offset = 0u64;
    loop {
      match data_file.read_log_record(offset) {
        Ok(read_rec) => {
          let size = read_rec.size;
          let pos = LogRecordPos {
            file_id,
            offset,
            size: size as u32,
            timestamp: read_rec.record.timestamp,
          };
          match read_rec.record.rec_type {
            LogRecordType::Normal => {
              if let Some(old_pos) = self.index.put(read_rec.record.key, pos) {
                self
                  .reclaim_size
                  .fetch_add(old_pos.size as u64, Ordering::SeqCst);
              }
            }
            LogRecordType::Deleted => {
              if let Some(old_pos) = self.index.delete(read_rec.record.key) {
                self
                  .reclaim_size
                  .fetch_add(old_pos.size as u64, Ordering::SeqCst);
              }
              self.reclaim_size.fetch_add(size, Ordering::SeqCst);
            }
          }
          offset += size;
        }
        Err(Errors::ReadDataFileEOF) => break,
        Err(Errors::TruncatedRecord) => {
          warn!(
            "discarding truncated record at the tail of data file {}, offset {}",
            file_id, offset
          );
          break;
        }
        Err(Errors::InvalidRecordCrc) if is_active => {
          warn!(
            "discarding corrupt record at the tail of the active data file {}, offset {}",
            file_id, offset
          );
          break;
        }
        Err(e) => return Err(e),
      }
    }
    Ok(offset)
  }

  /// Swaps the startup memory maps for standard file handles so the
  /// active file can take appends.
  fn reset_io_type(&self) -> Result<()> {
    let limits = self.record_limits();

    let mut active_file = self.active_data_file.write();
    let write_off = active_file.get_write_off();
    let new_active = DataFile::new(
      &self.options.dir_path,
      active_file.get_file_id(),
      IOManagerType::StandardFileIO,
      limits,
    )?;
    new_active.set_write_off(write_off);
    *active_file = new_active;

    let mut old_files = self.old_data_files.write();
    let file_ids: Vec<u32> = old_files.keys().copied().collect();
    for file_id in file_ids {
      let data_file = DataFile::new(
        &self.options.dir_path,
        file_id,
        IOManagerType::StandardFileIO,
        limits,
      )?;
      old_files.insert(file_id, data_file);
    }
    Ok(())
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      error!("error while closing the engine: {}", e);
    }
  }
}

fn check_options(options: &Options) -> Result<()> {
  if options.dir_path.as_os_str().is_empty() {
    return Err(Errors::DirPathIsEmpty);
  }
  if options.data_file_size == 0 {
    return Err(Errors::DataFileSizeTooSmall);
  }
  Ok(())
}

/// Decode-time bounds derived from the configured maximums. The value
/// bound stays clear of the tombstone sentinel.
fn record_limits(options: &Options) -> RecordLimits {
  RecordLimits {
    max_key_size: options.max_key_size.min(u32::MAX as usize) as u32,
    max_value_size: options.max_value_size.min((u32::MAX - 1) as usize) as u32,
  }
}

fn load_data_files<P>(dir_path: P, use_mmap: bool, limits: RecordLimits) -> Result<Vec<DataFile>>
where
  P: AsRef<Path>,
{
  let dir = match fs::read_dir(&dir_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read the database directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut file_ids = Vec::new();
  for entry in dir.flatten() {
    let file_os_str = entry.file_name();
    let file_name = file_os_str.to_string_lossy();
    if let Some(stem) = file_name.strip_suffix(DATA_FILE_NAME_SUFFIX) {
      let file_id = stem
        .parse::<u32>()
        .map_err(|_| Errors::DataDirectoryCorrupted)?;
      file_ids.push(file_id);
    }
  }
  file_ids.sort();

  let io_type = if use_mmap {
    IOManagerType::MemoryMap
  } else {
    IOManagerType::StandardFileIO
  };
  let mut data_files = Vec::new();
  for file_id in file_ids {
    data_files.push(DataFile::new(&dir_path, file_id, io_type, limits)?);
  }
  Ok(data_files)
}
