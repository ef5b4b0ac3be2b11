use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::{
  errors::{Errors, Result},
  fio::{new_io_manager, IOManager},
  option::IOManagerType,
};

use super::log_record::{
  LogRecord, LogRecordPos, LogRecordType, ReadLogRecord, RecordHeader, RecordLimits,
  RECORD_HEADER_SIZE,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "index.hint";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge.finished";

/// One append-only file of records. The engine keeps a single writable
/// `DataFile` (the active one, highest id) and a read-only `DataFile` per
/// closed file. Hint files and the merge-finished marker reuse the same
/// record format under dedicated names.
pub struct DataFile {
  file_id: u32,
  write_off: RwLock<u64>,
  io_manager: Box<dyn IOManager>,
  limits: RecordLimits,
}

/// `<dir>/000000042.data` for file id 42.
pub fn get_data_file_name<P>(dir_path: P, file_id: u32) -> PathBuf
where
  P: AsRef<Path>,
{
  dir_path
    .as_ref()
    .join(format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX))
}

impl DataFile {
  pub fn new<P>(
    dir_path: P,
    file_id: u32,
    io_type: IOManagerType,
    limits: RecordLimits,
  ) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = get_data_file_name(dir_path, file_id);
    let io_manager = new_io_manager(file_name, io_type)?;
    Ok(DataFile {
      file_id,
      write_off: RwLock::new(0),
      io_manager,
      limits,
    })
  }

  pub fn new_hint_file<P>(dir_path: P, limits: RecordLimits) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(HINT_FILE_NAME);
    let io_manager = new_io_manager(file_name, IOManagerType::StandardFileIO)?;
    Ok(DataFile {
      file_id: 0,
      write_off: RwLock::new(0),
      io_manager,
      limits,
    })
  }

  pub fn new_merge_fin_file<P>(dir_path: P) -> Result<DataFile>
  where
    P: AsRef<Path>,
  {
    let file_name = dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME);
    let io_manager = new_io_manager(file_name, IOManagerType::StandardFileIO)?;
    Ok(DataFile {
      file_id: 0,
      write_off: RwLock::new(0),
      io_manager,
      limits: RecordLimits {
        max_key_size: 64,
        max_value_size: 64,
      },
    })
  }

  pub fn get_file_id(&self) -> u32 {
    self.file_id
  }

  pub fn get_write_off(&self) -> u64 {
    *self.write_off.read()
  }

  pub fn set_write_off(&self, offset: u64) {
    *self.write_off.write() = offset;
  }

  pub fn file_size(&self) -> u64 {
    self.io_manager.size()
  }

  /// Appends raw encoded bytes and advances the write offset.
  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    let n_bytes = self.io_manager.write(buf)?;
    *self.write_off.write() += n_bytes as u64;
    Ok(n_bytes)
  }

  /// Appends a hint record mapping `key` to the locator of its data
  /// record in the merged output.
  pub fn write_hint_record(&self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
    let hint_record = LogRecord {
      key,
      value: pos.encode(),
      rec_type: LogRecordType::Normal,
      timestamp: pos.timestamp,
    };
    self.write(&hint_record.encode())?;
    Ok(())
  }

  /// Reads and verifies the record starting at `offset`.
  ///
  /// Distinguishes three non-success outcomes: `ReadDataFileEOF` when
  /// `offset` sits exactly at the end of the file, `TruncatedRecord` when
  /// the record's declared extent runs past the end (the tail left by a
  /// writer that crashed mid-append), and `InvalidRecordCrc` when the
  /// bytes are all present but fail validation.
  pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
    let file_size = self.io_manager.size();
    if offset >= file_size {
      return Err(Errors::ReadDataFileEOF);
    }
    if offset + RECORD_HEADER_SIZE as u64 > file_size {
      return Err(Errors::TruncatedRecord);
    }

    let mut header_buf = vec![0u8; RECORD_HEADER_SIZE];
    self.io_manager.read(&mut header_buf, offset)?;
    let header = RecordHeader::decode(&header_buf);

    if header.key_size == 0 || header.key_size > self.limits.max_key_size {
      return Err(Errors::InvalidRecordCrc);
    }
    let value_size = if header.is_tombstone() {
      0
    } else {
      if header.value_size > self.limits.max_value_size {
        return Err(Errors::InvalidRecordCrc);
      }
      header.value_size
    };

    let total_size = RECORD_HEADER_SIZE as u64 + header.key_size as u64 + value_size as u64;
    if offset + total_size > file_size {
      return Err(Errors::TruncatedRecord);
    }

    let mut payload = vec![0u8; header.key_size as usize + value_size as usize];
    self
      .io_manager
      .read(&mut payload, offset + RECORD_HEADER_SIZE as u64)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header_buf[4..]);
    hasher.update(&payload);
    if hasher.finalize() != header.crc {
      return Err(Errors::InvalidRecordCrc);
    }

    let value = payload.split_off(header.key_size as usize);
    let record = LogRecord {
      key: payload,
      value,
      rec_type: if header.is_tombstone() {
        LogRecordType::Deleted
      } else {
        LogRecordType::Normal
      },
      timestamp: header.timestamp,
    };

    Ok(ReadLogRecord {
      record,
      size: total_size,
    })
  }

  pub fn sync(&self) -> Result<()> {
    self.io_manager.sync()
  }
}
