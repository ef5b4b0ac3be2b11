use bytes::{Buf, BufMut, BytesMut};

/// Fixed-width record header: crc32 + timestamp + key_size + value_size.
pub const RECORD_HEADER_SIZE: usize = 4 + 8 + 4 + 4;

/// Wire sentinel for a deletion record. A tombstone carries no value
/// bytes, so zero-length values remain representable.
pub const TOMBSTONE_VALUE_SIZE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
  Normal,

  Deleted,
}

/// One entry of the append-only log, as held in memory. On disk a record
/// is laid out little-endian with no padding:
///
/// ```text
/// | crc: u32 | timestamp: u64 | key_size: u32 | value_size: u32 | key | value |
/// ```
///
/// The crc is CRC-32 (IEEE) over every byte that follows it. Deletions
/// are encoded with `value_size == u32::MAX` and an empty value.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
  pub key: Vec<u8>,
  pub value: Vec<u8>,
  pub rec_type: LogRecordType,
  pub timestamp: u64,
}

impl LogRecord {
  /// Serializes the record into its wire form.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(self.encoded_len());
    buf.put_u32_le(0); // crc, patched once the rest is in place
    buf.put_u64_le(self.timestamp);
    buf.put_u32_le(self.key.len() as u32);
    match self.rec_type {
      LogRecordType::Normal => buf.put_u32_le(self.value.len() as u32),
      LogRecordType::Deleted => buf.put_u32_le(TOMBSTONE_VALUE_SIZE),
    }
    buf.put_slice(&self.key);
    if self.rec_type == LogRecordType::Normal {
      buf.put_slice(&self.value);
    }

    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf.to_vec()
  }

  pub fn encoded_len(&self) -> usize {
    let value_len = match self.rec_type {
      LogRecordType::Normal => self.value.len(),
      LogRecordType::Deleted => 0,
    };
    RECORD_HEADER_SIZE + self.key.len() + value_len
  }
}

/// The decoded fixed-width prefix of a record.
pub struct RecordHeader {
  pub crc: u32,
  pub timestamp: u64,
  pub key_size: u32,
  pub value_size: u32,
}

impl RecordHeader {
  /// `buf` must hold exactly [`RECORD_HEADER_SIZE`] bytes.
  pub fn decode(mut buf: &[u8]) -> Self {
    RecordHeader {
      crc: buf.get_u32_le(),
      timestamp: buf.get_u64_le(),
      key_size: buf.get_u32_le(),
      value_size: buf.get_u32_le(),
    }
  }

  pub fn is_tombstone(&self) -> bool {
    self.value_size == TOMBSTONE_VALUE_SIZE
  }
}

/// Decode-time upper bounds on the declared sizes; anything larger is
/// treated as corruption rather than attempted as an allocation.
#[derive(Debug, Clone, Copy)]
pub struct RecordLimits {
  pub max_key_size: u32,
  pub max_value_size: u32,
}

/// Record read back from disk along with its total on-disk size, which
/// the recovery scan uses to advance to the next record.
pub struct ReadLogRecord {
  pub record: LogRecord,
  pub size: u64,
}

/// Locates one record: the owning file, the record's start offset, its
/// total size, and the write timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
  pub file_id: u32,
  pub offset: u64,
  pub size: u32,
  pub timestamp: u64,
}

const LOG_RECORD_POS_SIZE: usize = 4 + 8 + 4 + 8;

impl LogRecordPos {
  /// Serializes the locator for storage in a hint file record's value.
  pub fn encode(&self) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(LOG_RECORD_POS_SIZE);
    buf.put_u32_le(self.file_id);
    buf.put_u64_le(self.offset);
    buf.put_u32_le(self.size);
    buf.put_u64_le(self.timestamp);
    buf.to_vec()
  }
}

pub fn decode_log_record_pos(mut buf: &[u8]) -> LogRecordPos {
  LogRecordPos {
    file_id: buf.get_u32_le(),
    offset: buf.get_u64_le(),
    size: buf.get_u32_le(),
    timestamp: buf.get_u64_le(),
  }
}
