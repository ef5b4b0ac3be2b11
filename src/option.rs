use lazy_static::lazy_static;
use std::path::PathBuf;

lazy_static! {
  pub static ref DEFAULT_DIR_PATH: PathBuf = std::env::temp_dir().join("barrel");
}

/// Engine configuration, passed to [`crate::db::Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
  pub dir_path: PathBuf,

  /// Rotate the active datafile once its size reaches this threshold.
  pub data_file_size: u64,

  /// Reject `put` with a key longer than this.
  pub max_key_size: usize,

  /// Reject `put` with a value longer than this.
  pub max_value_size: usize,

  /// Fsync the active datafile after every write.
  pub sync_writes: bool,

  /// Fsync once this many bytes have accumulated since the last sync.
  /// Zero disables the byte-counted sync.
  pub bytes_per_sync: usize,

  pub index_type: IndexType,

  /// Scan existing datafiles through read-only memory maps on open.
  pub mmap_at_startup: bool,

  /// Fraction of dead bytes in the directory required before a
  /// non-forced merge is allowed to run.
  pub file_merge_threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexType {
  BTree,

  SkipList,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      dir_path: DEFAULT_DIR_PATH.clone(),
      data_file_size: 64 * 1024 * 1024, // 64MB
      max_key_size: 64,
      max_value_size: 64 * 1024, // 64KB
      sync_writes: false,
      bytes_per_sync: 0,
      index_type: IndexType::BTree,
      mmap_at_startup: true,
      file_merge_threshold: 0.6,
    }
  }
}

pub struct IteratorOptions {
  pub prefix: Vec<u8>,
  pub reverse: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for IteratorOptions {
  fn default() -> Self {
    Self {
      prefix: Default::default(),
      reverse: false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IOManagerType {
  StandardFileIO,

  MemoryMap,
}
