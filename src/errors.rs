use thiserror::Error;

/// Every failure the engine can report. Variants carry no payload so tests
/// and callers can compare them by identity; the underlying OS error, when
/// there is one, is logged at the failure site.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errors {
  #[error("the key is empty")]
  KeyIsEmpty,

  #[error("key not found in database")]
  KeyNotFound,

  #[error("key exceeds the configured maximum key size")]
  KeyTooLarge,

  #[error("value exceeds the configured maximum value size")]
  ValueTooLarge,

  #[error("the database directory is locked by another instance")]
  DatabaseLocked,

  #[error("the database has been closed")]
  DatabaseClosed,

  #[error("invalid crc value, log record maybe corrupted")]
  InvalidRecordCrc,

  #[error("read data file eof")]
  ReadDataFileEOF,

  #[error("record is truncated at the end of the data file")]
  TruncatedRecord,

  #[error("data file is not found in database")]
  DataFileNotFound,

  #[error("database dir path can not be empty")]
  DirPathIsEmpty,

  #[error("database data file size must be greater than 0")]
  DataFileSizeTooSmall,

  #[error("failed to create the database directory")]
  FailedToCreateDatabaseDir,

  #[error("failed to read the database directory")]
  FailedToReadDatabaseDir,

  #[error("the database directory contains unexpected files")]
  DataDirectoryCorrupted,

  #[error("failed to open data file")]
  FailedToOpenDataFile,

  #[error("failed to read from data file")]
  FailedToReadFromDataFile,

  #[error("failed to write to data file")]
  FailedToWriteToDataFile,

  #[error("failed to sync data file")]
  FailedToSyncDataFile,

  #[error("failed to unlock the database directory")]
  FailedToUnlockDatabaseDir,

  #[error("another merge is in progress, try again later")]
  MergeInProgress,

  #[error("the merge threshold has not been reached")]
  MergeThresholdUnreached,

  #[error("not enough disk space for merge")]
  MergeNoEnoughSpace,
}

pub type Result<T> = std::result::Result<T, Errors>;
