pub mod btree;
pub mod skiplist;

use bytes::Bytes;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::{IndexType, IteratorOptions},
};

/// The in-memory key directory: every live key maps to the locator of its
/// most recent record on disk.
pub trait Indexer: Sync + Send {
  /// Stores a key's position, returning the position it replaced so the
  /// engine can account the superseded record as reclaimable.
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos>;

  /// Retrieves a key's position from the index.
  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Deletes a key's position from the index, returning it if present.
  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos>;

  /// Number of live keys.
  fn len(&self) -> usize;

  fn list_keys(&self) -> Result<Vec<Bytes>>;

  /// Creates a snapshot iterator for the index with the specified options.
  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator>;
}

pub fn new_indexer(index_type: &IndexType) -> Box<dyn Indexer> {
  match *index_type {
    IndexType::BTree => Box::new(btree::BTree::new()),
    IndexType::SkipList => Box::new(skiplist::SkipList::new()),
  }
}

/// Walks a point-in-time snapshot of the index. Mutations made after the
/// iterator was created are not reflected.
pub trait IndexIterator: Sync + Send {
  fn rewind(&mut self);

  fn seek(&mut self, key: Vec<u8>);

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)>;
}
