use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{db::Engine, index::IndexIterator, option::IteratorOptions};

/// A snapshot iterator over key-value pairs. Keys come from the index
/// snapshot taken at creation; values are read from disk on demand.
pub struct Iterator<'a> {
  index_iter: Arc<RwLock<Box<dyn IndexIterator>>>,
  engine: &'a Engine,
}

impl Engine {
  pub fn iter(&self, options: IteratorOptions) -> Iterator {
    Iterator {
      index_iter: Arc::new(RwLock::new(self.index.iterator(options))),
      engine: self,
    }
  }
}

impl Iterator<'_> {
  /// Back to the first position.
  pub fn rewind(&self) {
    self.index_iter.write().rewind();
  }

  /// Jumps to the first key at or past `key` in iteration order.
  pub fn seek(&self, key: Vec<u8>) {
    self.index_iter.write().seek(key);
  }

  pub fn next(&self) -> Option<(Bytes, Bytes)> {
    let mut index_iter = self.index_iter.write();
    if let Some((key, pos)) = index_iter.next() {
      let value = self
        .engine
        .get_value_by_position(pos)
        .expect("failed to read the value an index entry points at");
      return Some((Bytes::copy_from_slice(key), value));
    }
    None
  }
}
