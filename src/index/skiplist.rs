use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::{data::log_record::LogRecordPos, errors::Result, option::IteratorOptions};

use super::{IndexIterator, Indexer};

/// Concurrent in-memory index over a lock-free skip list; lookups never
/// block the write path.
pub struct SkipList {
  skl: Arc<SkipMap<Vec<u8>, LogRecordPos>>,
}

impl SkipList {
  pub fn new() -> Self {
    Self {
      skl: Arc::new(SkipMap::new()),
    }
  }
}

impl Default for SkipList {
  fn default() -> Self {
    Self::new()
  }
}

impl Indexer for SkipList {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    // mutators are serialized by the engine's write path, so the
    // get-then-insert pair observes a stable previous value
    let prev = self.skl.get(&key).map(|entry| *entry.value());
    self.skl.insert(key, pos);
    prev
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    self.skl.get(&key).map(|entry| *entry.value())
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    self.skl.remove(&key).map(|entry| *entry.value())
  }

  fn len(&self) -> usize {
    self.skl.len()
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    Ok(
      self
        .skl
        .iter()
        .map(|entry| Bytes::copy_from_slice(entry.key()))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let mut items = Vec::with_capacity(self.skl.len());
    for entry in self.skl.iter() {
      items.push((entry.key().clone(), *entry.value()));
    }
    if options.reverse {
      items.reverse();
    }

    Box::new(SkipListIterator {
      items,
      curr_index: 0,
      options,
    })
  }
}

pub struct SkipListIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for SkipListIterator {
  fn rewind(&mut self) {
    self.curr_index = 0;
  }

  fn seek(&mut self, key: Vec<u8>) {
    self.curr_index = match self.items.binary_search_by(|(x, _)| {
      if self.options.reverse {
        x.cmp(&key).reverse()
      } else {
        x.cmp(&key)
      }
    }) {
      Ok(equal_val) => equal_val,
      Err(insert_val) => insert_val,
    };
  }

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)> {
    while self.curr_index < self.items.len() {
      let item = &self.items[self.curr_index];
      self.curr_index += 1;
      if self.options.prefix.is_empty() || item.0.starts_with(&self.options.prefix) {
        return Some((&item.0, &item.1));
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos {
      file_id,
      offset,
      size: 16,
      timestamp: 0,
    }
  }

  #[test]
  fn test_skiplist_put_get_delete() {
    let skl = SkipList::new();

    assert!(skl.put(b"abc".to_vec(), pos(1, 10)).is_none());
    let old = skl.put(b"abc".to_vec(), pos(3, 30));
    assert_eq!(old.unwrap().offset, 10);

    assert_eq!(skl.get(b"abc".to_vec()).unwrap().file_id, 3);
    assert!(skl.get(b"missing".to_vec()).is_none());

    let deleted = skl.delete(b"abc".to_vec());
    assert_eq!(deleted.unwrap().file_id, 3);
    assert!(skl.delete(b"abc".to_vec()).is_none());
  }

  #[test]
  fn test_skiplist_len_and_list_keys() {
    let skl = SkipList::new();
    assert_eq!(skl.len(), 0);

    skl.put(b"ccde".to_vec(), pos(1, 0));
    skl.put(b"aacd".to_vec(), pos(1, 10));
    assert_eq!(skl.len(), 2);

    let keys = skl.list_keys().unwrap();
    // skip list iteration is ordered
    assert_eq!(keys, vec![Bytes::from("aacd"), Bytes::from("ccde")]);
  }

  #[test]
  fn test_skiplist_iterator_prefix() {
    let skl = SkipList::new();
    skl.put(b"foo".to_vec(), pos(1, 0));
    skl.put(b"food".to_vec(), pos(1, 10));
    skl.put(b"hello".to_vec(), pos(1, 20));

    let mut iter = skl.iterator(IteratorOptions {
      prefix: b"fo".to_vec(),
      reverse: false,
    });
    let mut collected = Vec::new();
    while let Some((key, _)) = iter.next() {
      collected.push(key.clone());
    }
    assert_eq!(collected, vec![b"foo".to_vec(), b"food".to_vec()]);
  }

  #[test]
  fn test_skiplist_concurrent_reads() {
    use std::thread;

    let skl = Arc::new(SkipList::new());
    for i in 0..100u64 {
      skl.put(format!("key-{:03}", i).into_bytes(), pos(1, i));
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
      let skl = skl.clone();
      handles.push(thread::spawn(move || {
        for i in 0..100u64 {
          let got = skl.get(format!("key-{:03}", i).into_bytes());
          assert_eq!(got.unwrap().offset, i);
        }
      }));
    }
    for handle in handles {
      handle.join().unwrap();
    }
  }
}
