#![allow(clippy::field_reassign_with_default)]
use std::{
  fs,
  path::{Path, PathBuf},
  sync::atomic::Ordering,
};

use log::error;

use crate::{
  data::{
    data_file::{
      get_data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
      MERGE_FINISHED_FILE_NAME,
    },
    log_record::{LogRecord, LogRecordType},
  },
  db::{Engine, FILE_LOCK_NAME},
  errors::{Errors, Result},
  option::{IOManagerType, Options},
  util,
};

const MERGE_DIR_NAME: &str = "merge";
const MERGE_FIN_KEY: &[u8] = "merge.finished".as_bytes();

impl Engine {
  /// Compacts the datafiles: every record superseded by a later write,
  /// and every tombstone, is dropped; survivors are rewritten into a
  /// sibling scratch directory together with a hint file. The swap into
  /// place happens on the next `open`, keyed off the merge-finished
  /// marker, so a crash at any point leaves either the old set or the
  /// new set intact.
  ///
  /// Without `force`, the merge only runs once the reclaimable fraction
  /// of the directory passes `file_merge_threshold` and the filesystem
  /// has room for a full copy of the live data.
  pub fn merge(&self, force: bool) -> Result<()> {
    if self.is_engine_empty() {
      return Ok(());
    }

    let lock = self.merging_lock.try_lock();
    if lock.is_none() {
      return Err(Errors::MergeInProgress);
    }

    if !force {
      let reclaim_size = self.reclaim_size.load(Ordering::SeqCst);
      let total_size = util::file::dir_disk_size(&self.options.dir_path);
      let ratio = reclaim_size as f32 / total_size as f32;
      if ratio < self.options.file_merge_threshold {
        return Err(Errors::MergeThresholdUnreached);
      }

      let available_space = util::file::available_disk_space(&self.options.dir_path);
      if total_size - reclaim_size >= available_space {
        return Err(Errors::MergeNoEnoughSpace);
      }
    }

    let merge_path = get_merge_path(&self.options.dir_path);
    if merge_path.is_dir() {
      if let Err(e) = fs::remove_dir_all(&merge_path) {
        error!("failed to remove a stale merge directory: {}", e);
        return Err(Errors::FailedToCreateDatabaseDir);
      }
    }
    if let Err(e) = fs::create_dir(&merge_path) {
      error!("failed to create merge path: {}", e);
      return Err(Errors::FailedToCreateDatabaseDir);
    }

    // scratch outputs are deleted on failure, the input set is never
    // touched before the finished marker exists
    let merge_result = self.write_merge_files(&merge_path);
    if merge_result.is_err() {
      let _ = fs::remove_dir_all(&merge_path);
    }
    merge_result
  }

  fn write_merge_files(&self, merge_path: &Path) -> Result<()> {
    let merge_files = self.rotate_merge_files()?;

    let mut merge_db_opts = Options::default();
    merge_db_opts.dir_path = merge_path.to_path_buf();
    merge_db_opts.data_file_size = self.options.data_file_size;
    merge_db_opts.max_key_size = self.options.max_key_size;
    merge_db_opts.max_value_size = self.options.max_value_size;
    merge_db_opts.mmap_at_startup = false;
    let merge_db = Engine::open(merge_db_opts)?;

    let hint_file = DataFile::new_hint_file(merge_path, self.record_limits())?;

    for data_file in merge_files.iter() {
      let mut offset = 0;
      loop {
        let (log_record, size) = match data_file.read_log_record(offset) {
          Ok(result) => (result.record, result.size),
          Err(Errors::ReadDataFileEOF) | Err(Errors::TruncatedRecord) => break,
          Err(e) => return Err(e),
        };

        // a record survives iff the index still points exactly at it;
        // tombstones never match because deleted keys left the index
        if let Some(index_pos) = self.index.get(log_record.key.clone()) {
          if index_pos.file_id == data_file.get_file_id() && index_pos.offset == offset {
            let merged_pos = merge_db.append_log_record(&log_record)?;
            hint_file.write_hint_record(log_record.key.clone(), &merged_pos)?;
          }
        }
        offset += size;
      }
    }

    merge_db.sync()?;
    hint_file.sync()?;

    let non_merge_file_id = match merge_files.last() {
      Some(file) => file.get_file_id() + 1,
      None => return Ok(()),
    };
    let merge_fin_file = DataFile::new_merge_fin_file(merge_path)?;
    let merge_fin_record = LogRecord {
      key: MERGE_FIN_KEY.to_vec(),
      value: non_merge_file_id.to_string().into_bytes(),
      rec_type: LogRecordType::Normal,
      timestamp: util::now_millis(),
    };
    merge_fin_file.write(&merge_fin_record.encode())?;
    merge_fin_file.sync()?;

    merge_db.close()?;
    Ok(())
  }

  /// Closes the merge set under the writer lock: the active file is
  /// rotated out so every file in the returned snapshot is immutable,
  /// then each is reopened with an independent read handle.
  fn rotate_merge_files(&self) -> Result<Vec<DataFile>> {
    // lock order matches the append path: active file first, then the
    // older-files map
    let mut active_file = self.active_data_file.write();
    let mut old_files = self.old_data_files.write();

    let mut merge_file_ids = Vec::new();
    for fid in old_files.keys() {
      merge_file_ids.push(*fid);
    }

    active_file.sync()?;
    let active_file_id = active_file.get_file_id();
    let new_active_file = DataFile::new(
      &self.options.dir_path,
      active_file_id + 1,
      IOManagerType::StandardFileIO,
      self.record_limits(),
    )?;
    *active_file = new_active_file;

    let old_file = DataFile::new(
      &self.options.dir_path,
      active_file_id,
      IOManagerType::StandardFileIO,
      self.record_limits(),
    )?;
    old_files.insert(active_file_id, old_file);
    merge_file_ids.push(active_file_id);
    merge_file_ids.sort();

    let mut merge_files = Vec::new();
    for file_id in merge_file_ids {
      let data_file = DataFile::new(
        &self.options.dir_path,
        file_id,
        IOManagerType::StandardFileIO,
        self.record_limits(),
      )?;
      merge_files.push(data_file);
    }
    Ok(merge_files)
  }
}

/// Compacts a closed database directory. Opens the engine (acquiring the
/// directory lock, so a live instance makes this fail with
/// `DatabaseLocked`), merges, then reopens once to finalize the swap.
pub fn merge<P>(dir_path: P, force: bool) -> Result<()>
where
  P: AsRef<Path>,
{
  let mut opts = Options::default();
  opts.dir_path = dir_path.as_ref().to_path_buf();

  let engine = Engine::open(opts.clone())?;
  engine.merge(force)?;
  engine.close()?;

  // reopening replays the finished merge into the main directory
  let engine = Engine::open(opts)?;
  engine.close()
}

/// Parses the merge-finished marker, if it is intact.
pub(crate) fn read_non_merge_file_id<P>(dir_path: P) -> Option<u32>
where
  P: AsRef<Path>,
{
  let fin_file = DataFile::new_merge_fin_file(&dir_path).ok()?;
  let fin_record = fin_file.read_log_record(0).ok()?;
  String::from_utf8(fin_record.record.value)
    .ok()?
    .parse::<u32>()
    .ok()
}

/// `<parent>/<dir>-merge` next to the database directory.
fn get_merge_path<P>(dir_path: P) -> PathBuf
where
  P: AsRef<Path>,
{
  let file_name = dir_path.as_ref().file_name().unwrap();
  let merge_name = format!("{}-{}", file_name.to_str().unwrap(), MERGE_DIR_NAME);
  let parent = dir_path.as_ref().parent().unwrap();
  parent.to_path_buf().join(merge_name)
}

/// Called by `Engine::open` before the directory is enumerated. An
/// unfinished merge directory is discarded; a finished one replaces the
/// datafiles it covers and is then removed.
pub(crate) fn load_merge_files<P>(dir_path: P) -> Result<()>
where
  P: AsRef<Path>,
{
  let merge_path = get_merge_path(&dir_path);
  if !merge_path.is_dir() {
    return Ok(());
  }

  let dir = match fs::read_dir(&merge_path) {
    Ok(dir) => dir,
    Err(e) => {
      error!("failed to read merge directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
  };

  let mut merge_file_names = Vec::new();
  let mut merge_finished = false;
  for file in dir.flatten() {
    let file_os_str = file.file_name();
    let file_name = file_os_str.to_string_lossy();

    if file_name == MERGE_FINISHED_FILE_NAME {
      merge_finished = true;
    }
    if file_name == FILE_LOCK_NAME {
      continue;
    }
    // rotation inside the scratch engine can leave a trailing empty file
    if file_name.ends_with(DATA_FILE_NAME_SUFFIX) {
      let is_empty = file.metadata().map_or(false, |meta| meta.len() == 0);
      if is_empty {
        continue;
      }
    }

    merge_file_names.push(file.file_name());
  }

  // the marker is the commit point: absent or torn, the merge never
  // happened and the scratch outputs are discarded
  let non_merge_file_id = if merge_finished {
    read_non_merge_file_id(&merge_path)
  } else {
    None
  };
  let Some(non_merge_file_id) = non_merge_file_id else {
    if let Err(e) = fs::remove_dir_all(&merge_path) {
      error!("failed to remove an unfinished merge directory: {}", e);
      return Err(Errors::FailedToReadDatabaseDir);
    }
    return Ok(());
  };

  // every step below is idempotent, so a crash mid-swap is finished by
  // the next open as long as the marker still sits in the merge dir
  let move_into_place = |name: &std::ffi::OsStr| -> Result<()> {
    let src_path = merge_path.join(name);
    if !src_path.is_file() {
      // already moved by an interrupted earlier swap
      return Ok(());
    }
    let dst_path = dir_path.as_ref().join(name);
    fs::rename(src_path, dst_path).map_err(|e| {
      error!("failed to move a merged file into place: {}", e);
      Errors::FailedToReadDatabaseDir
    })
  };

  // hints from an older merge must not describe the new file set
  let stale_hint = dir_path.as_ref().join(HINT_FILE_NAME);
  if stale_hint.is_file() {
    let _ = fs::remove_file(stale_hint);
  }
  let stale_marker = dir_path.as_ref().join(MERGE_FINISHED_FILE_NAME);
  if stale_marker.is_file() {
    let _ = fs::remove_file(stale_marker);
  }

  // merged output ids restart at zero, so each move atomically replaces
  // the input file of the same id
  let mut output_ids = Vec::new();
  for file_name in &merge_file_names {
    let name = file_name.to_string_lossy();
    if let Some(stem) = name.strip_suffix(DATA_FILE_NAME_SUFFIX) {
      if let Ok(file_id) = stem.parse::<u32>() {
        output_ids.push(file_id);
        move_into_place(file_name)?;
      }
    }
  }

  // inputs the outputs did not overwrite are garbage now
  for file_id in 0..non_merge_file_id {
    if output_ids.contains(&file_id) {
      continue;
    }
    let file = get_data_file_name(&dir_path, file_id);
    if file.is_file() {
      if let Err(e) = fs::remove_file(file) {
        error!("failed to remove a merged data file: {}", e);
        return Err(Errors::FailedToReadDatabaseDir);
      }
    }
  }

  // the hint goes in before the marker that vouches for it
  if merge_file_names.iter().any(|n| *n == HINT_FILE_NAME) {
    move_into_place(std::ffi::OsStr::new(HINT_FILE_NAME))?;
  }
  move_into_place(std::ffi::OsStr::new(MERGE_FINISHED_FILE_NAME))?;

  if let Err(e) = fs::remove_dir_all(&merge_path) {
    error!("failed to remove the merge directory: {}", e);
    return Err(Errors::FailedToReadDatabaseDir);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use bytes::Bytes;

  use super::*;
  use crate::util::rand_kv::{get_test_key, get_test_value};

  fn merge_test_options(dir: &tempfile::TempDir) -> Options {
    let mut opts = Options::default();
    opts.dir_path = dir.path().join("db");
    opts.data_file_size = 32 * 1024 * 1024;
    opts
  }

  #[test]
  fn test_merge_empty_engine() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts).expect("failed to open engine");

    let res = engine.merge(true);
    assert!(res.is_ok());
  }

  #[test]
  fn test_merge_threshold_unreached() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts).expect("failed to open engine");

    // a fresh write-only workload has nothing to reclaim
    for i in 0..1000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    let res = engine.merge(false);
    assert_eq!(res.err().unwrap(), Errors::MergeThresholdUnreached);
  }

  #[test]
  fn test_merge_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts.clone()).expect("failed to open engine");

    for i in 0..10000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    engine.merge(true).unwrap();
    drop(engine);

    let engine2 = Engine::open(opts).expect("failed to open engine");
    let keys = engine2.keys().unwrap();
    assert_eq!(keys.len(), 10000);
    for i in 0..10000 {
      assert_eq!(engine2.get(get_test_key(i)).unwrap(), get_test_value(i));
    }
  }

  #[test]
  fn test_merge_with_overwrites_and_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts.clone()).expect("failed to open engine");

    for i in 0..10000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 0..2000 {
      engine
        .put(get_test_key(i), Bytes::from("overwritten in merge"))
        .unwrap();
    }
    for i in 8000..10000 {
      engine.delete(get_test_key(i)).unwrap();
    }

    engine.merge(true).unwrap();
    drop(engine);

    let engine2 = Engine::open(opts).expect("failed to open engine");
    assert_eq!(engine2.keys().unwrap().len(), 8000);
    for i in 0..2000 {
      assert_eq!(
        engine2.get(get_test_key(i)).unwrap(),
        Bytes::from("overwritten in merge")
      );
    }
    for i in 8000..10000 {
      assert_eq!(
        engine2.get(get_test_key(i)).err().unwrap(),
        Errors::KeyNotFound
      );
    }
  }

  #[test]
  fn test_merge_all_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts.clone()).expect("failed to open engine");

    for i in 0..5000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
      engine.delete(get_test_key(i)).unwrap();
    }
    engine.merge(true).unwrap();
    drop(engine);

    let engine2 = Engine::open(opts).expect("failed to open engine");
    assert_eq!(engine2.keys().unwrap().len(), 0);
    for i in 0..5000 {
      assert_eq!(
        engine2.get(get_test_key(i)).err().unwrap(),
        Errors::KeyNotFound
      );
    }
  }

  #[test]
  fn test_merge_while_writing() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);
    let engine = Engine::open(opts.clone()).expect("failed to open engine");

    for i in 0..10000 {
      engine.put(get_test_key(i), get_test_value(i)).unwrap();
    }
    for i in 8000..10000 {
      engine.delete(get_test_key(i)).unwrap();
    }

    let eng = Arc::new(engine);

    let mut handles = vec![];
    let eng1 = eng.clone();
    handles.push(thread::spawn(move || {
      for i in 20000..30000 {
        eng1.put(get_test_key(i), get_test_value(i)).unwrap();
      }
    }));

    let eng2 = eng.clone();
    handles.push(thread::spawn(move || {
      eng2.merge(true).unwrap();
    }));

    for handle in handles {
      handle.join().unwrap();
    }

    drop(eng);

    let engine2 = Engine::open(opts).expect("failed to open engine");
    assert_eq!(engine2.keys().unwrap().len(), 18000);
  }

  #[test]
  fn test_merge_free_function() {
    let dir = tempfile::tempdir().unwrap();
    let opts = merge_test_options(&dir);

    {
      let engine = Engine::open(opts.clone()).expect("failed to open engine");
      for i in 0..1000 {
        engine.put(get_test_key(i), get_test_value(i)).unwrap();
      }
      for i in 0..500 {
        engine.delete(get_test_key(i)).unwrap();
      }
      engine.close().unwrap();
    }

    merge(&opts.dir_path, true).unwrap();

    let engine = Engine::open(opts).expect("failed to open engine");
    assert_eq!(engine.len(), 500);
    for i in 500..1000 {
      assert_eq!(engine.get(get_test_key(i)).unwrap(), get_test_value(i));
    }
  }
}
