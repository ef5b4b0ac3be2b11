use std::{fs, path::Path};

/// Total size in bytes of the files directly under `dir_path`. Used to
/// gate merges on the dead-bytes ratio.
pub fn dir_disk_size<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  let Ok(dir) = fs::read_dir(dir_path) else {
    return 0;
  };
  dir
    .flatten()
    .filter_map(|entry| entry.metadata().ok())
    .filter(|meta| meta.is_file())
    .map(|meta| meta.len())
    .sum()
}

/// Free space on the filesystem holding `dir_path`, or zero if it cannot
/// be determined.
pub fn available_disk_space<P>(dir_path: P) -> u64
where
  P: AsRef<Path>,
{
  fs2::available_space(dir_path).unwrap_or(0)
}
