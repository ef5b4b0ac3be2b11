use std::{fs::OpenOptions, path::Path};

use log::error;
use memmap2::Mmap;

use crate::errors::{Errors, Result};

use super::IOManager;

/// Read-only memory-mapped I/O, used to accelerate the startup scan over
/// immutable datafiles. The map is a point-in-time view; the engine never
/// appends through it.
pub struct MMapIO {
  map: Mmap,
}

impl MMapIO {
  pub fn new<P>(file_name: P) -> Result<Self>
  where
    P: AsRef<Path>,
  {
    match OpenOptions::new()
      .create(true)
      .read(true)
      .append(true)
      .open(file_name)
    {
      Ok(file) => {
        let map = unsafe {
          Mmap::map(&file).map_err(|e| {
            error!("failed to map data file error: {}", e);
            Errors::FailedToOpenDataFile
          })?
        };
        Ok(MMapIO { map })
      }
      Err(e) => {
        error!("failed to open data file error: {}", e);
        Err(Errors::FailedToOpenDataFile)
      }
    }
  }
}

impl IOManager for MMapIO {
  fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
    let end = offset + buf.len() as u64;
    if end > self.map.len() as u64 {
      return Err(Errors::ReadDataFileEOF);
    }

    let val = &self.map[offset as usize..end as usize];
    buf.copy_from_slice(val);
    Ok(val.len())
  }

  fn write(&self, _buf: &[u8]) -> Result<usize> {
    unimplemented!("memory-mapped datafiles are read-only")
  }

  fn sync(&self) -> Result<()> {
    unimplemented!("memory-mapped datafiles are read-only")
  }

  fn size(&self) -> u64 {
    self.map.len() as u64
  }
}
