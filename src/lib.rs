//! Barrel: an embedded, persistent key-value storage engine built on the
//! Bitcask log-structured design.
//!
//! All writes append to a single active datafile; an in-memory index maps
//! every live key to the exact position of its newest record, so reads
//! cost one positioned disk access. Deletions write tombstones, crash
//! recovery replays the log, and a merge pass rewrites the datafiles to
//! reclaim the space superseded records occupy.
//!
//! # Features
//!
//! * Point reads served by a single positioned read, writes by a single append
//! * Durable deletes and crash recovery with checksummed records
//! * Prefix scans over the in-memory index
//! * Space reclamation through merge compaction, with hint files for fast reopen
//! * One engine per directory enforced with an OS-level file lock
//! * Pluggable index implementations (ordered B-tree map or lock-free skip list)
//!
//! # Basic Usage
//!
//! ```
//! use barrel::{db::Engine, option::Options};
//! use bytes::Bytes;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut opts = Options::default();
//! opts.dir_path = dir.path().to_path_buf();
//! let engine = Engine::open(opts).expect("failed to open barrel engine");
//!
//! engine.put(Bytes::from("hello"), Bytes::from("world")).expect("failed to put");
//! let value = engine.get(Bytes::from("hello")).expect("failed to get");
//! assert_eq!(value, Bytes::from("world"));
//!
//! engine.delete(Bytes::from("hello")).expect("failed to delete");
//! engine.close().expect("failed to close");
//! ```

mod data;

mod fio;
mod index;

pub mod db;
pub mod errors;
pub mod iterator;
pub mod merge;
pub mod option;
pub mod util;
