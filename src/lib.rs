//! A FAT32 filesystem driver meant to be invoked by a user-space
//! kernel bridge (spec §1): it owns volume bring-up, the FAT cache,
//! the free-space allocator, cluster-chain I/O, the open-file handle
//! table, directory operations, path resolution, and the filesystem
//! façade that ties them together. It does not itself talk to a
//! kernel — that glue lives in `src/bin/fatfsd.rs`.

pub mod attrs;
pub mod bpb;
pub mod chain;
pub mod device;
pub mod direntry;
pub mod dirtable;
pub mod error;
pub mod fat;
pub mod freespace;
pub mod fs;
pub mod handle;
pub mod path;
pub mod time;
pub mod volume;

pub use attrs::{Attributes, FileKind, VolumeStats};
pub use device::{BlockDevice, FileBlockDevice};
pub use error::FsError;
pub use fs::{FileHandleId, Filesystem};
