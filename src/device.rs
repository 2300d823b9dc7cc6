//! Block device abstraction.
//!
//! Grounded on the teacher's `block_device.rs`/`device.rs` split and its
//! `example/fat32-fs-std/src/device.rs` `BlockFile` — but unlike the
//! no_std kernel driver this one sits in a std userspace daemon, so reads
//! and writes go straight through positioned file I/O rather than through
//! a block-id/block-count pair.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

/// Anything the driver can read and write at an arbitrary byte offset.
///
/// `Send + Sync` because the façade is shared behind a [`std::sync::Mutex`]
/// (spec §5) and may be invoked from a multithreaded bridge.
pub trait BlockDevice: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
    /// Total addressable size of the backing store, in bytes.
    fn len(&self) -> std::io::Result<u64>;
}

/// A [`BlockDevice`] backed by a regular file or block special file opened
/// read/write. This is the production device the `fatfsd` binary mounts.
pub struct FileBlockDevice {
    file: Mutex<File>,
}

impl FileBlockDevice {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn len(&self) -> std::io::Result<u64> {
        let file = self.file.lock().unwrap();
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! An in-memory [`BlockDevice`] for unit tests, in the spirit of how
    //! `rafalh-rust-fatfs` drives its own test suite against throwaway
    //! images without touching the filesystem.

    use super::BlockDevice;
    use std::sync::Mutex;

    pub struct MemDevice {
        data: Mutex<Vec<u8>>,
    }

    impl MemDevice {
        pub fn zeroed(size: usize) -> Self {
            Self {
                data: Mutex::new(vec![0u8; size]),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
            let data = self.data.lock().unwrap();
            let start = offset as usize;
            let end = start + buf.len();
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }

        fn write_at(&self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
            let mut data = self.data.lock().unwrap();
            let start = offset as usize;
            let end = start + buf.len();
            data[start..end].copy_from_slice(buf);
            Ok(())
        }

        fn len(&self) -> std::io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }
    }
}
