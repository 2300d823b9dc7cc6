//! Directory-slot I/O (spec §4.6): reading, writing, appending, and
//! deleting 32-byte directory entries within a directory's cluster
//! chain.
//!
//! Grounded on the teacher's `dir.rs` (`find`/`create`/`ls`/`remove`
//! over a `VirFile`'s cluster chain), but delete compaction is
//! reworked: the teacher marks a slot deleted and leaves a hole behind
//! (the classic FAT convention), while spec §4.6 calls for
//! swap-with-last compaction — the last occupied slot is moved into
//! the freed one and the chain's logical slot count shrinks, so a scan
//! never needs to skip tombstones.

use crate::chain::{ClusterChain, SeekFrom};
use crate::device::BlockDevice;
use crate::direntry::{DirEntry, ENTRY_SIZE};
use crate::error::{ChainError, DirError};

/// A directory viewed as a flat array of 32-byte slots over its
/// cluster chain.
pub struct DirTable<'a, D: BlockDevice> {
    chain: &'a mut ClusterChain<D>,
}

impl<'a, D: BlockDevice> DirTable<'a, D> {
    pub fn new(chain: &'a mut ClusterChain<D>) -> Self {
        DirTable { chain }
    }

    pub fn slot_count(&self) -> u64 {
        self.chain.len() / ENTRY_SIZE as u64
    }

    pub fn read_slot(&mut self, index: u64) -> Result<DirEntry, ChainError> {
        self.chain.seek(SeekFrom::Start(index * ENTRY_SIZE as u64))?;
        let mut buf = [0u8; ENTRY_SIZE];
        self.chain.read(&mut buf)?;
        Ok(DirEntry::parse(&buf))
    }

    pub fn write_slot(&mut self, index: u64, entry: &DirEntry) -> Result<(), ChainError> {
        self.chain.seek(SeekFrom::Start(index * ENTRY_SIZE as u64))?;
        self.chain.write(&entry.to_bytes())?;
        Ok(())
    }

    /// Scans every occupied slot, short-circuiting at the first
    /// end-of-directory marker (spec §4.6).
    pub fn for_each_occupied<F: FnMut(u64, &DirEntry)>(&mut self, mut f: F) -> Result<(), ChainError> {
        let count = self.slot_count();
        for index in 0..count {
            let entry = self.read_slot(index)?;
            if entry.is_end_of_directory() {
                break;
            }
            if !entry.is_unused() {
                f(index, &entry);
            }
        }
        Ok(())
    }

    pub fn find_by_name(&mut self, short_name: &[u8; 8], extension: &[u8; 3]) -> Result<Option<(u64, DirEntry)>, ChainError> {
        let count = self.slot_count();
        for index in 0..count {
            let entry = self.read_slot(index)?;
            if entry.is_end_of_directory() {
                break;
            }
            if entry.is_unused() || entry.is_volume_id() {
                continue;
            }
            if &entry.name == short_name && &entry.extension == extension {
                return Ok(Some((index, entry)));
            }
        }
        Ok(None)
    }

    /// Appends a new entry into the first free slot, or extends the
    /// chain by one cluster's worth of slots if none is free (spec
    /// §4.6: a directory grows like any other cluster chain).
    pub fn append(&mut self, entry: &DirEntry) -> Result<u64, DirError> {
        let count = self.slot_count();
        for index in 0..count {
            let existing = self.read_slot(index)?;
            if existing.is_unused() {
                self.write_slot(index, entry)?;
                return Ok(index);
            }
        }
        let index = count;
        self.write_slot(index, entry)?;
        // Keep the new end-of-directory marker intact for the slot
        // after the one just written, if it falls within the chain's
        // already-allocated capacity.
        if (index + 1) * ENTRY_SIZE as u64 <= self.chain.len() {
            self.write_slot(index + 1, &DirEntry::empty())?;
        }
        Ok(index)
    }

    /// Deletes the slot at `index` using swap-with-last compaction: the
    /// last occupied slot's entry is copied into `index` and that last
    /// slot is cleared, so the directory never accumulates tombstones
    /// (spec §4.6).
    pub fn delete(&mut self, index: u64) -> Result<(), DirError> {
        let count = self.slot_count();
        let mut last_occupied = None;
        for i in (0..count).rev() {
            let entry = self.read_slot(i)?;
            if !entry.is_unused() {
                last_occupied = Some(i);
                break;
            }
        }
        let Some(last) = last_occupied else {
            return Err(DirError::NoSuchEntry);
        };

        if last == index {
            self.write_slot(index, &DirEntry::empty())?;
        } else {
            let moved = self.read_slot(last)?;
            self.write_slot(index, &moved)?;
            self.write_slot(last, &DirEntry::empty())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;
    use crate::fat::FatCache;
    use crate::freespace::FreeSpaceMap;
    use std::sync::{Arc, Mutex};

    fn make_entry(name: &[u8; 8]) -> DirEntry {
        let mut e = DirEntry::empty();
        e.name = *name;
        e.extension = *b"   ";
        e
    }

    fn fresh_chain() -> ClusterChain<MemDevice> {
        let device = Arc::new(MemDevice::zeroed(512 * 16));
        let fat = Arc::new(FatCache::new(device.clone(), 0, None, 512));
        let free_space = Arc::new(Mutex::new(FreeSpaceMap::scan(&fat, 8).unwrap()));
        let geometry = crate::chain::ChainGeometry {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            data_start_sector: 0,
        };
        ClusterChain::materialize(device, fat, free_space, geometry, 0, 0).unwrap()
    }

    #[test]
    fn append_then_find_round_trips() {
        let mut chain = fresh_chain();
        let mut table = DirTable::new(&mut chain);
        table.append(&make_entry(b"ONE     ")).unwrap();
        table.append(&make_entry(b"TWO     ")).unwrap();
        let (index, entry) = table.find_by_name(b"TWO     ", b"   ").unwrap().unwrap();
        assert_eq!(index, 1);
        assert_eq!(entry.display_name(), "TWO");
    }

    #[test]
    fn delete_swaps_with_last_occupied_slot() {
        let mut chain = fresh_chain();
        let mut table = DirTable::new(&mut chain);
        table.append(&make_entry(b"ONE     ")).unwrap();
        table.append(&make_entry(b"TWO     ")).unwrap();
        table.append(&make_entry(b"THREE   ")).unwrap();

        table.delete(0).unwrap();

        assert!(table.find_by_name(b"ONE     ", b"   ").unwrap().is_none());
        let (index, entry) = table.find_by_name(b"THREE   ", b"   ").unwrap().unwrap();
        assert_eq!(index, 0);
        assert_eq!(entry.display_name(), "THREE");
        let (index, _) = table.find_by_name(b"TWO     ", b"   ").unwrap().unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn delete_last_slot_just_clears_it() {
        let mut chain = fresh_chain();
        let mut table = DirTable::new(&mut chain);
        table.append(&make_entry(b"ONE     ")).unwrap();
        table.delete(0).unwrap();
        assert!(table.find_by_name(b"ONE     ", b"   ").unwrap().is_none());
    }
}
