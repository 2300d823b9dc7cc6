//! The FAT cache (spec §4.2): an LRU, write-through cache of FAT
//! sectors sitting in front of the on-disk File Allocation Table
//! itself.
//!
//! Grounded on the teacher's `block_cache.rs` (the `lru::LruCache` of
//! fixed-size sector buffers is kept) and `fat.rs` (the cell read/write
//! arithmetic), generalized from a global cache of arbitrary blocks to
//! one scoped to a single volume's FAT region, and from read-modify-
//! write-on-drop to write-through-on-every-write (spec §4.2 requires
//! writes to be visible to the next read immediately, with no
//! dedicated flush operation).

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::bpb::BOOT_SECTOR_SIZE;
use crate::device::BlockDevice;
use crate::error::FatError;

pub const FREE_CLUSTER: u32 = 0x0000_0000;
pub const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
pub const END_OF_CHAIN_MIN: u32 = 0x0FFF_FFF8;
pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;

const RESERVED_BITS_MASK: u32 = 0xF000_0000;
const CLUSTER_VALUE_MASK: u32 = 0x0FFF_FFFF;

const CACHE_CAPACITY_SECTORS: usize = 64;

/// Write-through LRU cache over one FAT's sectors.
pub struct FatCache<D: BlockDevice> {
    device: std::sync::Arc<D>,
    fat_offset: u64,
    mirror_offset: Option<u64>,
    bytes_per_sector: u64,
    sectors: Mutex<LruCache<u64, [u8; BOOT_SECTOR_SIZE]>>,
}

fn cell_location(cluster: u32, bytes_per_sector: u64) -> (u64, usize) {
    let byte_offset = cluster as u64 * 4;
    let sector = byte_offset / bytes_per_sector;
    let offset_in_sector = (byte_offset % bytes_per_sector) as usize;
    (sector, offset_in_sector)
}

impl<D: BlockDevice> FatCache<D> {
    /// `mirror_offset` is FAT2's byte offset, if the volume has a
    /// second FAT copy; every write is mirrored there too (spec §4.1:
    /// all on-disk FAT copies are kept in sync).
    pub fn new(
        device: std::sync::Arc<D>,
        fat_offset: u64,
        mirror_offset: Option<u64>,
        bytes_per_sector: u64,
    ) -> Self {
        Self {
            device,
            fat_offset,
            mirror_offset,
            bytes_per_sector,
            sectors: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY_SECTORS).unwrap(),
            )),
        }
    }

    fn load_sector(&self, sector: u64) -> Result<[u8; BOOT_SECTOR_SIZE], FatError> {
        let mut cache = self.sectors.lock().unwrap();
        if let Some(buf) = cache.get(&sector) {
            return Ok(*buf);
        }
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        self.device
            .read_at(self.fat_offset + sector * self.bytes_per_sector, &mut buf)?;
        cache.put(sector, buf);
        Ok(buf)
    }

    /// Reads the raw 32-bit FAT cell for `cluster`, reserved top 4 bits
    /// included.
    pub fn get_raw(&self, cluster: u32) -> Result<u32, FatError> {
        let (sector, offset) = cell_location(cluster, self.bytes_per_sector);
        let buf = self.load_sector(sector)?;
        Ok(u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]))
    }

    /// Reads the cluster-chain-relevant 28 bits of a FAT cell.
    pub fn get(&self, cluster: u32) -> Result<u32, FatError> {
        Ok(self.get_raw(cluster)? & CLUSTER_VALUE_MASK)
    }

    /// Writes the low 28 bits of a FAT cell, preserving whatever the
    /// top 4 reserved bits already held (spec §4.2 invariant: a write
    /// never clobbers the reserved bits).
    pub fn set(&self, cluster: u32, value: u32) -> Result<(), FatError> {
        let (sector, offset) = cell_location(cluster, self.bytes_per_sector);
        let mut buf = self.load_sector(sector)?;
        let old = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);
        let new = (old & RESERVED_BITS_MASK) | (value & CLUSTER_VALUE_MASK);
        buf[offset..offset + 4].copy_from_slice(&new.to_le_bytes());

        self.device
            .write_at(self.fat_offset + sector * self.bytes_per_sector, &buf)?;
        if let Some(mirror) = self.mirror_offset {
            self.device
                .write_at(mirror + sector * self.bytes_per_sector, &buf)?;
        }
        self.sectors.lock().unwrap().put(sector, buf);
        Ok(())
    }

    pub fn is_end_of_chain(value: u32) -> bool {
        value >= END_OF_CHAIN_MIN
    }

    pub fn is_free(value: u32) -> bool {
        value == FREE_CLUSTER
    }

    pub fn is_bad(value: u32) -> bool {
        value == BAD_CLUSTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;
    use std::sync::Arc;

    fn fresh_cache() -> FatCache<MemDevice> {
        let device = Arc::new(MemDevice::zeroed(BOOT_SECTOR_SIZE * 4));
        FatCache::new(device, 0, None, BOOT_SECTOR_SIZE as u64)
    }

    #[test]
    fn write_then_read_round_trips() {
        let cache = fresh_cache();
        cache.set(5, 0x0000_0010).unwrap();
        assert_eq!(cache.get(5).unwrap(), 0x0000_0010);
    }

    #[test]
    fn reserved_bits_survive_a_write() {
        let cache = fresh_cache();
        cache.set(5, END_OF_CHAIN).unwrap();

        let (sector, offset) = cell_location(5, BOOT_SECTOR_SIZE as u64);
        let mut buf = cache.load_sector(sector).unwrap();
        let v = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) | 0x1000_0000;
        buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
        cache
            .device
            .write_at(cache.fat_offset + sector * cache.bytes_per_sector, &buf)
            .unwrap();
        cache.sectors.lock().unwrap().put(sector, buf);

        cache.set(5, 10).unwrap();
        assert_eq!(cache.get_raw(5).unwrap() & RESERVED_BITS_MASK, 0x1000_0000);
        assert_eq!(cache.get(5).unwrap(), 10);
    }

    #[test]
    fn end_of_chain_threshold() {
        assert!(FatCache::<MemDevice>::is_end_of_chain(END_OF_CHAIN_MIN));
        assert!(!FatCache::<MemDevice>::is_end_of_chain(END_OF_CHAIN_MIN - 1));
    }
}
