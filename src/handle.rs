//! The open-file handle table (spec §4.5).
//!
//! Grounded on the teacher's `vfs.rs::VirFile` (a handle bundles a
//! materialized chain, its directory-slot identity, and a name) and
//! its `Arc<RwLock<_>>` sharing pattern — generalized so that two opens
//! of the same file share one chain instance instead of each building
//! its own, which is what lets the table dedup by starting-cluster
//! identity and refcount rather than handing out independent state per
//! open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::chain::{ChainGeometry, ClusterChain};
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fat::FatCache;
use crate::freespace::FreeSpaceMap;

/// Identity key for deduping handles: a file and a directory can never
/// share a starting cluster, so this alone disambiguates within a
/// volume (spec §4.5).
pub type ChainIdentity = u32;

pub struct OpenFile<D: BlockDevice> {
    pub chain: Mutex<ClusterChain<D>>,
    pub is_directory: bool,
    pub parent_cluster: u32,
    pub slot_index: u64,
    refcount: Mutex<u32>,
    /// Set when the last open handle's owner unlinked the file while it
    /// was still open; the chain is freed when refcount drops to zero
    /// (spec §4.5/§4.6's delete-on-last-close semantics).
    pending_delete: Mutex<bool>,
}

impl<D: BlockDevice> OpenFile<D> {
    pub fn mark_pending_delete(&self) {
        *self.pending_delete.lock().unwrap() = true;
    }

    pub fn is_pending_delete(&self) -> bool {
        *self.pending_delete.lock().unwrap()
    }
}

/// Table of currently-open files and directories, deduped by starting
/// cluster so concurrent opens of the same path share one
/// materialized chain and one refcount (spec §4.5).
pub struct HandleTable<D: BlockDevice> {
    open: HashMap<ChainIdentity, Arc<OpenFile<D>>>,
}

impl<D: BlockDevice> HandleTable<D> {
    pub fn new() -> Self {
        HandleTable {
            open: HashMap::new(),
        }
    }

    /// Opens (or re-references) the file/directory starting at
    /// `start_cluster`. A `start_cluster` of 0 identifies an
    /// empty, never-written file; spec §4.5 requires these to still be
    /// individually handle-able, so a synthetic key derived from the
    /// parent/slot pair is used instead of sharing a single "cluster 0"
    /// entry among every empty file.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &mut self,
        device: Arc<D>,
        fat: Arc<FatCache<D>>,
        free_space: Arc<Mutex<FreeSpaceMap>>,
        geometry: ChainGeometry,
        start_cluster: u32,
        size: u64,
        is_directory: bool,
        parent_cluster: u32,
        slot_index: u64,
    ) -> Result<Arc<OpenFile<D>>, FsError> {
        let identity = self.identity_for(start_cluster, parent_cluster, slot_index);
        if let Some(existing) = self.open.get(&identity) {
            *existing.refcount.lock().unwrap() += 1;
            return Ok(existing.clone());
        }

        let chain = ClusterChain::materialize(device, fat, free_space, geometry, start_cluster, size)?;
        let handle = Arc::new(OpenFile {
            chain: Mutex::new(chain),
            is_directory,
            parent_cluster,
            slot_index,
            refcount: Mutex::new(1),
            pending_delete: Mutex::new(false),
        });
        self.open.insert(identity, handle.clone());
        Ok(handle)
    }

    fn identity_for(&self, start_cluster: u32, parent_cluster: u32, slot_index: u64) -> ChainIdentity {
        if start_cluster != 0 {
            start_cluster
        } else {
            // Cluster 0 is never a real chain start, so it is safe to
            // fold the parent/slot pair into the unused high bits to
            // build a unique key for as-yet-empty files.
            0x8000_0000
                ^ parent_cluster
                    .wrapping_mul(2654435761)
                    .wrapping_add(slot_index as u32)
        }
    }

    /// Drops one reference. Returns `true` when this was the last
    /// reference and the handle has been removed from the table — the
    /// caller is then responsible for deallocating the chain if
    /// `pending_delete` was set (spec §4.6).
    pub fn close(&mut self, start_cluster: u32, parent_cluster: u32, slot_index: u64) -> bool {
        let identity = self.identity_for(start_cluster, parent_cluster, slot_index);
        let Some(handle) = self.open.get(&identity) else {
            return false;
        };
        let mut refcount = handle.refcount.lock().unwrap();
        *refcount -= 1;
        let last = *refcount == 0;
        drop(refcount);
        if last {
            self.open.remove(&identity);
        }
        last
    }

    pub fn is_open(&self, start_cluster: u32, parent_cluster: u32, slot_index: u64) -> bool {
        self.open
            .contains_key(&self.identity_for(start_cluster, parent_cluster, slot_index))
    }
}

impl<D: BlockDevice> Default for HandleTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    fn fixture() -> (Arc<MemDevice>, Arc<FatCache<MemDevice>>, Arc<Mutex<FreeSpaceMap>>, ChainGeometry) {
        let device = Arc::new(MemDevice::zeroed(512 * 16));
        let fat = Arc::new(FatCache::new(device.clone(), 0, None, 512));
        let free_space = Arc::new(Mutex::new(FreeSpaceMap::scan(&fat, 8).unwrap()));
        let geometry = ChainGeometry {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            data_start_sector: 0,
        };
        (device, fat, free_space, geometry)
    }

    #[test]
    fn two_opens_of_the_same_cluster_share_one_handle() {
        let (device, fat, free_space, geometry) = fixture();
        let mut table = HandleTable::new();
        let a = table
            .open(device.clone(), fat.clone(), free_space.clone(), geometry, 2, 0, false, 0, 0)
            .unwrap();
        let b = table
            .open(device, fat, free_space, geometry, 2, 0, false, 0, 0)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_only_removes_on_last_reference() {
        let (device, fat, free_space, geometry) = fixture();
        let mut table = HandleTable::new();
        table
            .open(device.clone(), fat.clone(), free_space.clone(), geometry, 2, 0, false, 0, 0)
            .unwrap();
        table
            .open(device, fat, free_space, geometry, 2, 0, false, 0, 0)
            .unwrap();
        assert!(!table.close(2, 0, 0));
        assert!(table.is_open(2, 0, 0));
        assert!(table.close(2, 0, 0));
        assert!(!table.is_open(2, 0, 0));
    }

    #[test]
    fn distinct_empty_files_get_distinct_identities() {
        let (device, fat, free_space, geometry) = fixture();
        let mut table = HandleTable::new();
        let a = table
            .open(device.clone(), fat.clone(), free_space.clone(), geometry, 0, 0, false, 5, 0)
            .unwrap();
        let b = table
            .open(device, fat, free_space, geometry, 0, 0, false, 5, 1)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
