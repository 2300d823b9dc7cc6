//! The filesystem façade (spec §4.7): the single entry point the
//! external collaborator drives, bundling every subsystem behind one
//! mutex per spec §5's single-threaded-cooperative concurrency model.
//!
//! Grounded on the teacher's `fs.rs::FileSystem` (the struct that holds
//! the device, FAT manager and free-cluster count together and exposes
//! `open`/`alloc_cluster`/`dealloc_cluster` as one API), generalized
//! into the full operation set spec §4.7 names and wrapped in a single
//! `std::sync::Mutex` instead of per-field `RwLock`s, since spec §5
//! explicitly calls for one lock around all mutable state rather than
//! scattered fine-grained locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::attrs::{Attributes, FileKind, VolumeStats};
use crate::chain::{ChainGeometry, ClusterChain, SeekFrom};
use crate::device::BlockDevice;
use crate::direntry::{DirEntry, ATTR_ARCHIVE, ATTR_DIRECTORY};
use crate::dirtable::DirTable;
use crate::error::{DirError, FsError};
use crate::fat::FatCache;
use crate::freespace::FreeSpaceMap;
use crate::handle::{HandleTable, OpenFile};
use crate::path::{self, Resolved};
use crate::time::DosTimestamp;
use crate::volume::Volume;

pub type FileHandleId = u64;

struct ExternalHandle<D: BlockDevice> {
    start_cluster: u32,
    parent_cluster: u32,
    slot_index: u64,
    open_file: Arc<OpenFile<D>>,
}

struct State<D: BlockDevice> {
    volume: Volume<D>,
    handles: HandleTable<D>,
    external: HashMap<FileHandleId, ExternalHandle<D>>,
    next_handle_id: FileHandleId,
}

impl<D: BlockDevice> State<D> {
    fn find_open_file(
        &self,
        start_cluster: u32,
        parent_cluster: u32,
        slot_index: u64,
    ) -> Option<Arc<OpenFile<D>>> {
        self.external
            .values()
            .find(|h| {
                h.start_cluster == start_cluster
                    && h.parent_cluster == parent_cluster
                    && h.slot_index == slot_index
            })
            .map(|h| h.open_file.clone())
    }
}

pub struct Filesystem<D: BlockDevice> {
    device: Arc<D>,
    fat: Arc<FatCache<D>>,
    free_space: Arc<Mutex<FreeSpaceMap>>,
    geometry: ChainGeometry,
    state: Mutex<State<D>>,
}

impl<D: BlockDevice> Filesystem<D> {
    pub fn mount(device: Arc<D>) -> Result<Self, FsError> {
        let volume = Volume::mount(device.clone())?;
        let fat = volume.fat();
        let free_space = Arc::new(Mutex::new(FreeSpaceMap::scan(
            &fat,
            volume.data_cluster_count(),
        )?));
        let geometry = volume.geometry();
        info!(
            "mounted volume \"{}\", {} free clusters of {}",
            volume.volume_label(),
            free_space.lock().unwrap().free_cluster_count(),
            volume.data_cluster_count()
        );

        Ok(Filesystem {
            device,
            fat,
            free_space,
            geometry,
            state: Mutex::new(State {
                volume,
                handles: HandleTable::new(),
                external: HashMap::new(),
                next_handle_id: 1,
            }),
        })
    }

    /// Flushes the clean-shutdown bit. The external collaborator calls
    /// this once, as the very last step before the process exits.
    pub fn unmount(&self) -> Result<(), FsError> {
        self.state.lock().unwrap().volume.mark_clean()
    }

    pub fn statfs(&self) -> VolumeStats {
        let state = self.state.lock().unwrap();
        VolumeStats {
            cluster_size: state.volume.cluster_size_bytes(),
            total_clusters: state.volume.data_cluster_count() as u64,
            free_clusters: self.free_space.lock().unwrap().free_cluster_count(),
            max_name_len: 11,
        }
    }

    fn root_cluster(&self) -> u32 {
        self.state.lock().unwrap().volume.root_cluster()
    }

    fn open_dir_chain(&self, start_cluster: u32) -> Result<ClusterChain<D>, FsError> {
        let mut chain = ClusterChain::materialize(
            self.device.clone(),
            self.fat.clone(),
            self.free_space.clone(),
            self.geometry,
            start_cluster,
            0,
        )?;
        chain.set_size_to_capacity();
        Ok(chain)
    }

    fn resolve(&self, root: u32, path: &str) -> Result<Resolved, FsError> {
        path::resolve(
            self.device.clone(),
            self.fat.clone(),
            self.free_space.clone(),
            self.geometry,
            root,
            path,
        )
    }

    fn resolve_parent(&self, root: u32, path: &str) -> Result<(u32, [u8; 8], [u8; 3]), FsError> {
        path::resolve_parent(
            self.device.clone(),
            self.fat.clone(),
            self.free_space.clone(),
            self.geometry,
            root,
            path,
        )
    }

    pub fn lookup_attrs(&self, path: &str) -> Result<Attributes, FsError> {
        let root = self.root_cluster();
        match self.resolve(root, path)? {
            Resolved::Root => Ok(Attributes {
                inode: root,
                kind: FileKind::Directory,
                read_only: false,
                size: 0,
                cluster_size: self.geometry.cluster_size_bytes(),
                created_unix: 0,
                modified_unix: 0,
                accessed_unix: 0,
            }),
            Resolved::Entry { entry, .. } => Ok(Attributes::from_entry(
                &entry,
                self.geometry.cluster_size_bytes(),
            )),
        }
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<(String, Attributes)>, FsError> {
        let root = self.root_cluster();
        let start_cluster = match self.resolve(root, path)? {
            Resolved::Root => root,
            Resolved::Entry { entry, .. } => {
                if !entry.is_directory() {
                    return Err(FsError::NotADirectory);
                }
                entry.first_cluster
            }
        };

        let mut chain = self.open_dir_chain(start_cluster)?;
        let mut table = DirTable::new(&mut chain);
        let mut out = Vec::new();
        table.for_each_occupied(|_, entry| {
            if entry.is_volume_id() {
                return;
            }
            out.push((
                entry.display_name(),
                Attributes::from_entry(entry, self.geometry.cluster_size_bytes()),
            ));
        })?;
        Ok(out)
    }

    /// Opens an existing regular file for cursor-based I/O (spec
    /// §4.4/§4.5). Directories are read through `readdir`, not this.
    pub fn open(&self, path: &str) -> Result<FileHandleId, FsError> {
        let root = self.root_cluster();
        let (entry, parent_cluster, slot_index) = match self.resolve(root, path)? {
            Resolved::Root => return Err(FsError::NotADirectory),
            Resolved::Entry {
                entry,
                parent_cluster,
                slot_index,
            } => (entry, parent_cluster, slot_index),
        };
        if entry.is_directory() {
            return Err(FsError::NotADirectory);
        }

        let mut state = self.state.lock().unwrap();
        let open_file = state.handles.open(
            self.device.clone(),
            self.fat.clone(),
            self.free_space.clone(),
            self.geometry,
            entry.first_cluster,
            entry.file_size as u64,
            false,
            parent_cluster,
            slot_index,
        )?;
        let id = self.register_handle(&mut state, entry.first_cluster, parent_cluster, slot_index, open_file);
        debug!("open {path} -> handle {id}");
        Ok(id)
    }

    /// Creates a new, empty regular file and opens it (spec §4.6/§4.5;
    /// the combined create-and-open contract POSIX `O_CREAT` expects).
    pub fn create(&self, path: &str) -> Result<FileHandleId, FsError> {
        let root = self.root_cluster();
        let (parent_cluster, name, extension) = self.resolve_parent(root, path)?;

        let mut parent_chain = self.open_dir_chain(parent_cluster)?;
        let mut table = DirTable::new(&mut parent_chain);
        if table.find_by_name(&name, &extension)?.is_some() {
            return Err(FsError::InvalidArgument);
        }

        let now = current_time_placeholder();
        let mut entry = DirEntry::empty();
        entry.name = name;
        entry.extension = extension;
        entry.attr = ATTR_ARCHIVE;
        entry.set_times_from_unix(now, now, now);
        let slot_index = table.append(&entry)?;

        let mut state = self.state.lock().unwrap();
        let open_file = state.handles.open(
            self.device.clone(),
            self.fat.clone(),
            self.free_space.clone(),
            self.geometry,
            0,
            0,
            false,
            parent_cluster,
            slot_index,
        )?;
        let id = self.register_handle(&mut state, 0, parent_cluster, slot_index, open_file);
        Ok(id)
    }

    fn register_handle(
        &self,
        state: &mut MutexGuard<State<D>>,
        start_cluster: u32,
        parent_cluster: u32,
        slot_index: u64,
        open_file: Arc<OpenFile<D>>,
    ) -> FileHandleId {
        let id = state.next_handle_id;
        state.next_handle_id += 1;
        state.external.insert(
            id,
            ExternalHandle {
                start_cluster,
                parent_cluster,
                slot_index,
                open_file,
            },
        );
        id
    }

    pub fn seek(&self, handle: FileHandleId, from: SeekFrom) -> Result<u64, FsError> {
        let state = self.state.lock().unwrap();
        let external = state.external.get(&handle).ok_or(FsError::InvalidArgument)?;
        let mut chain = external.open_file.chain.lock().unwrap();
        Ok(chain.seek(from)?)
    }

    pub fn read(&self, handle: FileHandleId, buf: &mut [u8]) -> Result<usize, FsError> {
        let state = self.state.lock().unwrap();
        let external = state.external.get(&handle).ok_or(FsError::InvalidArgument)?;
        let mut chain = external.open_file.chain.lock().unwrap();
        Ok(chain.read(buf)?)
    }

    pub fn write(&self, handle: FileHandleId, buf: &[u8]) -> Result<usize, FsError> {
        let state = self.state.lock().unwrap();
        let external = state.external.get(&handle).ok_or(FsError::InvalidArgument)?;
        let mut chain = external.open_file.chain.lock().unwrap();
        let written = chain.write(buf)?;
        let new_size = chain.len();
        let new_start = chain.start_cluster();
        let pending_delete = external.open_file.is_pending_delete();
        drop(chain);
        if !pending_delete {
            self.sync_entry_after_write(external, new_start, new_size)?;
        }
        Ok(written)
    }

    fn sync_entry_after_write(
        &self,
        external: &ExternalHandle<D>,
        new_start: u32,
        new_size: u64,
    ) -> Result<(), FsError> {
        let mut parent_chain = self.open_dir_chain(external.parent_cluster)?;
        let mut table = DirTable::new(&mut parent_chain);
        let mut entry = table.read_slot(external.slot_index)?;
        entry.first_cluster = new_start;
        entry.file_size = new_size.min(u32::MAX as u64) as u32;
        table.write_slot(external.slot_index, &entry)?;
        Ok(())
    }

    pub fn truncate(&self, handle: FileHandleId, size: u64) -> Result<(), FsError> {
        let state = self.state.lock().unwrap();
        let external = state.external.get(&handle).ok_or(FsError::InvalidArgument)?;
        let mut chain = external.open_file.chain.lock().unwrap();
        chain.truncate(size)?;
        let new_start = chain.start_cluster();
        let pending_delete = external.open_file.is_pending_delete();
        drop(chain);
        if pending_delete {
            Ok(())
        } else {
            self.sync_entry_after_write(external, new_start, size)
        }
    }

    pub fn close(&self, handle: FileHandleId) -> Result<(), FsError> {
        let mut state = self.state.lock().unwrap();
        let Some(external) = state.external.remove(&handle) else {
            return Ok(());
        };
        let last = state.handles.close(
            external.start_cluster,
            external.parent_cluster,
            external.slot_index,
        );
        if last && external.open_file.is_pending_delete() {
            let mut chain = external.open_file.chain.lock().unwrap();
            chain.deallocate()?;
        }
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let root = self.root_cluster();
        let (parent_cluster, name, extension) = self.resolve_parent(root, path)?;

        let mut parent_chain = self.open_dir_chain(parent_cluster)?;
        let mut table = DirTable::new(&mut parent_chain);
        if table.find_by_name(&name, &extension)?.is_some() {
            return Err(FsError::InvalidArgument);
        }

        let new_cluster = self
            .free_space
            .lock()
            .unwrap()
            .allocate_for_new_file()
            .ok_or(FsError::OutOfSpace)?;
        self.fat.set(new_cluster, crate::fat::END_OF_CHAIN)?;
        self.zero_cluster(new_cluster)?;

        let now = current_time_placeholder();
        let mut entry = DirEntry::empty();
        entry.name = name;
        entry.extension = extension;
        entry.attr = ATTR_DIRECTORY;
        entry.first_cluster = new_cluster;
        entry.set_times_from_unix(now, now, now);
        table.append(&entry)?;

        self.write_dot_entries(new_cluster, parent_cluster, now)?;
        Ok(())
    }

    fn zero_cluster(&self, cluster: u32) -> Result<(), FsError> {
        let zeros = vec![0u8; self.geometry.cluster_size_bytes() as usize];
        self.device
            .write_at(self.geometry.cluster_offset_bytes(cluster), &zeros)?;
        Ok(())
    }

    fn write_dot_entries(&self, dir_cluster: u32, parent_cluster: u32, now: i64) -> Result<(), FsError> {
        let mut chain = self.open_dir_chain(dir_cluster)?;
        let mut table = DirTable::new(&mut chain);

        let mut dot = DirEntry::empty();
        dot.name = *b".       ";
        dot.extension = *b"   ";
        dot.attr = ATTR_DIRECTORY;
        dot.first_cluster = dir_cluster;
        dot.set_times_from_unix(now, now, now);
        table.append(&dot)?;

        let mut dotdot = DirEntry::empty();
        dotdot.name = *b"..      ";
        dotdot.extension = *b"   ";
        dotdot.attr = ATTR_DIRECTORY;
        // The root directory has no cluster number of its own in a
        // `..` entry, per spec §6; `0` is the documented sentinel.
        dotdot.first_cluster = parent_cluster;
        dotdot.set_times_from_unix(now, now, now);
        table.append(&dotdot)?;
        Ok(())
    }

    pub fn unlink(&self, path: &str) -> Result<(), FsError> {
        self.remove(path, false)
    }

    pub fn rmdir(&self, path: &str) -> Result<(), FsError> {
        self.remove(path, true)
    }

    fn remove(&self, path: &str, expect_directory: bool) -> Result<(), FsError> {
        let root = self.root_cluster();
        let (entry, parent_cluster, slot_index) = match self.resolve(root, path)? {
            Resolved::Root => return Err(FsError::InvalidArgument),
            Resolved::Entry {
                entry,
                parent_cluster,
                slot_index,
            } => (entry, parent_cluster, slot_index),
        };
        if entry.is_directory() != expect_directory {
            return Err(if expect_directory {
                FsError::NotADirectory
            } else {
                FsError::InvalidArgument
            });
        }
        if expect_directory {
            let mut chain = self.open_dir_chain(entry.first_cluster)?;
            let mut table = DirTable::new(&mut chain);
            let mut live_entries = 0;
            table.for_each_occupied(|_, e| {
                if e.display_name() != "." && e.display_name() != ".." {
                    live_entries += 1;
                }
            })?;
            if live_entries > 0 {
                return Err(DirError::NotEmpty.into());
            }
        }

        let mut state = self.state.lock().unwrap();
        let still_open = state
            .handles
            .is_open(entry.first_cluster, parent_cluster, slot_index);

        let mut parent_chain = self.open_dir_chain(parent_cluster)?;
        let mut table = DirTable::new(&mut parent_chain);
        table.delete(slot_index)?;

        if still_open {
            // Deallocation is deferred to `close` (spec §4.6's
            // delete-on-last-close semantics); mark it for cleanup.
            if let Some(open_file) =
                state.find_open_file(entry.first_cluster, parent_cluster, slot_index)
            {
                open_file.mark_pending_delete();
            }
        } else {
            drop(state);
            let mut chain = self.open_dir_chain(entry.first_cluster)?;
            chain.deallocate()?;
        }
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let root = self.root_cluster();

        let (entry, old_parent, old_slot) = match self.resolve(root, from)? {
            Resolved::Root => return Err(FsError::InvalidArgument),
            Resolved::Entry {
                entry,
                parent_cluster,
                slot_index,
            } => (entry, parent_cluster, slot_index),
        };
        let (new_parent, new_name, new_extension) = self.resolve_parent(root, to)?;

        {
            let mut dest_chain = self.open_dir_chain(new_parent)?;
            let mut dest_table = DirTable::new(&mut dest_chain);
            if dest_table.find_by_name(&new_name, &new_extension)?.is_some() {
                return Err(FsError::InvalidArgument);
            }
        }

        let mut moved = entry;
        moved.name = new_name;
        moved.extension = new_extension;

        {
            let mut dest_chain = self.open_dir_chain(new_parent)?;
            let mut dest_table = DirTable::new(&mut dest_chain);
            dest_table.append(&moved)?;
        }
        {
            let mut src_chain = self.open_dir_chain(old_parent)?;
            let mut src_table = DirTable::new(&mut src_chain);
            src_table.delete(old_slot)?;
        }
        Ok(())
    }

    pub fn set_times(
        &self,
        path: &str,
        modified_unix: Option<i64>,
        accessed_unix: Option<i64>,
    ) -> Result<(), FsError> {
        let root = self.root_cluster();
        let (parent_cluster, slot_index) = match self.resolve(root, path)? {
            Resolved::Root => return Err(FsError::InvalidArgument),
            Resolved::Entry {
                parent_cluster,
                slot_index,
                ..
            } => (parent_cluster, slot_index),
        };
        let mut chain = self.open_dir_chain(parent_cluster)?;
        let mut table = DirTable::new(&mut chain);
        let mut entry = table.read_slot(slot_index)?;
        if let Some(modified) = modified_unix {
            let w = DosTimestamp::from_unix(modified);
            entry.write_date = w.date;
            entry.write_time = w.time;
        }
        if let Some(accessed) = accessed_unix {
            let a = DosTimestamp::from_unix(accessed);
            entry.last_access_date = a.date;
        }
        table.write_slot(slot_index, &entry)?;
        Ok(())
    }
}

/// Timestamps for newly-created entries. The façade has no wall-clock
/// dependency of its own; the external collaborator supplies real
/// creation/modification times once wired to a clock source (spec §9:
/// avoid hidden ambient state in the core).
fn current_time_placeholder() -> i64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    fn make_image() -> Arc<MemDevice> {
        let bytes_per_sector = 512u64;
        let reserved = 32u64;
        let fat_size = 8u64;
        let num_fats = 2u64;
        let data_start = reserved + num_fats * fat_size;
        let total_sectors = data_start + 64;
        let device = MemDevice::zeroed((total_sectors * bytes_per_sector) as usize);

        let mut boot = [0u8; crate::bpb::BOOT_SECTOR_SIZE];
        boot[0x0B..0x0D].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        boot[0x0D] = 1;
        boot[0x0E..0x10].copy_from_slice(&(reserved as u16).to_le_bytes());
        boot[0x10] = num_fats as u8;
        boot[0x20..0x24].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        boot[0x24..0x28].copy_from_slice(&(fat_size as u32).to_le_bytes());
        boot[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
        boot[0x30..0x32].copy_from_slice(&1u16.to_le_bytes());
        boot[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
        device.write_at(0, &boot).unwrap();

        let mut fsinfo = [0u8; crate::bpb::BOOT_SECTOR_SIZE];
        fsinfo[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
        fsinfo[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
        fsinfo[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
        device.write_at(bytes_per_sector, &fsinfo).unwrap();

        let mut root_cluster_sector = [0u8; 512];
        root_cluster_sector[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        device
            .write_at(reserved * bytes_per_sector, &root_cluster_sector)
            .unwrap();

        Arc::new(device)
    }

    #[test]
    fn create_write_read_close_round_trips() {
        let fs = Filesystem::mount(make_image()).unwrap();
        let handle = fs.create("/hello.txt").unwrap();
        fs.write(handle, b"hi there").unwrap();
        fs.close(handle).unwrap();

        let handle = fs.open("/hello.txt").unwrap();
        let mut buf = [0u8; 8];
        let n = fs.read(handle, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");
        fs.close(handle).unwrap();
    }

    #[test]
    fn mkdir_then_readdir_lists_only_real_entries() {
        let fs = Filesystem::mount(make_image()).unwrap();
        fs.mkdir("/sub").unwrap();
        let listing = fs.readdir("/").unwrap();
        assert!(listing.iter().any(|(name, attrs)| name == "SUB" && attrs.kind == FileKind::Directory));

        let sub_listing = fs.readdir("/sub").unwrap();
        let names: Vec<_> = sub_listing.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
    }

    #[test]
    fn unlink_removes_the_entry() {
        let fs = Filesystem::mount(make_image()).unwrap();
        let handle = fs.create("/a.txt").unwrap();
        fs.close(handle).unwrap();
        fs.unlink("/a.txt").unwrap();
        assert!(fs.lookup_attrs("/a.txt").is_err());
    }

    #[test]
    fn rmdir_refuses_a_nonempty_directory() {
        let fs = Filesystem::mount(make_image()).unwrap();
        fs.mkdir("/sub").unwrap();
        let handle = fs.create("/sub/file.txt").unwrap();
        fs.close(handle).unwrap();
        assert!(fs.rmdir("/sub").is_err());
    }

    #[test]
    fn rename_moves_an_entry_between_directories() {
        let fs = Filesystem::mount(make_image()).unwrap();
        let handle = fs.create("/a.txt").unwrap();
        fs.close(handle).unwrap();
        fs.mkdir("/sub").unwrap();
        fs.rename("/a.txt", "/sub/b.txt").unwrap();
        assert!(fs.lookup_attrs("/a.txt").is_err());
        assert!(fs.lookup_attrs("/sub/b.txt").is_ok());
    }
}
