//! Path resolution (spec §4.6): turning a POSIX-style path into a
//! resolved directory slot, walking one 8.3 component at a time.
//!
//! Grounded on the teacher's `dir.rs::Dir::find`, generalized from a
//! single-directory lookup into a full path walk, and on `vfs.rs`'s
//! `root()` constructor for the synthetic root entry every walk starts
//! from.

use std::sync::{Arc, Mutex};

use crate::chain::{ChainGeometry, ClusterChain};
use crate::device::BlockDevice;
use crate::direntry::{split_short_name, DirEntry};
use crate::dirtable::DirTable;
use crate::error::FsError;
use crate::fat::FatCache;
use crate::freespace::FreeSpaceMap;

/// What a full-path resolution found.
pub enum Resolved {
    /// The path named the volume root, which has no directory slot of
    /// its own (spec §2: the root directory predates any entry).
    Root,
    Entry {
        entry: DirEntry,
        parent_cluster: u32,
        slot_index: u64,
    },
}

/// Splits a POSIX path into its non-empty components.
pub fn split_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

#[allow(clippy::too_many_arguments)]
fn open_dir_chain<D: BlockDevice>(
    device: Arc<D>,
    fat: Arc<FatCache<D>>,
    free_space: Arc<Mutex<FreeSpaceMap>>,
    geometry: ChainGeometry,
    start_cluster: u32,
) -> Result<ClusterChain<D>, FsError> {
    // A directory's chain has no independently-tracked size; its
    // length is simply "as many clusters as the FAT chain has".
    let mut chain =
        ClusterChain::materialize(device, fat, free_space, geometry, start_cluster, 0)?;
    chain.set_size_to_capacity();
    Ok(chain)
}

#[allow(clippy::too_many_arguments)]
pub fn resolve<D: BlockDevice>(
    device: Arc<D>,
    fat: Arc<FatCache<D>>,
    free_space: Arc<Mutex<FreeSpaceMap>>,
    geometry: ChainGeometry,
    root_cluster: u32,
    path: &str,
) -> Result<Resolved, FsError> {
    let components = split_components(path);
    if components.is_empty() {
        return Ok(Resolved::Root);
    }

    let mut current_cluster = root_cluster;
    for (depth, component) in components.iter().enumerate() {
        let (name, extension) =
            split_short_name(component).ok_or(FsError::InvalidArgument)?;
        let mut chain = open_dir_chain(
            device.clone(),
            fat.clone(),
            free_space.clone(),
            geometry,
            current_cluster,
        )?;
        let mut table = DirTable::new(&mut chain);
        let (slot_index, entry) = table
            .find_by_name(&name, &extension)
            .map_err(|_| FsError::NoSuchEntry)?
            .ok_or(FsError::NoSuchEntry)?;

        let is_last = depth == components.len() - 1;
        if is_last {
            return Ok(Resolved::Entry {
                entry,
                parent_cluster: current_cluster,
                slot_index,
            });
        }
        if !entry.is_directory() {
            return Err(FsError::NotADirectory);
        }
        current_cluster = entry.first_cluster;
    }
    unreachable!("loop always returns on its last iteration")
}

/// Resolves everything but the final component, for operations like
/// `create`/`mkdir`/`rename` that need the parent directory's cluster
/// and the leaf's would-be 8.3 name without requiring the leaf to
/// already exist.
#[allow(clippy::too_many_arguments)]
pub fn resolve_parent<D: BlockDevice>(
    device: Arc<D>,
    fat: Arc<FatCache<D>>,
    free_space: Arc<Mutex<FreeSpaceMap>>,
    geometry: ChainGeometry,
    root_cluster: u32,
    path: &str,
) -> Result<(u32, [u8; 8], [u8; 3]), FsError> {
    let components = split_components(path);
    let (leaf, parents) = components.split_last().ok_or(FsError::InvalidArgument)?;
    let (name, extension) = split_short_name(leaf).ok_or(FsError::InvalidArgument)?;

    let mut current_cluster = root_cluster;
    for component in parents {
        let (pname, pext) = split_short_name(component).ok_or(FsError::InvalidArgument)?;
        let mut chain = open_dir_chain(
            device.clone(),
            fat.clone(),
            free_space.clone(),
            geometry,
            current_cluster,
        )?;
        let mut table = DirTable::new(&mut chain);
        let (_, entry) = table
            .find_by_name(&pname, &pext)
            .map_err(|_| FsError::NoSuchEntry)?
            .ok_or(FsError::NoSuchEntry)?;
        if !entry.is_directory() {
            return Err(FsError::NotADirectory);
        }
        current_cluster = entry.first_cluster;
    }
    Ok((current_cluster, name, extension))
}
