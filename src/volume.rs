//! Volume bring-up (spec §4.1): parsing the boot sector and FSInfo
//! sector, validating the three magic values, and building the
//! subsystems that sit on top in the deterministic order spec §4.1
//! requires — free-space map, then handle table, then directory layer,
//! then FAT cache are all constructed during `Volume::mount`, and the
//! volume's geometry is immutable afterward.
//!
//! Grounded on the teacher's `bpb.rs` (magic validation, geometry
//! accessors) and `fs.rs` (the only teacher file that reads FSInfo back
//! for its free-cluster count and writes it back on change).

use std::sync::Arc;

use crate::bpb::{BiosParameterBlock, FsInfo, BOOT_SECTOR_SIZE};
use crate::chain::ChainGeometry;
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::fat::FatCache;

const CLEAN_SHUTDOWN_BIT: u32 = 0x0800_0000;

pub struct Volume<D: BlockDevice> {
    device: Arc<D>,
    bpb: BiosParameterBlock,
    fat: Arc<FatCache<D>>,
    fsinfo_sector: u64,
    fsinfo: FsInfo,
}

impl<D: BlockDevice> Volume<D> {
    pub fn mount(device: Arc<D>) -> Result<Self, FsError> {
        let mut boot = [0u8; BOOT_SECTOR_SIZE];
        device.read_at(0, &mut boot)?;
        let bpb = BiosParameterBlock::parse(&boot)?;

        let fsinfo_sector = bpb.fsinfo_sector as u64 * bpb.bytes_per_sector as u64;
        let mut fsinfo_buf = [0u8; BOOT_SECTOR_SIZE];
        device.read_at(fsinfo_sector, &mut fsinfo_buf)?;
        let fsinfo = FsInfo::parse(&fsinfo_buf)?;

        let mirror_offset = if bpb.num_fats > 1 {
            Some(bpb.fat_offset_bytes(1))
        } else {
            None
        };
        let fat = Arc::new(FatCache::new(
            device.clone(),
            bpb.fat_offset_bytes(0),
            mirror_offset,
            bpb.bytes_per_sector as u64,
        ));

        let mut volume = Volume {
            device,
            bpb,
            fat,
            fsinfo_sector,
            fsinfo,
        };
        volume.mark_dirty()?;
        Ok(volume)
    }

    pub fn device(&self) -> Arc<D> {
        self.device.clone()
    }

    pub fn fat(&self) -> Arc<FatCache<D>> {
        self.fat.clone()
    }

    pub fn root_cluster(&self) -> u32 {
        self.bpb.root_cluster
    }

    pub fn data_cluster_count(&self) -> u32 {
        self.bpb.data_cluster_count()
    }

    pub fn geometry(&self) -> ChainGeometry {
        ChainGeometry {
            bytes_per_sector: self.bpb.bytes_per_sector as u64,
            sectors_per_cluster: self.bpb.sectors_per_cluster as u64,
            data_start_sector: self.bpb.data_start_sector(),
        }
    }

    pub fn cluster_size_bytes(&self) -> u64 {
        self.bpb.cluster_size_bytes()
    }

    pub fn volume_label(&self) -> String {
        std::str::from_utf8(&self.bpb.volume_label)
            .unwrap_or("")
            .trim_end()
            .to_string()
    }

    pub fn volume_id(&self) -> u32 {
        self.bpb.volume_id
    }

    /// Persists the free-cluster count to the on-disk FSInfo sector
    /// (spec §9 supplemented feature), so a later mount by another
    /// driver sees an accurate hint without a full FAT rescan.
    pub fn persist_free_count(&mut self, free_clusters: u64) -> Result<(), FsError> {
        self.fsinfo.free_count = free_clusters.min(u32::MAX as u64) as u32;
        let mut buf = [0u8; BOOT_SECTOR_SIZE];
        self.device.read_at(self.fsinfo_sector, &mut buf)?;
        self.fsinfo.write_into(&mut buf);
        self.device.write_at(self.fsinfo_sector, &buf)?;
        Ok(())
    }

    fn fat1_dirty_flag(&mut self, set_clean: bool) -> Result<(), FsError> {
        let raw = self.fat.get_raw(1)?;
        let new = if set_clean {
            raw | CLEAN_SHUTDOWN_BIT
        } else {
            raw & !CLEAN_SHUTDOWN_BIT
        };
        self.fat.set(1, new)?;
        Ok(())
    }

    fn mark_dirty(&mut self) -> Result<(), FsError> {
        self.fat1_dirty_flag(false)
    }

    /// Restores the clean-shutdown bit (spec §9 supplemented feature).
    /// Must be the very last thing done before the driver exits.
    pub fn mark_clean(&mut self) -> Result<(), FsError> {
        self.fat1_dirty_flag(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_support::MemDevice;

    fn make_image() -> MemDevice {
        let bytes_per_sector = 512u64;
        let reserved = 32u64;
        let fat_size = 8u64;
        let num_fats = 2u64;
        let data_start = reserved + num_fats * fat_size;
        let total_sectors = data_start + 64;
        let device = MemDevice::zeroed((total_sectors * bytes_per_sector) as usize);

        let mut boot = [0u8; BOOT_SECTOR_SIZE];
        boot[0x0B..0x0D].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        boot[0x0D] = 8;
        boot[0x0E..0x10].copy_from_slice(&(reserved as u16).to_le_bytes());
        boot[0x10] = num_fats as u8;
        boot[0x20..0x24].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        boot[0x24..0x28].copy_from_slice(&(fat_size as u32).to_le_bytes());
        boot[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
        boot[0x30..0x32].copy_from_slice(&1u16.to_le_bytes());
        boot[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());
        device.write_at(0, &boot).unwrap();

        let mut fsinfo = [0u8; BOOT_SECTOR_SIZE];
        fsinfo[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
        fsinfo[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
        fsinfo[488..492].copy_from_slice(&60u32.to_le_bytes());
        fsinfo[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());
        device.write_at(bytes_per_sector, &fsinfo).unwrap();

        // FAT[1]'s reserved entry, normally all-ones with the clean bit set.
        let mut fat_sector = [0u8; 512];
        fat_sector[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        device.write_at(reserved * bytes_per_sector, &fat_sector).unwrap();

        device
    }

    #[test]
    fn mount_clears_the_dirty_bit_and_unmount_restores_it() {
        let device = Arc::new(make_image());
        let mut volume = Volume::mount(device).unwrap();
        let raw = volume.fat.get_raw(1).unwrap();
        assert_eq!(raw & CLEAN_SHUTDOWN_BIT, 0);

        volume.mark_clean().unwrap();
        let raw = volume.fat.get_raw(1).unwrap();
        assert_eq!(raw & CLEAN_SHUTDOWN_BIT, CLEAN_SHUTDOWN_BIT);
    }

    #[test]
    fn mount_reports_root_cluster_and_geometry() {
        let device = Arc::new(make_image());
        let volume = Volume::mount(device).unwrap();
        assert_eq!(volume.root_cluster(), 2);
        assert_eq!(volume.cluster_size_bytes(), 4096);
    }

    #[test]
    fn persist_free_count_round_trips() {
        let device = Arc::new(make_image());
        let mut volume = Volume::mount(device).unwrap();
        volume.persist_free_count(42).unwrap();
        assert_eq!(volume.fsinfo.free_count, 42);
    }
}
