//! The portable attribute record and statvfs record the façade returns
//! to callers (spec §4.7, §6).
//!
//! Grounded on the teacher's `vfs.rs`/`fs.rs` accessors that expose
//! cluster size, free cluster count and attribute bits piecemeal;
//! collected here into the two structs spec §6 names explicitly so the
//! bridge layer has one self-contained record per call instead of
//! several accessor calls.

use crate::direntry::{DirEntry, ATTR_DIRECTORY, ATTR_READ_ONLY};
use crate::time::DosTimestamp;

/// File kind as the façade reports it (spec §6's Non-goals exclude any
/// POSIX type beyond regular file and directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
}

/// A portable attribute record, independent of any bridge framework's
/// own attribute type.
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    /// The entry's starting cluster, used as its inode number — stable
    /// for the file's lifetime and unique within the volume (spec §4.5).
    pub inode: u32,
    pub kind: FileKind,
    pub read_only: bool,
    pub size: u64,
    pub cluster_size: u64,
    pub created_unix: i64,
    pub modified_unix: i64,
    pub accessed_unix: i64,
}

impl Attributes {
    pub fn from_entry(entry: &DirEntry, cluster_size: u64) -> Self {
        let kind = if entry.attr & ATTR_DIRECTORY != 0 {
            FileKind::Directory
        } else {
            FileKind::RegularFile
        };
        let created = DosTimestamp {
            date: entry.create_date,
            time: entry.create_time,
            time_tenth: entry.create_time_tenth,
        };
        let modified = DosTimestamp {
            date: entry.write_date,
            time: entry.write_time,
            time_tenth: 0,
        };
        let accessed = DosTimestamp {
            date: entry.last_access_date,
            time: 0,
            time_tenth: 0,
        };
        Attributes {
            inode: entry.first_cluster,
            kind,
            read_only: entry.attr & ATTR_READ_ONLY != 0,
            size: entry.file_size as u64,
            cluster_size,
            created_unix: created.to_unix(),
            modified_unix: modified.to_unix(),
            accessed_unix: accessed.to_unix(),
        }
    }

    /// Unix permission mode bits: `0o755`/`0o555` for directories,
    /// `0o644`/`0o444` for regular files, write bits dropped when the
    /// DOS read-only bit is set (spec §9 supplemented feature — POSIX
    /// ownership beyond the read-only bit remains a Non-goal).
    pub fn mode_bits(&self) -> u32 {
        let base = match self.kind {
            FileKind::Directory => 0o755,
            FileKind::RegularFile => 0o644,
        };
        if self.read_only {
            base & !0o222
        } else {
            base
        }
    }

    /// Block count in 512-byte units, covering every cluster the chain
    /// occupies including a partially-filled final cluster — see
    /// DESIGN.md's note on this open question.
    pub fn block_count_512(&self) -> u64 {
        self.size.div_ceil(self.cluster_size) * (self.cluster_size / 512)
    }
}

/// The volume-wide record backing `statfs`/`statvfs` (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct VolumeStats {
    pub cluster_size: u64,
    pub total_clusters: u64,
    pub free_clusters: u64,
    /// `11`: the longest name this driver can represent, an 8.3 short
    /// name with no separator stored (spec Non-goals: no long names).
    pub max_name_len: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_directories_drop_write_bits() {
        let attrs = Attributes {
            inode: 2,
            kind: FileKind::Directory,
            read_only: true,
            size: 0,
            cluster_size: 4096,
            created_unix: 0,
            modified_unix: 0,
            accessed_unix: 0,
        };
        assert_eq!(attrs.mode_bits(), 0o555);
    }

    #[test]
    fn block_count_rounds_up_a_partial_final_cluster() {
        let attrs = Attributes {
            inode: 2,
            kind: FileKind::RegularFile,
            read_only: false,
            size: 100,
            cluster_size: 4096,
            created_unix: 0,
            modified_unix: 0,
            accessed_unix: 0,
        };
        assert_eq!(attrs.block_count_512(), 8);
    }
}
