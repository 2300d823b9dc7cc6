//! The on-disk 32-byte directory entry (spec §6) — 8.3 short names only,
//! long-name entries are a Non-goal and are never written or parsed.
//!
//! Grounded on the teacher's `entry.rs::ShortDirEntry`; everything
//! touching `LongDirEntry`/LFN checksums has been dropped.

use crate::time::DosTimestamp;

pub const ENTRY_SIZE: usize = 32;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

const NAME_UNUSED: u8 = 0xE5;
const NAME_END_OF_DIR: u8 = 0x00;
const KANJI_E5_ESCAPE: u8 = 0x05;

/// An 8.3 short directory entry, parsed from or serialized to its
/// 32-byte on-disk form.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    pub attr: u8,
    pub create_time_tenth: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster: u32,
    pub file_size: u32,
}

impl DirEntry {
    pub fn empty() -> Self {
        DirEntry {
            name: [NAME_END_OF_DIR; 8],
            extension: [0x20; 3],
            attr: 0,
            create_time_tenth: 0,
            create_time: 0,
            create_date: 0,
            last_access_date: 0,
            write_time: 0,
            write_date: 0,
            first_cluster: 0,
            file_size: 0,
        }
    }

    pub fn parse(buf: &[u8; ENTRY_SIZE]) -> Self {
        let mut name = [0u8; 8];
        name.copy_from_slice(&buf[0..8]);
        let mut extension = [0u8; 3];
        extension.copy_from_slice(&buf[8..11]);
        DirEntry {
            name,
            extension,
            attr: buf[11],
            create_time_tenth: buf[13],
            create_time: u16::from_le_bytes([buf[14], buf[15]]),
            create_date: u16::from_le_bytes([buf[16], buf[17]]),
            last_access_date: u16::from_le_bytes([buf[18], buf[19]]),
            write_time: u16::from_le_bytes([buf[22], buf[23]]),
            write_date: u16::from_le_bytes([buf[24], buf[25]]),
            first_cluster: (u16::from_le_bytes([buf[20], buf[21]]) as u32) << 16
                | u16::from_le_bytes([buf[26], buf[27]]) as u32,
            file_size: u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.name);
        buf[8..11].copy_from_slice(&self.extension);
        buf[11] = self.attr;
        buf[12] = 0; // nt_res, always zero: case hints are not produced by this driver.
        buf[13] = self.create_time_tenth;
        buf[14..16].copy_from_slice(&self.create_time.to_le_bytes());
        buf[16..18].copy_from_slice(&self.create_date.to_le_bytes());
        buf[18..20].copy_from_slice(&self.last_access_date.to_le_bytes());
        buf[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        buf[22..24].copy_from_slice(&self.write_time.to_le_bytes());
        buf[24..26].copy_from_slice(&self.write_date.to_le_bytes());
        buf[26..28].copy_from_slice(&((self.first_cluster & 0xFFFF) as u16).to_le_bytes());
        buf[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        buf
    }

    pub fn is_unused(&self) -> bool {
        self.name[0] == NAME_UNUSED || self.name[0] == NAME_END_OF_DIR
    }

    /// True when this slot, and every slot after it in the chain, is
    /// unused — the short-circuit described in spec §6's directory
    /// layer notes.
    pub fn is_end_of_directory(&self) -> bool {
        self.name[0] == NAME_END_OF_DIR
    }

    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_id(&self) -> bool {
        self.attr & ATTR_VOLUME_ID != 0
    }

    pub fn is_read_only(&self) -> bool {
        self.attr & ATTR_READ_ONLY != 0
    }

    /// Renders the 8.3 name as a single dotted string, e.g. `README.TXT`.
    pub fn display_name(&self) -> String {
        let base = std::str::from_utf8(&self.name)
            .unwrap_or("")
            .trim_end_matches(' ');
        let ext = std::str::from_utf8(&self.extension)
            .unwrap_or("")
            .trim_end_matches(' ');
        if ext.is_empty() {
            base.to_string()
        } else {
            format!("{base}.{ext}")
        }
    }

    pub fn set_times_from_unix(&mut self, created: i64, modified: i64, accessed: i64) {
        let c = DosTimestamp::from_unix(created);
        self.create_date = c.date;
        self.create_time = c.time;
        self.create_time_tenth = c.time_tenth;
        let w = DosTimestamp::from_unix(modified);
        self.write_date = w.date;
        self.write_time = w.time;
        let a = DosTimestamp::from_unix(accessed);
        self.last_access_date = a.date;
    }
}

/// Splits a POSIX-style component name into an 8.3 `(name, extension)`
/// pair of space-padded, upper-cased bytes. Returns `None` when the
/// component cannot be represented as an 8.3 short name (the caller
/// maps this to `FsError::InvalidArgument`, since long names are a
/// Non-goal).
pub fn split_short_name(component: &str) -> Option<([u8; 8], [u8; 3])> {
    if component.is_empty() || component.len() > 12 {
        return None;
    }
    let (base, ext) = match component.rfind('.') {
        Some(0) => (component, ""),
        Some(pos) => (&component[..pos], &component[pos + 1..]),
        None => (component, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }
    if !base.bytes().chain(ext.bytes()).all(is_legal_short_name_byte) {
        return None;
    }

    let mut name = [0x20u8; 8];
    for (i, b) in base.bytes().enumerate() {
        name[i] = escape_kanji(b).to_ascii_uppercase();
    }
    let mut extension = [0x20u8; 3];
    for (i, b) in ext.bytes().enumerate() {
        extension[i] = b.to_ascii_uppercase();
    }
    Some((name, extension))
}

fn escape_kanji(b: u8) -> u8 {
    if b == NAME_UNUSED {
        KANJI_E5_ESCAPE
    } else {
        b
    }
}

fn is_legal_short_name_byte(b: u8) -> bool {
    const ILLEGAL: &[u8] = b"\"*+,./:;<=>?[\\]|";
    b > 0x20 && !ILLEGAL.contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut entry = DirEntry::empty();
        entry.name = *b"README  ";
        entry.extension = *b"TXT";
        entry.attr = ATTR_ARCHIVE;
        entry.first_cluster = 0x1234_5678;
        entry.file_size = 42;
        let bytes = entry.to_bytes();
        let parsed = DirEntry::parse(&bytes);
        assert_eq!(parsed.first_cluster, 0x1234_5678);
        assert_eq!(parsed.file_size, 42);
        assert_eq!(parsed.display_name(), "README.TXT");
    }

    #[test]
    fn splits_short_names_with_extension() {
        let (name, ext) = split_short_name("readme.txt").unwrap();
        assert_eq!(&name, b"README  ");
        assert_eq!(&ext, b"TXT");
    }

    #[test]
    fn splits_short_names_without_extension() {
        let (name, ext) = split_short_name("DOCS").unwrap();
        assert_eq!(&name, b"DOCS    ");
        assert_eq!(&ext, b"   ");
    }

    #[test]
    fn rejects_names_too_long_for_8_3() {
        assert!(split_short_name("thisnameiswaytoolong.txt").is_none());
        assert!(split_short_name("a.toolong").is_none());
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!(split_short_name("bad?name.txt").is_none());
    }
}
