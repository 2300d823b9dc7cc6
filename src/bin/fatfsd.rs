//! CLI entry point and kernel-bridge glue (spec §6). Parses arguments,
//! opens the backing device, mounts the volume, and wires the façade's
//! operations into `fuse`'s callback table. This binary is
//! intentionally thin: every piece of state it owns is either CLI
//! configuration or the inode-number bookkeeping FUSE itself requires,
//! never filesystem semantics (those all live in `fatfs::fs::Filesystem`).
//!
//! Grounded on the teacher's std example's use of `clap` for argument
//! parsing (ported from its builder API to `clap`'s derive API) and on
//! `other_examples/manifests/YC-fat-fuse/Cargo.toml`'s precedent for
//! pairing a FAT driver with the `fuse` + `libc` crates.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use fuse::{
    FileAttr, FileType, Filesystem as FuseFilesystem, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use log::{error, info, warn};

use fatfs::chain::SeekFrom;
use fatfs::{Attributes, FileHandleId, FileKind, FileBlockDevice, Filesystem, FsError};

const TTL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "fatfsd", version, about = "Mounts a FAT32 image as a user-space filesystem")]
struct Cli {
    /// Path to the block device or disk image to mount.
    device: PathBuf,
    /// Directory to mount the volume at.
    mountpoint: PathBuf,
    /// Extra options forwarded verbatim to the kernel bridge (e.g. `-o allow_other`).
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,
}

/// Tracks the inode numbers FUSE has handed out, since the façade
/// itself only knows paths (spec §9: path resolution is the core's
/// job, inode bookkeeping is bridge-only).
struct InodeTable {
    next_ino: u64,
    paths: HashMap<u64, String>,
}

impl InodeTable {
    fn new() -> Self {
        let mut paths = HashMap::new();
        paths.insert(1, "/".to_string());
        InodeTable { next_ino: 2, paths }
    }

    fn ino_for(&mut self, path: &str) -> u64 {
        if path == "/" {
            return 1;
        }
        if let Some((&ino, _)) = self.paths.iter().find(|(_, p)| p.as_str() == path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.paths.insert(ino, path.to_string());
        ino
    }

    fn path_of(&self, ino: u64) -> Option<&str> {
        self.paths.get(&ino).map(|s| s.as_str())
    }

    fn join(&self, parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{name}")
        } else {
            format!("{parent}/{name}")
        }
    }
}

struct Bridge {
    fs: Arc<Filesystem<FileBlockDevice>>,
    inodes: Mutex<InodeTable>,
}

fn to_file_attr(ino: u64, attrs: &Attributes) -> FileAttr {
    let kind = match attrs.kind {
        FileKind::Directory => FileType::Directory,
        FileKind::RegularFile => FileType::RegularFile,
    };
    let to_systime = |unix: i64| UNIX_EPOCH + Duration::from_secs(unix.max(0) as u64);
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.block_count_512(),
        atime: to_systime(attrs.accessed_unix),
        mtime: to_systime(attrs.modified_unix),
        ctime: to_systime(attrs.modified_unix),
        crtime: to_systime(attrs.created_unix),
        kind,
        perm: attrs.mode_bits() as u16,
        nlink: 1,
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        rdev: 0,
        flags: 0,
    }
}

fn errno_reply(err: FsError) -> i32 {
    warn!("operation failed: {} ({})", err, fatfs::error::tag(&err));
    err.to_errno()
}

impl FuseFilesystem for Bridge {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let mut inodes = self.inodes.lock().unwrap();
        let Some(parent_path) = inodes.path_of(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = inodes.join(&parent_path, &name.to_string_lossy());
        match self.fs.lookup_attrs(&path) {
            Ok(attrs) => {
                let ino = inodes.ino_for(&path);
                reply.entry(&TTL, &to_file_attr(ino, &attrs), 0);
            }
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.path_of(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        drop(inodes);
        match self.fs.lookup_attrs(&path) {
            Ok(attrs) => reply.attr(&TTL, &to_file_attr(ino, &attrs)),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: u32, reply: ReplyOpen) {
        let inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.path_of(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        drop(inodes);
        match self.fs.open(&path) {
            Ok(handle) => reply.opened(handle, 0),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _flags: u32,
        reply: fuse::ReplyCreate,
    ) {
        let mut inodes = self.inodes.lock().unwrap();
        let Some(parent_path) = inodes.path_of(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = inodes.join(&parent_path, &name.to_string_lossy());
        match self.fs.create(&path) {
            Ok(handle) => match self.fs.lookup_attrs(&path) {
                Ok(attrs) => {
                    let ino = inodes.ino_for(&path);
                    reply.created(&TTL, &to_file_attr(ino, &attrs), 0, handle, 0);
                }
                Err(e) => reply.error(errno_reply(e)),
            },
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        reply: ReplyData,
    ) {
        if let Err(e) = self.fs.seek(fh as FileHandleId, SeekFrom::Start(offset as u64)) {
            reply.error(errno_reply(e));
            return;
        }
        let mut buf = vec![0u8; size as usize];
        match self.fs.read(fh as FileHandleId, &mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _flags: u32,
        reply: ReplyWrite,
    ) {
        if let Err(e) = self.fs.seek(fh as FileHandleId, SeekFrom::Start(offset as u64)) {
            reply.error(errno_reply(e));
            return;
        }
        match self.fs.write(fh as FileHandleId, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.fs.close(fh as FileHandleId) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let mut inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.path_of(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.fs.readdir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno_reply(e));
                return;
            }
        };

        let mut all = vec![(".".to_string(), FileType::Directory), ("..".to_string(), FileType::Directory)];
        for (name, attrs) in entries {
            if name == "." || name == ".." {
                continue;
            }
            let kind = match attrs.kind {
                FileKind::Directory => FileType::Directory,
                FileKind::RegularFile => FileType::RegularFile,
            };
            all.push((name, kind));
        }

        for (i, (name, kind)) in all.iter().enumerate().skip(offset as usize) {
            let entry_path = if name == "." {
                path.clone()
            } else if name == ".." {
                parent_of(&path)
            } else {
                inodes.join(&path, name)
            };
            let ino = inodes.ino_for(&entry_path);
            if reply.add(ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, reply: ReplyEntry) {
        let mut inodes = self.inodes.lock().unwrap();
        let Some(parent_path) = inodes.path_of(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = inodes.join(&parent_path, &name.to_string_lossy());
        match self.fs.mkdir(&path) {
            Ok(()) => match self.fs.lookup_attrs(&path) {
                Ok(attrs) => {
                    let ino = inodes.ino_for(&path);
                    reply.entry(&TTL, &to_file_attr(ino, &attrs), 0);
                }
                Err(e) => reply.error(errno_reply(e)),
            },
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let inodes = self.inodes.lock().unwrap();
        let Some(parent_path) = inodes.path_of(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = inodes.join(&parent_path, &name.to_string_lossy());
        drop(inodes);
        match self.fs.rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let inodes = self.inodes.lock().unwrap();
        let Some(parent_path) = inodes.path_of(parent).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = inodes.join(&parent_path, &name.to_string_lossy());
        drop(inodes);
        match self.fs.unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
        reply: ReplyEmpty,
    ) {
        let inodes = self.inodes.lock().unwrap();
        let (Some(parent_path), Some(new_parent_path)) = (
            inodes.path_of(parent).map(str::to_string),
            inodes.path_of(new_parent).map(str::to_string),
        ) else {
            reply.error(libc::ENOENT);
            return;
        };
        let from = inodes.join(&parent_path, &name.to_string_lossy());
        let to = inodes.join(&new_parent_path, &new_name.to_string_lossy());
        drop(inodes);
        match self.fs.rename(&from, &to) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<SystemTime>,
        _mtime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let inodes = self.inodes.lock().unwrap();
        let Some(path) = inodes.path_of(ino).map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        drop(inodes);

        if let Some(new_size) = size {
            let handle = match self.fs.open(&path) {
                Ok(h) => h,
                Err(e) => {
                    reply.error(errno_reply(e));
                    return;
                }
            };
            if let Err(e) = self.fs.truncate(handle, new_size) {
                let _ = self.fs.close(handle);
                reply.error(errno_reply(e));
                return;
            }
            let _ = self.fs.close(handle);
        }

        match self.fs.lookup_attrs(&path) {
            Ok(attrs) => reply.attr(&TTL, &to_file_attr(ino, &attrs)),
            Err(e) => reply.error(errno_reply(e)),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: fuse::ReplyStatfs) {
        let stats = self.fs.statfs();
        let blocks_per_cluster = stats.cluster_size / 512;
        reply.statfs(
            stats.total_clusters * blocks_per_cluster,
            stats.free_clusters * blocks_per_cluster,
            stats.free_clusters * blocks_per_cluster,
            0,
            0,
            512,
            stats.max_name_len,
            0,
        );
    }

    fn destroy(&mut self, _req: &Request) {
        if let Err(e) = self.fs.unmount() {
            error!("failed to flush clean-shutdown state: {e}");
        }
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => "/".to_string(),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let file = match OpenOptions::new().read(true).write(true).open(&cli.device) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to open {}: {e}", cli.device.display());
            std::process::exit(1);
        }
    };
    let device = Arc::new(FileBlockDevice::new(file));

    let fs = match Filesystem::mount(device) {
        Ok(fs) => Arc::new(fs),
        Err(e) => {
            eprintln!("failed to mount {}: {e}", cli.device.display());
            std::process::exit(1);
        }
    };

    let bridge = Bridge {
        fs,
        inodes: Mutex::new(InodeTable::new()),
    };

    let options: Vec<&OsStr> = cli.options.iter().map(OsStr::new).collect();
    info!("mounting {} at {}", cli.device.display(), cli.mountpoint.display());
    if let Err(e) = fuse::mount(bridge, &cli.mountpoint, &options) {
        eprintln!("mount failed: {e}");
        std::process::exit(1);
    }
}
