//! Error taxonomy surfaced to callers of the façade (spec §7).
//!
//! Each core subsystem keeps a small error enum of its own ([`FatError`],
//! [`ChainError`], [`DirError`]); [`FsError`] is what the façade and the
//! bridge actually see, and every subsystem error converts into it at the
//! boundary.

/// Errors a [`crate::fat::FatCache`] can raise.
#[derive(Debug, thiserror::Error)]
pub enum FatError {
    #[error("I/O error while reading/writing the FAT: {0}")]
    Io(#[from] std::io::Error),
    #[error("cluster index {0} is out of range for this volume")]
    OutOfRange(u32),
}

/// Errors a [`crate::chain::ClusterChain`] can raise while walking or
/// extending a chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("I/O error while reading/writing cluster data: {0}")]
    Io(#[from] std::io::Error),
    #[error("fat error: {0}")]
    Fat(#[from] FatError),
    #[error("free-space map is exhausted")]
    OutOfSpace,
    #[error("seek target {0} is outside [0, size)")]
    InvalidSeek(u64),
}

/// Errors the directory layer and path resolver can raise.
#[derive(Debug, thiserror::Error)]
pub enum DirError {
    #[error("no directory slot matches the requested name")]
    NoSuchEntry,
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("directory is full: no free slot and the chain could not grow")]
    DirectoryFull,
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Top-level error taxonomy, matching spec §7 one-for-one.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such entry")]
    NoSuchEntry,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("unexpected end of file")]
    EndOfFile,
    #[error("volume is corrupt: {0}")]
    CorruptVolume(&'static str),
    #[error("no free clusters remain")]
    OutOfSpace,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Maps a driver error onto the errno surface a kernel-bridge reply
    /// expects (spec §7: "the bridge converts the returned codes to the
    /// platform's standard errno surface").
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NoSuchEntry => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::EndOfFile => libc::EIO,
            FsError::CorruptVolume(_) => libc::EIO,
            FsError::OutOfSpace => libc::ENOSPC,
            FsError::Io(_) => libc::EIO,
        }
    }
}

impl From<FatError> for FsError {
    fn from(e: FatError) -> Self {
        match e {
            FatError::Io(e) => FsError::Io(e),
            FatError::OutOfRange(_) => FsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "cluster index out of range",
            )),
        }
    }
}

impl From<ChainError> for FsError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Io(e) => FsError::Io(e),
            ChainError::Fat(e) => e.into(),
            ChainError::OutOfSpace => FsError::OutOfSpace,
            ChainError::InvalidSeek(_) => FsError::InvalidArgument,
        }
    }
}

impl From<DirError> for FsError {
    fn from(e: DirError) -> Self {
        match e {
            DirError::NoSuchEntry => FsError::NoSuchEntry,
            DirError::NotADirectory => FsError::NotADirectory,
            DirError::NotEmpty => FsError::NotEmpty,
            DirError::DirectoryFull => FsError::OutOfSpace,
            DirError::Chain(e) => e.into(),
        }
    }
}

/// Convenience for code that wants a short tag without the full message,
/// e.g. logging call sites.
pub fn tag(e: &FsError) -> &'static str {
    match e {
        FsError::NoSuchEntry => "no-such-entry",
        FsError::NotADirectory => "not-a-directory",
        FsError::NotEmpty => "not-empty",
        FsError::PermissionDenied => "permission-denied",
        FsError::InvalidArgument => "invalid-argument",
        FsError::EndOfFile => "end-of-file",
        FsError::CorruptVolume(_) => "corrupt-volume",
        FsError::OutOfSpace => "out-of-space",
        FsError::Io(_) => "io-error",
    }
}
