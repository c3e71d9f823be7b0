use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed path or name, out-of-range descriptor, bad seek target
    InvalidArgument,
    NotMounted,
    /// Block 0 does not describe a volume this engine understands
    CorruptSuperblock,
    /// A structure inside a mounted volume points somewhere it must not
    Corrupted,
    /// The data block bitmap is exhausted
    OutOfSpace,
    /// The inode bitmap is exhausted
    NoFreeInode,
    OutOfDescriptors,
    NotFound,
    AlreadyExists,
    IsADirectory,
    NotADirectory,
    DirectoryNotEmpty,
    /// The byte offset lies beyond what triple indirection can address
    FileTooLarge,
    /// The target is still referenced by an open descriptor or a mount
    Busy,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidArgument => "invalid argument",
            Self::NotMounted => "filesystem is not mounted",
            Self::CorruptSuperblock => "corrupt superblock",
            Self::Corrupted => "filesystem structure is corrupted",
            Self::OutOfSpace => "no free data blocks",
            Self::NoFreeInode => "no free inodes",
            Self::OutOfDescriptors => "file descriptor table is full",
            Self::NotFound => "no such file or directory",
            Self::AlreadyExists => "file exists",
            Self::IsADirectory => "is a directory",
            Self::NotADirectory => "not a directory",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::FileTooLarge => "file too large",
            Self::Busy => "resource busy",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
