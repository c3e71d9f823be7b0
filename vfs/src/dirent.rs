use alloc::string::String;

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u64,
    pub ty: DirEntryType,
    pub name: String,
}

/// File-type tag stored in every on-disk directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DirEntryType {
    #[default]
    Regular = 0,
    Directory = 1,
    SymLink = 2,
    Device = 3,
}

impl TryFrom<u8> for DirEntryType {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Regular),
            1 => Ok(Self::Directory),
            2 => Ok(Self::SymLink),
            3 => Ok(Self::Device),
            _ => Err(Error::Corrupted),
        }
    }
}

impl From<DirEntryType> for u8 {
    #[inline]
    fn from(ty: DirEntryType) -> Self {
        ty as u8
    }
}
