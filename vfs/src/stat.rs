use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub inode: u64,
    pub kind: DirEntryType,
    /// Type bits and permission bits as stored on disk
    pub mode: u32,
    pub links: u32,
    /// File size
    pub size: u64,
    /// Occupying blocks, index blocks included
    pub blocks: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}
