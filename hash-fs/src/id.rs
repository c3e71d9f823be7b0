use derive_more::{From, Into};

/// Absolute block number inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct BlockId(u32);

/// Slot number inside the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct InodeId(u32);

impl BlockId {
    /// Byte offset of the block inside the image
    #[inline]
    pub fn offset(self) -> usize {
        self.0 as usize * crate::BLOCK_SIZE
    }
}

impl InodeId {
    /// 根目录恒为 0 号
    pub const ROOT: Self = Self(0);
}

impl From<InodeId> for u64 {
    #[inline]
    fn from(id: InodeId) -> Self {
        u64::from(id.0)
    }
}
