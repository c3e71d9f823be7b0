//! # 磁盘数据结构层
//!
//! hash-fs 的磁盘布局（块大小 4096 字节）：
//! 超级块 | 数据块位图 | 索引节点位图 | 索引节点表 | 数据块区域
//!
//! 所有多字节字段均以小端序存放在固定偏移处。

mod super_block;
pub use super_block::{Geometry, SuperBlock};

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{
    BlockPath, DiskInode, INODES_PER_BLOCK, INODE_SIZE, POINTERS_PER_BLOCK, PERMISSION_MASK,
    S_IFDIR, S_IFMT, S_IFREG,
};
#[cfg(test)]
pub use inode::DIRECT_COUNT;

/// 目录项，也属于磁盘文件系统数据结构
pub mod dir_entry;

#[inline]
pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut buf = [0; 2];
    buf.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_le_bytes(buf)
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
pub(crate) fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
