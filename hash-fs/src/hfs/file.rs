//! 文件数据的块映射：逻辑块号经直接索引与三级间接索引找到物理块

use super::Volume;
use crate::layout::{BlockPath, DiskInode, POINTERS_PER_BLOCK};
use crate::{BlockId, Error, Result, BLOCK_SIZE};

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// 字节偏移所在的逻辑块号
#[inline]
fn block_index(pos: u64) -> Result<u32> {
    u32::try_from(pos / BLOCK_SIZE_U64).map_err(|_| Error::FileTooLarge)
}

impl<D> Volume<D>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    /// 逻辑块对应的物理块，空洞返回空
    pub fn block_of(&self, inode: &DiskInode, index: u32) -> Result<Option<BlockId>> {
        let path = BlockPath::locate(index).ok_or(Error::FileTooLarge)?;

        let mut current = self.checked(inode.root(&path))?;
        for &slot in path.slots() {
            let Some(block_id) = current else {
                return Ok(None);
            };
            current = self.checked(self.pointer(block_id, slot)?)?;
        }

        Ok(current)
    }

    /// 逻辑块对应的物理块，沿途缺失的索引块与数据块一并分配
    pub fn ensure_block(&mut self, inode: &mut DiskInode, index: u32) -> Result<BlockId> {
        let path = BlockPath::locate(index).ok_or(Error::FileTooLarge)?;

        let mut current = match self.checked(inode.root(&path))? {
            Some(block_id) => block_id,
            None => {
                let block_id = self.alloc_block()?;
                inode.set_root(&path, block_id.into());
                inode.blocks += 1;
                block_id
            }
        };

        for &slot in path.slots() {
            current = match self.checked(self.pointer(current, slot)?)? {
                Some(block_id) => block_id,
                None => {
                    let block_id = self.alloc_block()?;
                    self.set_pointer(current, slot, block_id.into())?;
                    inode.blocks += 1;
                    block_id
                }
            };
        }

        Ok(current)
    }

    /// 从 offset 起读取，至多读到文件末尾；空洞读出 0
    pub fn read_at(&self, inode: &DiskInode, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= inode.size {
            return Ok(0);
        }

        let end = inode.size.min(offset + buf.len() as u64);
        let mut pos = offset;
        let mut read = 0;

        while pos < end {
            let in_block = (pos % BLOCK_SIZE_U64) as usize;
            let len = (BLOCK_SIZE - in_block).min((end - pos) as usize);
            let dst = &mut buf[read..read + len];

            match self.block_of(inode, block_index(pos)?)? {
                Some(block_id) => {
                    dst.copy_from_slice(&self.block(block_id)?[in_block..in_block + len])
                }
                None => dst.fill(0),
            }

            pos += len as u64;
            read += len;
        }

        Ok(read)
    }

    /// 从 offset 起写入，按需分配块并扩大文件。
    ///
    /// 中途分配失败时，已写入部分保留并返回其长度；一个字节也没写入才返回错误。
    /// 出错与否，调用者都应把 inode 写回。
    pub fn write_at(&mut self, inode: &mut DiskInode, offset: u64, buf: &[u8]) -> Result<usize> {
        let mut pos = offset;
        let mut written = 0;

        while written < buf.len() {
            let in_block = (pos % BLOCK_SIZE_U64) as usize;
            let len = (BLOCK_SIZE - in_block).min(buf.len() - written);

            let block_id = match block_index(pos).and_then(|index| self.ensure_block(inode, index))
            {
                Ok(block_id) => block_id,
                Err(e) if written == 0 => return Err(e),
                Err(e) => {
                    log::warn!("write stopped after {written} of {} bytes: {e}", buf.len());
                    break;
                }
            };
            self.block_mut(block_id)?[in_block..in_block + len]
                .copy_from_slice(&buf[written..written + len]);

            pos += len as u64;
            written += len;
            inode.size = inode.size.max(pos);
        }

        Ok(written)
    }

    /// 释放文件的全部数据块与索引块，文件长度归零
    pub fn release_blocks(&mut self, inode: &mut DiskInode) -> Result<()> {
        for slot in 0..inode.direct.len() {
            if let Some(block_id) = self.checked(inode.direct[slot])? {
                self.dealloc_block(block_id)?;
            }
            inode.direct[slot] = 0;
        }

        for (level, root) in inode.indirect_roots().into_iter().enumerate() {
            if let Some(block_id) = self.checked(root)? {
                self.release_tree(block_id, level + 1)?;
            }
        }
        inode.indirect1 = 0;
        inode.indirect2 = 0;
        inode.indirect3 = 0;

        inode.size = 0;
        inode.blocks = 0;
        Ok(())
    }

    /// 自底向上释放一棵 depth 级的索引树（含根）
    fn release_tree(&mut self, block_id: BlockId, depth: usize) -> Result<()> {
        for slot in 0..POINTERS_PER_BLOCK {
            let Some(child) = self.checked(self.pointer(block_id, slot)?)? else {
                continue;
            };
            if depth > 1 {
                self.release_tree(child, depth - 1)?;
            } else {
                self.dealloc_block(child)?;
            }
        }

        self.dealloc_block(block_id)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::hfs::format;
    use crate::layout::{DIRECT_COUNT, S_IFREG};

    fn mounted() -> Volume<Vec<u8>> {
        let mut disk = vec![0u8; 1024 * BLOCK_SIZE];
        format(&mut disk, "file").unwrap();
        Volume::mount(disk, 0).unwrap()
    }

    #[test]
    fn write_spans_direct_blocks() {
        let mut volume = mounted();
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();

        assert_eq!(volume.write_at(&mut inode, 0, &data), Ok(data.len()));
        assert_eq!(inode.size, 10_000);
        assert_eq!(inode.blocks, 3);

        let mut out = vec![0u8; data.len()];
        assert_eq!(volume.read_at(&inode, 0, &mut out), Ok(data.len()));
        assert_eq!(out, data);
    }

    #[test]
    fn single_indirect_block_is_counted() {
        let mut volume = mounted();
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        let offset = (DIRECT_COUNT * BLOCK_SIZE) as u64;

        volume.write_at(&mut inode, offset, b"tail").unwrap();
        // 一个数据块加一个一级索引块
        assert_eq!(inode.blocks, 2);
        assert_ne!(inode.indirect1, 0);
        assert!(inode.direct.iter().all(|&b| b == 0));

        let mut out = [0xFFu8; 8];
        assert_eq!(volume.read_at(&inode, offset - 4, &mut out), Ok(8));
        assert_eq!(&out, b"\0\0\0\0tail");
    }

    #[test]
    fn double_indirect_round_trip() {
        let mut volume = mounted();
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        let index = (DIRECT_COUNT + POINTERS_PER_BLOCK + 3) as u64;
        let offset = index * BLOCK_SIZE_U64 + 100;

        volume.write_at(&mut inode, offset, b"deep").unwrap();
        assert_eq!(inode.blocks, 3);

        let mut out = [0u8; 4];
        volume.read_at(&inode, offset, &mut out).unwrap();
        assert_eq!(&out, b"deep");
    }

    #[test]
    fn release_returns_every_block() {
        let mut volume = mounted();
        let free = volume.super_block().free_blocks;
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        let data = vec![7u8; (DIRECT_COUNT + 2) * BLOCK_SIZE];

        volume.write_at(&mut inode, 0, &data).unwrap();
        volume
            .write_at(&mut inode, (DIRECT_COUNT + POINTERS_PER_BLOCK) as u64 * BLOCK_SIZE_U64, b"x")
            .unwrap();
        assert_eq!(free - volume.super_block().free_blocks, inode.blocks);

        volume.release_blocks(&mut inode).unwrap();
        assert_eq!(volume.super_block().free_blocks, free);
        assert_eq!(inode, DiskInode::new(S_IFREG | 0o644, 1, 0));
    }

    #[test]
    fn partial_write_reports_written_bytes() {
        let mut volume = mounted();
        let free = volume.super_block().free_blocks as usize;
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        // 占满直接索引之后还需要一个一级索引块，因此数据最多能放 free - 1 块
        let data = vec![1u8; (free + 4) * BLOCK_SIZE];

        let written = volume.write_at(&mut inode, 0, &data).unwrap();
        assert_eq!(written, (free - 1) * BLOCK_SIZE);
        assert_eq!(inode.size, written as u64);
        assert_eq!(volume.super_block().free_blocks, 0);

        assert_eq!(
            volume.write_at(&mut inode, written as u64, b"more"),
            Err(Error::OutOfSpace)
        );
    }

    #[test]
    fn offset_beyond_triple_indirect_is_too_large() {
        let mut volume = mounted();
        let mut inode = DiskInode::new(S_IFREG | 0o644, 1, 0);
        assert_eq!(
            volume.write_at(&mut inode, u64::MAX - 10, b"x"),
            Err(Error::FileTooLarge)
        );
    }
}
