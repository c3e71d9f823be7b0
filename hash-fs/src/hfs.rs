//! # 卷管理层
//!
//! 构建出磁盘的布局并使用：格式化、挂载、位图分配器与索引节点表。
//! 文件数据的块映射与目录遍历分别位于 [`file`] 与 [`dir`]。

mod dir;
mod file;

use crate::layout::{
    read_u32, write_u32, Bitmap, DiskInode, Geometry, SuperBlock, INODES_PER_BLOCK, INODE_SIZE,
    S_IFDIR,
};
use crate::{BlockId, Error, InodeId, Result};
use crate::{BLOCK_SIZE, DEFAULT_VOLUME_NAME, MAX_INODES, MIN_VOLUME_SIZE};

pub(crate) use self::dir::Walk;

/// 格式化参数
#[derive(Debug, Clone)]
pub struct FormatOptions<'a> {
    pub volume_name: &'a str,
    /// 索引节点数的上限，另受卷大小限制
    pub max_inodes: u32,
    pub created_time: u64,
}

impl Default for FormatOptions<'_> {
    fn default() -> Self {
        Self {
            volume_name: DEFAULT_VOLUME_NAME,
            max_inodes: MAX_INODES,
            created_time: 0,
        }
    }
}

/// 以默认参数格式化整个映像
pub fn format(disk: &mut [u8], volume_name: &str) -> Result<SuperBlock> {
    format_with(
        disk,
        &FormatOptions {
            volume_name,
            ..Default::default()
        },
    )
}

/// 格式化整个映像，映像末尾不足一块的部分不使用
pub fn format_with(disk: &mut [u8], options: &FormatOptions) -> Result<SuperBlock> {
    if disk.len() < MIN_VOLUME_SIZE {
        log::error!("image of {} bytes is too small to format", disk.len());
        return Err(Error::InvalidArgument);
    }

    let total_blocks =
        u32::try_from(disk.len() / BLOCK_SIZE).map_err(|_| Error::InvalidArgument)?;
    let geometry = Geometry::new(total_blocks, options.max_inodes.min(MAX_INODES))?;
    let disk = &mut disk[..total_blocks as usize * BLOCK_SIZE];
    disk.fill(0);

    let (block_bitmap, inode_bitmap) = bitmaps(&geometry);
    // 元数据块全部标记为已用
    for block_id in 0..geometry.metadata_blocks() {
        block_bitmap.mark(disk, block_id);
    }
    inode_bitmap.mark(disk, InodeId::ROOT.into());

    let root = DiskInode::new(S_IFDIR | 0o755, 2, options.created_time);
    let (block_id, offset) = inode_pos(&geometry, InodeId::ROOT);
    root.encode(&mut disk[block_id.offset() + offset..]);

    let mut super_block = SuperBlock::new(&geometry, options.volume_name, options.created_time);
    super_block.encode(&mut disk[..BLOCK_SIZE]);

    log::info!(
        "formatted {:?}: {} blocks, {} inodes, data from block {}",
        super_block.volume_name(),
        geometry.total_blocks,
        geometry.total_inodes,
        geometry.data_blocks_start,
    );
    Ok(super_block)
}

/// 已挂载的卷：持有磁盘映像与内存中的超级块
#[derive(Debug)]
pub(crate) struct Volume<D> {
    disk: D,
    super_block: SuperBlock,
    block_bitmap: Bitmap,
    inode_bitmap: Bitmap,
}

impl<D> Volume<D>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    /// 挂载映像。校验失败时映像原样交还，不写入任何内容。
    pub fn mount(mut disk: D, now: u64) -> Result<Self, (Error, D)> {
        let checked = check(disk.as_ref());
        let (mut super_block, block_bitmap, inode_bitmap) = match checked {
            Ok(checked) => checked,
            Err(e) => return Err((e, disk)),
        };

        super_block.last_mount_time = now;
        super_block.mount_count = super_block.mount_count.wrapping_add(1);
        super_block.encode(&mut disk.as_mut()[..BLOCK_SIZE]);

        log::info!(
            "mounted {:?} (mount #{})",
            super_block.volume_name(),
            super_block.mount_count
        );
        Ok(Self {
            disk,
            super_block,
            block_bitmap,
            inode_bitmap,
        })
    }

    #[inline]
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    /// 把内存中的超级块写回 0 号块
    pub fn sync(&mut self) {
        self.super_block
            .encode(&mut self.disk.as_mut()[..BLOCK_SIZE]);
    }

    pub fn into_disk(mut self) -> D {
        self.sync();
        self.disk
    }

    /// 在磁盘上分配新的数据块并返回其ID，块内容清零
    pub fn alloc_block(&mut self) -> Result<BlockId> {
        if self.super_block.free_blocks == 0 {
            return Err(Error::OutOfSpace);
        }
        let block_id = self
            .block_bitmap
            .alloc(self.disk.as_mut())
            .map(BlockId::from)
            .ok_or(Error::OutOfSpace)?;
        self.super_block.free_blocks -= 1;
        self.block_mut(block_id)?.fill(0);

        log::debug!("alloc block {block_id:?}");
        Ok(block_id)
    }

    /// 释放数据块；本就空闲时什么也不做
    pub fn dealloc_block(&mut self, block_id: BlockId) -> Result<()> {
        if !self.block_bitmap.usable().contains(&u32::from(block_id)) {
            return Err(Error::InvalidArgument);
        }
        if self.block_bitmap.dealloc(self.disk.as_mut(), block_id.into()) {
            self.super_block.free_blocks += 1;
            log::debug!("dealloc block {block_id:?}");
        }
        Ok(())
    }

    pub fn is_block_allocated(&self, block_id: BlockId) -> Result<bool> {
        if u32::from(block_id) >= self.super_block.total_blocks {
            return Err(Error::InvalidArgument);
        }
        Ok(self.block_bitmap.is_set(self.disk.as_ref(), block_id.into()))
    }

    /// 在磁盘上分配新的 inode 并返回其ID
    pub fn alloc_inode(&mut self) -> Result<InodeId> {
        if self.super_block.free_inodes == 0 {
            return Err(Error::NoFreeInode);
        }
        let inode_id = self
            .inode_bitmap
            .alloc(self.disk.as_mut())
            .map(InodeId::from)
            .ok_or(Error::NoFreeInode)?;
        self.super_block.free_inodes -= 1;

        log::debug!("alloc inode {inode_id:?}");
        Ok(inode_id)
    }

    /// 释放 inode 并清空其记录；本就空闲时什么也不做
    pub fn dealloc_inode(&mut self, inode_id: InodeId) -> Result<()> {
        if !self.inode_bitmap.usable().contains(&u32::from(inode_id)) {
            return Err(Error::InvalidArgument);
        }
        if self.inode_bitmap.dealloc(self.disk.as_mut(), inode_id.into()) {
            self.super_block.free_inodes += 1;
            self.write_inode(inode_id, &DiskInode::default())?;
            log::debug!("dealloc inode {inode_id:?}");
        }
        Ok(())
    }

    pub fn inode(&self, inode_id: InodeId) -> Result<DiskInode> {
        let (block_id, offset) = self.inode_pos(inode_id)?;
        Ok(DiskInode::decode(&self.block(block_id)?[offset..]))
    }

    pub fn write_inode(&mut self, inode_id: InodeId, inode: &DiskInode) -> Result<()> {
        let (block_id, offset) = self.inode_pos(inode_id)?;
        inode.encode(&mut self.block_mut(block_id)?[offset..]);
        Ok(())
    }

    /// 通过ID获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    fn inode_pos(&self, inode_id: InodeId) -> Result<(BlockId, usize)> {
        if u32::from(inode_id) >= self.super_block.total_inodes {
            return Err(Error::InvalidArgument);
        }
        let geometry = self.geometry();
        Ok(inode_pos(&geometry, inode_id))
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            total_blocks: self.super_block.total_blocks,
            total_inodes: self.super_block.total_inodes,
            block_bitmap_start: self.super_block.block_bitmap_start,
            inode_bitmap_start: self.super_block.inode_bitmap_start,
            inode_table_start: self.super_block.inode_table_start,
            data_blocks_start: self.super_block.data_blocks_start,
        }
    }

    pub fn block(&self, block_id: BlockId) -> Result<&[u8]> {
        if u32::from(block_id) >= self.super_block.total_blocks {
            return Err(Error::Corrupted);
        }
        let start = block_id.offset();
        Ok(&self.disk.as_ref()[start..start + BLOCK_SIZE])
    }

    pub fn block_mut(&mut self, block_id: BlockId) -> Result<&mut [u8]> {
        if u32::from(block_id) >= self.super_block.total_blocks {
            return Err(Error::Corrupted);
        }
        let start = block_id.offset();
        Ok(&mut self.disk.as_mut()[start..start + BLOCK_SIZE])
    }

    /// 校验记录中的块编号：0 表示未分配，其余必须落在数据区
    fn checked(&self, raw: u32) -> Result<Option<BlockId>> {
        if raw == 0 {
            return Ok(None);
        }
        if !self.block_bitmap.usable().contains(&raw) {
            log::error!("block pointer {raw} lies outside the data region");
            return Err(Error::Corrupted);
        }
        Ok(Some(BlockId::from(raw)))
    }

    /// 索引块中的第 slot 个块编号
    fn pointer(&self, block_id: BlockId, slot: usize) -> Result<u32> {
        Ok(read_u32(self.block(block_id)?, slot * 4))
    }

    fn set_pointer(&mut self, block_id: BlockId, slot: usize, raw: u32) -> Result<()> {
        write_u32(self.block_mut(block_id)?, slot * 4, raw);
        Ok(())
    }
}

/// 挂载前的只读校验，返回按位图修正过计数的超级块
fn check(bytes: &[u8]) -> Result<(SuperBlock, Bitmap, Bitmap)> {
    if bytes.len() < BLOCK_SIZE {
        return Err(Error::CorruptSuperblock);
    }

    let mut super_block = SuperBlock::decode(&bytes[..BLOCK_SIZE])?;
    let geometry = super_block.geometry()?;
    if geometry.total_blocks as usize * BLOCK_SIZE > bytes.len() {
        log::error!(
            "superblock claims {} blocks, image holds {}",
            geometry.total_blocks,
            bytes.len() / BLOCK_SIZE
        );
        return Err(Error::CorruptSuperblock);
    }

    let (block_bitmap, inode_bitmap) = bitmaps(&geometry);
    if !inode_bitmap.is_set(bytes, InodeId::ROOT.into()) {
        log::error!("root inode is not allocated");
        return Err(Error::Corrupted);
    }
    let (block_id, offset) = inode_pos(&geometry, InodeId::ROOT);
    if !DiskInode::decode(&bytes[block_id.offset() + offset..]).is_dir() {
        log::error!("root inode is not a directory");
        return Err(Error::Corrupted);
    }

    // 位图才是分配情况的依据
    let free_blocks = block_bitmap.count_free(bytes);
    if free_blocks != super_block.free_blocks {
        log::warn!(
            "free block counter {} disagrees with bitmap {}",
            super_block.free_blocks,
            free_blocks
        );
        super_block.free_blocks = free_blocks;
    }
    let free_inodes = inode_bitmap.count_free(bytes);
    if free_inodes != super_block.free_inodes {
        log::warn!(
            "free inode counter {} disagrees with bitmap {}",
            super_block.free_inodes,
            free_inodes
        );
        super_block.free_inodes = free_inodes;
    }

    Ok((super_block, block_bitmap, inode_bitmap))
}

/// 数据块位图从数据区起点开始分配，索引节点位图跳过根目录
fn bitmaps(geometry: &Geometry) -> (Bitmap, Bitmap) {
    let block_bitmap = Bitmap::new(
        geometry.block_bitmap_start,
        geometry.inode_bitmap_start - geometry.block_bitmap_start,
        geometry.data_blocks_start..geometry.total_blocks,
    );
    let inode_bitmap = Bitmap::new(
        geometry.inode_bitmap_start,
        geometry.inode_table_start - geometry.inode_bitmap_start,
        u32::from(InodeId::ROOT) + 1..geometry.total_inodes,
    );
    (block_bitmap, inode_bitmap)
}

fn inode_pos(geometry: &Geometry, inode_id: InodeId) -> (BlockId, usize) {
    let inode_id = u32::from(inode_id);
    let block_id = geometry.inode_table_start + inode_id / INODES_PER_BLOCK;
    let offset = (inode_id % INODES_PER_BLOCK) as usize * INODE_SIZE;
    (BlockId::from(block_id), offset)
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;

    fn mounted(blocks: usize) -> Volume<Vec<u8>> {
        let mut disk = vec![0u8; blocks * BLOCK_SIZE];
        format(&mut disk, "unit").unwrap();
        Volume::mount(disk, 1).unwrap()
    }

    #[test]
    fn format_marks_metadata_and_root() {
        let volume = mounted(1024);
        let sb = volume.super_block();

        for block_id in 0..sb.data_blocks_start {
            assert!(volume.is_block_allocated(block_id.into()).unwrap());
        }
        assert!(!volume.is_block_allocated(sb.data_blocks_start.into()).unwrap());
        assert_eq!(sb.free_blocks, sb.total_blocks - sb.data_blocks_start);
        assert_eq!(sb.free_inodes, sb.total_inodes - 1);

        let root = volume.inode(InodeId::ROOT).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.links, 2);
        assert_eq!(root.size, 0);
    }

    #[test]
    fn format_rejects_small_image() {
        let mut disk = vec![0u8; MIN_VOLUME_SIZE - 1];
        assert_eq!(format(&mut disk, "x").err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn alloc_block_zero_fills() {
        let mut volume = mounted(1024);
        let block_id = volume.alloc_block().unwrap();
        volume.block_mut(block_id).unwrap().fill(0xEE);
        volume.dealloc_block(block_id).unwrap();

        assert_eq!(volume.alloc_block(), Ok(block_id));
        assert!(volume.block(block_id).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn dealloc_outside_usable_range_is_rejected() {
        let mut volume = mounted(1024);
        assert_eq!(volume.dealloc_block(BlockId::from(1)), Err(Error::InvalidArgument));
        assert_eq!(volume.dealloc_inode(InodeId::ROOT), Err(Error::InvalidArgument));
        // 重复释放无副作用
        let free = volume.super_block().free_blocks;
        let last = BlockId::from(volume.super_block().total_blocks - 1);
        volume.dealloc_block(last).unwrap();
        assert_eq!(volume.super_block().free_blocks, free);
    }

    #[test]
    fn inode_slot_is_cleared_on_dealloc() {
        let mut volume = mounted(1024);
        let inode_id = volume.alloc_inode().unwrap();
        assert_eq!(inode_id, InodeId::from(1));

        let inode = DiskInode::new(S_IFDIR | 0o700, 2, 9);
        volume.write_inode(inode_id, &inode).unwrap();
        assert_eq!(volume.inode(inode_id), Ok(inode));

        volume.dealloc_inode(inode_id).unwrap();
        assert_eq!(volume.inode(inode_id), Ok(DiskInode::default()));
    }

    #[test]
    fn mount_recounts_free_bits() {
        let mut disk = vec![0u8; 1024 * BLOCK_SIZE];
        let mut sb = format(&mut disk, "drift").unwrap();
        sb.free_blocks -= 10;
        sb.encode(&mut disk[..BLOCK_SIZE]);

        let volume = Volume::mount(disk, 0).unwrap();
        assert_eq!(volume.super_block().free_blocks, sb.free_blocks + 10);
        assert_eq!(volume.super_block().mount_count, 1);
    }

    #[test]
    fn failed_mount_returns_untouched_image() {
        let mut disk = vec![0u8; 1024 * BLOCK_SIZE];
        let sb = format(&mut disk, "bad-root").unwrap();
        // 根目录的 inode 改成普通文件
        let (block_id, offset) = inode_pos(&sb.geometry().unwrap(), InodeId::ROOT);
        let file = DiskInode::new(crate::S_IFREG | 0o644, 1, 0);
        file.encode(&mut disk[block_id.offset() + offset..]);
        let before = disk.clone();

        let Err((err, disk)) = Volume::mount(disk, 5) else {
            panic!("mounted a volume whose root is a file");
        };
        assert_eq!(err, Error::Corrupted);
        assert_eq!(disk, before);
    }

    #[test]
    fn foreign_pointer_is_corruption() {
        let volume = mounted(1024);
        assert_eq!(volume.checked(0), Ok(None));
        assert_eq!(volume.checked(2), Err(Error::Corrupted));
        assert_eq!(volume.checked(u32::MAX), Err(Error::Corrupted));
    }
}
