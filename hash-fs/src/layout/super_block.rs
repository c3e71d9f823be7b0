use core::str;

use super::{read_u32, read_u64, write_u32, write_u64, INODES_PER_BLOCK};
use crate::{Error, Result};
use crate::{BLOCK_BITS, BLOCK_SIZE, MAGIC, MIN_VOLUME_SIZE};

pub const VOLUME_NAME_LEN: usize = 64;

/// 各区域的起始块，格式化与挂载时据此划分磁盘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub block_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_blocks_start: u32,
}

impl Geometry {
    /// 索引节点表最多占据全盘的 1/INODE_AREA_RATIO
    pub const INODE_AREA_RATIO: u32 = 4;

    pub fn new(total_blocks: u32, max_inodes: u32) -> Result<Self> {
        if (total_blocks as usize) < MIN_VOLUME_SIZE / BLOCK_SIZE || max_inodes < 2 {
            return Err(Error::InvalidArgument);
        }

        let inode_cap =
            u64::from(total_blocks / Self::INODE_AREA_RATIO) * u64::from(INODES_PER_BLOCK);
        // 不超过 max_inodes，必然装得进 u32
        let total_inodes = u64::from(max_inodes).min(inode_cap) as u32;

        let block_bitmap_blocks = total_blocks.div_ceil(BLOCK_BITS);
        let inode_bitmap_blocks = total_inodes.div_ceil(BLOCK_BITS);
        let inode_table_blocks = total_inodes.div_ceil(INODES_PER_BLOCK);

        let block_bitmap_start = 1;
        let inode_bitmap_start = block_bitmap_start + block_bitmap_blocks;
        let inode_table_start = inode_bitmap_start + inode_bitmap_blocks;
        let data_blocks_start = inode_table_start + inode_table_blocks;

        Ok(Self {
            total_blocks,
            total_inodes,
            block_bitmap_start,
            inode_bitmap_start,
            inode_table_start,
            data_blocks_start,
        })
    }

    /// 超级块、两张位图与索引节点表所占的块数
    #[inline]
    pub fn metadata_blocks(&self) -> u32 {
        self.data_blocks_start
    }

    #[inline]
    pub fn data_blocks(&self) -> u32 {
        self.total_blocks - self.data_blocks_start
    }
}

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域；
/// - 记录空闲块与空闲索引节点的计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    pub block_size: u32,
    /// 文件系统占据块数
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub inode_table_start: u32,
    pub data_blocks_start: u32,
    pub block_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    /// 以 \0 结尾，最多 63 字节
    pub volume_name: [u8; VOLUME_NAME_LEN],
    pub created_time: u64,
    pub last_mount_time: u64,
    pub mount_count: u32,
    pub checksum: u32,
}

impl SuperBlock {
    /// 超级块在 0 号块开头所占的字节数
    pub const SIZE: usize = 128;
    const CHECKSUM_OFFSET: usize = 124;

    pub fn new(geometry: &Geometry, volume_name: &str, created_time: u64) -> Self {
        Self {
            magic: MAGIC,
            block_size: BLOCK_SIZE as u32,
            total_blocks: geometry.total_blocks,
            free_blocks: geometry.data_blocks(),
            total_inodes: geometry.total_inodes,
            // 根目录占用 0 号索引节点
            free_inodes: geometry.total_inodes - 1,
            inode_table_start: geometry.inode_table_start,
            data_blocks_start: geometry.data_blocks_start,
            block_bitmap_start: geometry.block_bitmap_start,
            inode_bitmap_start: geometry.inode_bitmap_start,
            volume_name: encode_name(volume_name),
            created_time,
            last_mount_time: 0,
            mount_count: 0,
            checksum: 0,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// 从 0 号块解析超级块。魔数不符时其余字段一概不可信。
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE || read_u32(bytes, 0) != MAGIC {
            return Err(Error::CorruptSuperblock);
        }

        let mut volume_name = [0; VOLUME_NAME_LEN];
        volume_name.copy_from_slice(&bytes[40..40 + VOLUME_NAME_LEN]);

        let super_block = Self {
            magic: MAGIC,
            block_size: read_u32(bytes, 4),
            total_blocks: read_u32(bytes, 8),
            free_blocks: read_u32(bytes, 12),
            total_inodes: read_u32(bytes, 16),
            free_inodes: read_u32(bytes, 20),
            inode_table_start: read_u32(bytes, 24),
            data_blocks_start: read_u32(bytes, 28),
            block_bitmap_start: read_u32(bytes, 32),
            inode_bitmap_start: read_u32(bytes, 36),
            volume_name,
            created_time: read_u64(bytes, 104),
            last_mount_time: read_u64(bytes, 112),
            mount_count: read_u32(bytes, 120),
            checksum: read_u32(bytes, Self::CHECKSUM_OFFSET),
        };

        if super_block.checksum != checksum(&bytes[..Self::CHECKSUM_OFFSET]) {
            log::error!("superblock checksum mismatch");
            return Err(Error::CorruptSuperblock);
        }

        Ok(super_block)
    }

    /// 写入 0 号块开头，同时刷新校验和
    pub fn encode(&mut self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..Self::SIZE];
        bytes.fill(0);

        write_u32(bytes, 0, self.magic);
        write_u32(bytes, 4, self.block_size);
        write_u32(bytes, 8, self.total_blocks);
        write_u32(bytes, 12, self.free_blocks);
        write_u32(bytes, 16, self.total_inodes);
        write_u32(bytes, 20, self.free_inodes);
        write_u32(bytes, 24, self.inode_table_start);
        write_u32(bytes, 28, self.data_blocks_start);
        write_u32(bytes, 32, self.block_bitmap_start);
        write_u32(bytes, 36, self.inode_bitmap_start);
        bytes[40..40 + VOLUME_NAME_LEN].copy_from_slice(&self.volume_name);
        write_u64(bytes, 104, self.created_time);
        write_u64(bytes, 112, self.last_mount_time);
        write_u32(bytes, 120, self.mount_count);

        self.checksum = checksum(&bytes[..Self::CHECKSUM_OFFSET]);
        write_u32(bytes, Self::CHECKSUM_OFFSET, self.checksum);
    }

    /// 由总块数与索引节点总数重新推导布局，并与记录的起始块比对
    pub fn geometry(&self) -> Result<Geometry> {
        if self.block_size as usize != BLOCK_SIZE {
            return Err(Error::CorruptSuperblock);
        }

        let geometry = Geometry::new(self.total_blocks, self.total_inodes)
            .map_err(|_| Error::CorruptSuperblock)?;
        let recorded = Geometry {
            total_blocks: self.total_blocks,
            total_inodes: self.total_inodes,
            block_bitmap_start: self.block_bitmap_start,
            inode_bitmap_start: self.inode_bitmap_start,
            inode_table_start: self.inode_table_start,
            data_blocks_start: self.data_blocks_start,
        };

        if geometry != recorded {
            return Err(Error::CorruptSuperblock);
        }

        Ok(geometry)
    }

    pub fn volume_name(&self) -> &str {
        let len = self
            .volume_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(VOLUME_NAME_LEN);
        str::from_utf8(&self.volume_name[..len]).unwrap_or_default()
    }
}

/// 截断到 63 字节以内的字符边界，留出结尾的 \0
fn encode_name(name: &str) -> [u8; VOLUME_NAME_LEN] {
    let mut end = name.len().min(VOLUME_NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    let mut buf = [0; VOLUME_NAME_LEN];
    buf[..end].copy_from_slice(&name.as_bytes()[..end]);
    buf
}

/// 按小端 u32 字求回绕和再取反
fn checksum(bytes: &[u8]) -> u32 {
    !bytes
        .chunks_exact(4)
        .map(|word| read_u32(word, 0))
        .fold(0u32, u32::wrapping_add)
}
