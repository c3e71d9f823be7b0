//! 索引节点记录与块索引
//!
//! - 直接索引：记录中的 12 个块编号直接指向**数据块**
//! - 一级：整个块连续存储**块编号**，每个编号都指向一个**数据块**
//! - 二级：整个块连续存储**块编号**，每个编号都指向一个一级索引块
//! - 三级：整个块连续存储**块编号**，每个编号都指向一个二级索引块
//!
//! 块编号为 0 表示该位置尚未分配（0 号块是超级块，不可能是数据块）。

use vfs::DirEntryType;

use super::{read_u32, read_u64, write_u32, write_u64};
use crate::BLOCK_SIZE;

/// 单条索引节点记录的大小
pub const INODE_SIZE: usize = 128;
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;

/// 直接索引块可编号数量
pub const DIRECT_COUNT: usize = 12;
/// 间接索引块的编号容量
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
/// 一级索引块可编号数量
const INDIRECT1_COUNT: usize = POINTERS_PER_BLOCK;
/// 二级索引块可编号数量
const INDIRECT2_COUNT: usize = POINTERS_PER_BLOCK.pow(2);
/// 三级索引块可编号数量
const INDIRECT3_COUNT: usize = POINTERS_PER_BLOCK.pow(3);

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const PERMISSION_MASK: u32 = 0o7777;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskInode {
    /// 类型位 | 权限位
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// 硬链接个数
    pub links: u32,
    /// 已分配的块数，索引块也计入
    pub blocks: u32,
    /// 直接索引块，存储容量：DIRECT_COUNT * BLOCK_SIZE 字节
    pub direct: [u32; DIRECT_COUNT],
    /// 指向一个一级索引块
    pub indirect1: u32,
    /// 指向一个二级索引块
    pub indirect2: u32,
    /// 指向一个三级索引块
    pub indirect3: u32,
}

/// 文件内第 n 个数据块在索引树上的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPath {
    /// 直接索引的槽位
    Direct(usize),
    /// `depth` 级间接索引，自根向下依次在各级索引块中取 `slots[..depth]`
    Indirect { depth: usize, slots: [usize; 3] },
}

impl DiskInode {
    #[inline]
    pub fn new(mode: u32, links: u32, now: u64) -> Self {
        Self {
            mode,
            links,
            atime: now,
            mtime: now,
            ctime: now,
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[inline]
    pub fn kind(&self) -> DirEntryType {
        if self.is_dir() {
            DirEntryType::Directory
        } else {
            DirEntryType::Regular
        }
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let bytes = &bytes[..INODE_SIZE];
        let mut direct = [0; DIRECT_COUNT];
        for (slot, pointer) in direct.iter_mut().enumerate() {
            *pointer = read_u32(bytes, 56 + slot * 4);
        }

        Self {
            mode: read_u32(bytes, 0),
            uid: read_u32(bytes, 4),
            gid: read_u32(bytes, 8),
            size: read_u64(bytes, 16),
            atime: read_u64(bytes, 24),
            mtime: read_u64(bytes, 32),
            ctime: read_u64(bytes, 40),
            links: read_u32(bytes, 48),
            blocks: read_u32(bytes, 52),
            direct,
            indirect1: read_u32(bytes, 104),
            indirect2: read_u32(bytes, 108),
            indirect3: read_u32(bytes, 112),
        }
    }

    /// 写入记录，保留区与对齐填充一并清零
    pub fn encode(&self, bytes: &mut [u8]) {
        let bytes = &mut bytes[..INODE_SIZE];
        bytes.fill(0);

        write_u32(bytes, 0, self.mode);
        write_u32(bytes, 4, self.uid);
        write_u32(bytes, 8, self.gid);
        write_u64(bytes, 16, self.size);
        write_u64(bytes, 24, self.atime);
        write_u64(bytes, 32, self.mtime);
        write_u64(bytes, 40, self.ctime);
        write_u32(bytes, 48, self.links);
        write_u32(bytes, 52, self.blocks);
        for (slot, &pointer) in self.direct.iter().enumerate() {
            write_u32(bytes, 56 + slot * 4, pointer);
        }
        write_u32(bytes, 104, self.indirect1);
        write_u32(bytes, 108, self.indirect2);
        write_u32(bytes, 112, self.indirect3);
    }

    /// 索引树根部的块编号：直接索引槽位或某一级间接索引块
    #[inline]
    pub fn root(&self, path: &BlockPath) -> u32 {
        match *path {
            BlockPath::Direct(slot) => self.direct[slot],
            BlockPath::Indirect { depth, .. } => *self.indirect_root(depth),
        }
    }

    #[inline]
    pub fn set_root(&mut self, path: &BlockPath, block_id: u32) {
        match *path {
            BlockPath::Direct(slot) => self.direct[slot] = block_id,
            BlockPath::Indirect { depth, .. } => *self.indirect_root_mut(depth) = block_id,
        }
    }

    /// 各级间接索引的根，依次为一级、二级、三级
    #[inline]
    pub fn indirect_roots(&self) -> [u32; 3] {
        [self.indirect1, self.indirect2, self.indirect3]
    }

    fn indirect_root(&self, depth: usize) -> &u32 {
        match depth {
            1 => &self.indirect1,
            2 => &self.indirect2,
            _ => &self.indirect3,
        }
    }

    fn indirect_root_mut(&mut self, depth: usize) -> &mut u32 {
        match depth {
            1 => &mut self.indirect1,
            2 => &mut self.indirect2,
            _ => &mut self.indirect3,
        }
    }
}

impl BlockPath {
    /// 逻辑上 inode 指向一系列数据块，此处传入的是这些数据块的索引（逻辑索引）。
    /// 超出三级索引的容量时返回空。
    pub fn locate(block_index: u32) -> Option<Self> {
        let mut index = block_index as usize;

        if index < DIRECT_COUNT {
            return Some(Self::Direct(index));
        }
        // 剔去直接索引的部分
        index -= DIRECT_COUNT;

        if index < INDIRECT1_COUNT {
            return Some(Self::Indirect {
                depth: 1,
                slots: [index, 0, 0],
            });
        }
        // 剔去使用了一级索引的部分
        index -= INDIRECT1_COUNT;

        if index < INDIRECT2_COUNT {
            return Some(Self::Indirect {
                depth: 2,
                slots: [index / INDIRECT1_COUNT, index % INDIRECT1_COUNT, 0],
            });
        }
        // 剔去使用了二级索引的部分
        index -= INDIRECT2_COUNT;

        (index < INDIRECT3_COUNT).then_some(Self::Indirect {
            depth: 3,
            slots: [
                index / INDIRECT2_COUNT,
                index % INDIRECT2_COUNT / INDIRECT1_COUNT,
                index % INDIRECT1_COUNT,
            ],
        })
    }

    /// 自根向下在各级索引块中取的槽位，直接索引为空
    #[inline]
    pub fn slots(&self) -> &[usize] {
        match self {
            Self::Direct(_) => &[],
            Self::Indirect { depth, slots } => &slots[..*depth],
        }
    }
}
