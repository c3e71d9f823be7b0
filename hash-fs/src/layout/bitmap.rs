use core::ops::Range;

use crate::BLOCK_SIZE;

/// 位图区域，记录其指示区域的分配情况（1 位对应 1 个单元）。
///
/// 位图只描述位置，数据始终留在磁盘映像里。
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// 位图的起始块
    start_block: u32,
    /// 位图占用块数
    blocks: u32,
    /// 可分配的单元编号，区间之外的位恒为已用或不存在
    usable: Range<u32>,
}

impl Bitmap {
    #[inline]
    pub fn new(start_block: u32, blocks: u32, usable: Range<u32>) -> Self {
        debug_assert!(usable.end as usize <= blocks as usize * BLOCK_SIZE * 8);
        Self {
            start_block,
            blocks,
            usable,
        }
    }

    #[inline]
    pub fn usable(&self) -> Range<u32> {
        self.usable.clone()
    }

    /// 从可分配区间的起点线性扫描第一个 0 位，置位后返回其编号。
    /// 若位图的空间用尽，则返回空。
    pub fn alloc(&self, disk: &mut [u8]) -> Option<u32> {
        let bits = self.bits_mut(disk);
        let mut id = self.usable.start;

        while id < self.usable.end {
            let byte = &mut bits[id as usize / 8];
            // 整字节已满时直接跳过
            if *byte == u8::MAX && id % 8 == 0 {
                id += 8;
                continue;
            }
            if *byte & (1 << (id % 8)) == 0 {
                *byte |= 1 << (id % 8);
                return Some(id);
            }
            id += 1;
        }

        None
    }

    /// 清除编号对应的位，返回该位原先是否置位
    pub fn dealloc(&self, disk: &mut [u8], id: u32) -> bool {
        debug_assert!(self.usable.contains(&id));
        let byte = &mut self.bits_mut(disk)[id as usize / 8];
        let was_set = *byte & (1 << (id % 8)) != 0;
        *byte &= !(1 << (id % 8));
        was_set
    }

    /// 置位，不论编号是否在可分配区间内
    pub fn mark(&self, disk: &mut [u8], id: u32) {
        self.bits_mut(disk)[id as usize / 8] |= 1 << (id % 8);
    }

    pub fn is_set(&self, disk: &[u8], id: u32) -> bool {
        self.bits(disk)[id as usize / 8] & (1 << (id % 8)) != 0
    }

    /// 可分配区间内 0 位的个数
    pub fn count_free(&self, disk: &[u8]) -> u32 {
        self.usable
            .clone()
            .filter(|&id| !self.is_set(disk, id))
            .count() as u32
    }

    fn bits<'a>(&self, disk: &'a [u8]) -> &'a [u8] {
        let start = self.start_block as usize * BLOCK_SIZE;
        &disk[start..start + self.blocks as usize * BLOCK_SIZE]
    }

    fn bits_mut<'a>(&self, disk: &'a mut [u8]) -> &'a mut [u8] {
        let start = self.start_block as usize * BLOCK_SIZE;
        &mut disk[start..start + self.blocks as usize * BLOCK_SIZE]
    }
}
