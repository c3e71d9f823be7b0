//! 文件描述符表
//!
//! 固定 [`MAX_OPEN_FILES`] 个槽位，自上次分配处起轮转查找空槽位。

use alloc::vec::Vec;

use enumflags2::{bitflags, BitFlags};

use crate::{Error, InodeId, Result, MAX_OPEN_FILES};

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY = 0b0000_0000_0001,
    /// 读写兼备
    RDWR = 0b0000_0000_0010,
    /// 不存在时创建
    CREATE = 0b0010_0000_0000,
    /// 清空已有内容
    TRUNC = 0b0100_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }
}

/// lseek 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(Error::InvalidArgument),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub inode: InodeId,
    /// 读写游标；目录则为目录数据中下一条记录的偏移
    pub cursor: u64,
    pub flags: BitFlags<OpenFlag>,
    readable: bool,
    writable: bool,
}

impl FileDescriptor {
    pub fn new(inode: InodeId, flags: BitFlags<OpenFlag>) -> Self {
        let [readable, writable] = if flags.is_empty() {
            [true, false]
        } else if flags.contains(OpenFlag::WRONLY) {
            [false, true]
        } else {
            [true, true]
        };

        Self {
            inode,
            cursor: 0,
            flags,
            readable,
            writable,
        }
    }

    #[inline]
    pub fn readable(&self) -> bool {
        self.readable
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }
}

#[derive(Debug)]
pub(crate) struct FdTable {
    slots: Vec<Option<FileDescriptor>>,
    /// 下一次查找的起点
    next: usize,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_OPEN_FILES).map(|_| None).collect(),
            next: 0,
        }
    }

    /// 自上次分配处起轮转寻找空槽位
    pub fn free_slot(&self) -> Result<usize> {
        (0..MAX_OPEN_FILES)
            .map(|i| (self.next + i) % MAX_OPEN_FILES)
            .find(|&fd| self.slots[fd].is_none())
            .ok_or(Error::OutOfDescriptors)
    }

    pub fn insert(&mut self, fd: usize, desc: FileDescriptor) {
        debug_assert!(self.slots[fd].is_none());
        self.slots[fd] = Some(desc);
        self.next = (fd + 1) % MAX_OPEN_FILES;
    }

    pub fn get(&self, fd: usize) -> Result<&FileDescriptor> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidArgument)
    }

    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FileDescriptor> {
        self.slots
            .get_mut(fd)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidArgument)
    }

    pub fn remove(&mut self, fd: usize) -> Result<FileDescriptor> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(Error::InvalidArgument)
    }

    /// 是否有描述符仍引用该索引节点
    pub fn is_open(&self, inode: InodeId) -> bool {
        self.iter().any(|(_, desc)| desc.inode == inode)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FileDescriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|desc| (fd, desc)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: u32) -> FileDescriptor {
        FileDescriptor::new(InodeId::from(id), OpenFlag::read_only())
    }

    #[test]
    fn slots_rotate_from_last_assigned() {
        let mut table = FdTable::new();
        table.insert(table.free_slot().unwrap(), desc(1));
        table.insert(table.free_slot().unwrap(), desc(2));
        table.remove(0).unwrap();

        // 不立即复用刚释放的 0 号
        assert_eq!(table.free_slot(), Ok(2));
    }

    #[test]
    fn full_table_wraps_to_freed_slot() {
        let mut table = FdTable::new();
        for i in 0..MAX_OPEN_FILES {
            table.insert(table.free_slot().unwrap(), desc(i as u32));
        }
        assert_eq!(table.free_slot(), Err(Error::OutOfDescriptors));

        table.remove(7).unwrap();
        assert_eq!(table.free_slot(), Ok(7));
        assert_eq!(table.len(), MAX_OPEN_FILES - 1);
    }

    #[test]
    fn closed_or_out_of_range_fd_is_invalid() {
        let mut table = FdTable::new();
        table.insert(3, desc(1));

        assert!(table.remove(3).is_ok());
        assert_eq!(table.remove(3), Err(Error::InvalidArgument));
        assert_eq!(table.get(MAX_OPEN_FILES).err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn access_mode_follows_flags() {
        let read_only = FileDescriptor::new(InodeId::ROOT, OpenFlag::read_only());
        assert!(read_only.readable() && !read_only.writable());

        let write_only = FileDescriptor::new(InodeId::ROOT, OpenFlag::WRONLY.into());
        assert!(!write_only.readable() && write_only.writable());

        let create = FileDescriptor::new(InodeId::ROOT, OpenFlag::CREATE.into());
        assert!(create.readable() && create.writable());
    }

    #[test]
    fn whence_from_raw() {
        assert_eq!(Whence::try_from(2), Ok(Whence::End));
        assert_eq!(Whence::try_from(3), Err(Error::InvalidArgument));
    }
}
