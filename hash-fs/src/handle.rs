//! # 句柄层
//!
//! 面向调用者的文件系统：[`HashFs`] 持有挂载的卷与文件描述符表，
//! 所有操作经由 `&self` 调用。
//!
//! 加锁顺序总是先描述符表、后卷。

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use enumflags2::BitFlags;
use spin::Mutex;
use vfs::{DirEntry, DirEntryType, Stat};

use crate::fd::{FdTable, FileDescriptor, OpenFlag, Whence};
use crate::hfs::{self, Volume, Walk};
use crate::layout::{DiskInode, SuperBlock, PERMISSION_MASK, S_IFDIR, S_IFREG};
use crate::path::Path;
use crate::{BlockId, Error, InodeId, Result};
use crate::{BLOCK_SIZE, DEFAULT_VOLUME_NAME, MIN_VOLUME_SIZE};

/// 挂载的结果，失败时连同未被改动的映像一起返回
pub type MountResult<D> = Result<(), (Error, D)>;

pub struct HashFs<D = Vec<u8>> {
    volume: Mutex<Option<Volume<D>>>,
    fds: Mutex<FdTable>,
    /// 时间戳来源
    clock: fn() -> u64,
}

/// 卷的概况
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub volume_name: String,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub block_bitmap_start: u32,
    pub inode_bitmap_start: u32,
    pub inode_table_start: u32,
    pub data_blocks_start: u32,
    pub created_time: u64,
    pub last_mount_time: u64,
    pub mount_count: u32,
    pub open_files: usize,
}

impl<D> Default for HashFs<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> HashFs<D> {
    pub fn new() -> Self {
        Self::with_clock(|| 0)
    }

    pub fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            volume: Mutex::new(None),
            fds: Mutex::new(FdTable::new()),
            clock,
        }
    }

    #[inline]
    pub fn is_mounted(&self) -> bool {
        self.volume.lock().is_some()
    }

    /// 当前打开的描述符个数
    #[inline]
    pub fn open_files(&self) -> usize {
        self.fds.lock().len()
    }

    #[inline]
    fn now(&self) -> u64 {
        (self.clock)()
    }
}

impl<D> HashFs<D>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    /// 丢弃当前状态并挂载映像
    pub fn init(&self, disk: D) -> MountResult<D> {
        if disk.as_ref().len() < MIN_VOLUME_SIZE {
            return Err((Error::InvalidArgument, disk));
        }
        self.unmount();
        self.mount(disk)
    }

    /// 在映像上建立默认名字的新文件系统并挂载
    pub fn format_and_mount(&self, mut disk: D) -> MountResult<D> {
        if let Err(e) = hfs::format(disk.as_mut(), DEFAULT_VOLUME_NAME) {
            return Err((e, disk));
        }
        self.mount(disk)
    }

    /// 挂载映像。描述符表无论成败都被清空；失败时交还映像。
    pub fn mount(&self, disk: D) -> MountResult<D> {
        let mut fds = self.fds.lock();
        let mut volume = self.volume.lock();
        if volume.is_some() {
            return Err((Error::Busy, disk));
        }

        fds.clear();
        *volume = Some(Volume::mount(disk, self.now())?);
        Ok(())
    }

    /// 关闭所有描述符，写回超级块并交还映像。未挂载时返回空。
    pub fn unmount(&self) -> Option<D> {
        let mut fds = self.fds.lock();
        let mut volume = self.volume.lock();

        let open = fds.len();
        if open > 0 {
            log::warn!("closing {open} descriptors left open at unmount");
        }
        fds.clear();

        let disk = volume.take()?.into_disk();
        log::info!("unmounted");
        Some(disk)
    }

    /// 把超级块写回映像
    pub fn sync(&self) -> Result<()> {
        self.with_volume(|volume| {
            volume.sync();
            Ok(())
        })
    }

    pub fn open(&self, path: &str, flags: BitFlags<OpenFlag>) -> Result<usize> {
        let mut fds = self.fds.lock();
        let mut volume = self.volume.lock();
        let volume = volume.as_mut().ok_or(Error::NotMounted)?;

        let fd = fds.free_slot()?;
        let now = self.now();
        let cmps = path.components()?;
        let mut desc = FileDescriptor::new(InodeId::ROOT, flags);

        desc.inode = match volume.walk(&cmps) {
            Ok(Walk { id, mut inode, .. }) => {
                if inode.is_dir() {
                    if desc.writable() {
                        return Err(Error::IsADirectory);
                    }
                } else if flags.contains(OpenFlag::TRUNC) && (inode.size > 0 || inode.blocks > 0) {
                    let result = volume.release_blocks(&mut inode);
                    inode.mtime = now;
                    inode.ctime = now;
                    volume.write_inode(id, &inode)?;
                    result?;
                }
                id
            }
            Err(Error::NotFound) if flags.contains(OpenFlag::CREATE) => {
                create_file(volume, &cmps, now)?
            }
            Err(e) => return Err(e),
        };

        log::debug!("open {path:?} as fd {fd} ({:?})", desc.inode);
        fds.insert(fd, desc);
        Ok(fd)
    }

    /// 重复关闭是调用者的错误
    pub fn close(&self, fd: usize) -> Result<()> {
        let desc = self.fds.lock().remove(fd)?;
        log::debug!("close fd {fd} ({:?})", desc.inode);
        Ok(())
    }

    /// 自游标处读入 `buf`，返回读到的字节数，文件末尾返回 0
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let mut fds = self.fds.lock();
        let mut volume = self.volume.lock();
        let volume = volume.as_mut().ok_or(Error::NotMounted)?;

        let desc = fds.get_mut(fd)?;
        if !desc.readable() {
            return Err(Error::InvalidArgument);
        }
        let mut inode = volume.inode(desc.inode)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }

        let read = volume.read_at(&inode, desc.cursor, buf)?;
        desc.cursor += read as u64;
        if read > 0 {
            inode.atime = self.now();
            volume.write_inode(desc.inode, &inode)?;
        }

        Ok(read)
    }

    /// 自游标处写入 `buf`，返回写入的字节数。
    ///
    /// 空间中途耗尽时保留已写入的部分并返回其长度。
    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize> {
        let mut fds = self.fds.lock();
        let mut volume = self.volume.lock();
        let volume = volume.as_mut().ok_or(Error::NotMounted)?;

        let desc = fds.get_mut(fd)?;
        if !desc.writable() {
            return Err(Error::InvalidArgument);
        }
        let mut inode = volume.inode(desc.inode)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }

        let result = volume.write_at(&mut inode, desc.cursor, buf);
        if let Ok(written) = result {
            desc.cursor += written as u64;
            if written > 0 {
                let now = self.now();
                inode.mtime = now;
                inode.ctime = now;
            }
        }
        // 失败时已分配的块同样记录在 inode 中
        volume.write_inode(desc.inode, &inode)?;

        result
    }

    /// 移动游标并返回新位置；允许越过文件末尾
    pub fn lseek(&self, fd: usize, offset: i64, whence: Whence) -> Result<u64> {
        let mut fds = self.fds.lock();
        let volume = self.volume.lock();
        let volume = volume.as_ref().ok_or(Error::NotMounted)?;

        let desc = fds.get_mut(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => desc.cursor,
            Whence::End => volume.inode(desc.inode)?.size,
        };
        desc.cursor = base
            .checked_add_signed(offset)
            .ok_or(Error::InvalidArgument)?;

        Ok(desc.cursor)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        self.with_volume(|volume| {
            let now = self.now();
            let (parent_cmps, name) = path.parent_file()?;
            let mut parent = volume.walk(&parent_cmps)?;
            if !parent.inode.is_dir() {
                return Err(Error::NotADirectory);
            }
            if volume.lookup(&parent.inode, name)?.is_some() {
                return Err(Error::AlreadyExists);
            }

            let id = volume.alloc_inode()?;
            let inode = DiskInode::new(S_IFDIR | (mode & PERMISSION_MASK), 2, now);
            volume.write_inode(id, &inode)?;
            if let Err(e) = link_child(volume, &mut parent, name, id, DirEntryType::Directory, now)
            {
                volume.dealloc_inode(id)?;
                return Err(e);
            }

            log::debug!("mkdir {path:?} ({id:?})");
            Ok(())
        })
    }

    /// 删除普通文件的目录项；链接数归零时释放其全部块与索引节点
    pub fn unlink(&self, path: &str) -> Result<()> {
        let fds = self.fds.lock();
        let mut volume = self.volume.lock();
        let volume = volume.as_mut().ok_or(Error::NotMounted)?;

        let now = self.now();
        let (mut parent, name, id, mut inode) = lookup_child(volume, path)?;
        if inode.is_dir() {
            return Err(Error::IsADirectory);
        }
        if fds.is_open(id) {
            return Err(Error::Busy);
        }

        unlink_child(volume, &mut parent, name, now)?;

        inode.links = inode.links.saturating_sub(1);
        if inode.links == 0 {
            volume.release_blocks(&mut inode)?;
            volume.dealloc_inode(id)?;
        } else {
            inode.ctime = now;
            volume.write_inode(id, &inode)?;
        }

        log::debug!("unlink {path:?} ({id:?})");
        Ok(())
    }

    /// 删除空目录
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let fds = self.fds.lock();
        let mut volume = self.volume.lock();
        let volume = volume.as_mut().ok_or(Error::NotMounted)?;

        let now = self.now();
        let (mut parent, name, id, mut inode) = lookup_child(volume, path)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }
        if !volume.is_empty_dir(&inode)? {
            return Err(Error::DirectoryNotEmpty);
        }
        if fds.is_open(id) {
            return Err(Error::Busy);
        }

        parent.inode.links = parent.inode.links.saturating_sub(1);
        unlink_child(volume, &mut parent, name, now)?;
        volume.release_blocks(&mut inode)?;
        volume.dealloc_inode(id)?;

        log::debug!("rmdir {path:?} ({id:?})");
        Ok(())
    }

    pub fn opendir(&self, path: &str) -> Result<usize> {
        let mut fds = self.fds.lock();
        let volume = self.volume.lock();
        let volume = volume.as_ref().ok_or(Error::NotMounted)?;

        let fd = fds.free_slot()?;
        let walk = volume.walk(&path.components()?)?;
        if !walk.inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        fds.insert(fd, FileDescriptor::new(walk.id, OpenFlag::read_only()));
        log::debug!("opendir {path:?} as fd {fd}");
        Ok(fd)
    }

    /// 依次返回目录中的各项，读完后返回空
    pub fn readdir(&self, fd: usize) -> Result<Option<DirEntry>> {
        let mut fds = self.fds.lock();
        let volume = self.volume.lock();
        let volume = volume.as_ref().ok_or(Error::NotMounted)?;

        let desc = fds.get_mut(fd)?;
        let inode = volume.inode(desc.inode)?;
        if !inode.is_dir() {
            return Err(Error::NotADirectory);
        }

        let Some((entry, next)) = volume.entry_at(&inode, desc.cursor)? else {
            desc.cursor = inode.size;
            return Ok(None);
        };
        desc.cursor = next;
        Ok(Some(entry))
    }

    pub fn closedir(&self, fd: usize) -> Result<()> {
        let mut fds = self.fds.lock();
        let volume = self.volume.lock();
        let volume = volume.as_ref().ok_or(Error::NotMounted)?;

        if !volume.inode(fds.get(fd)?.inode)?.is_dir() {
            return Err(Error::NotADirectory);
        }
        fds.remove(fd)?;
        log::debug!("closedir fd {fd}");
        Ok(())
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        self.with_volume(|volume| {
            let walk = volume.walk(&path.components()?)?;
            Ok(stat(walk.id, &walk.inode))
        })
    }

    pub fn fstat(&self, fd: usize) -> Result<Stat> {
        let fds = self.fds.lock();
        let volume = self.volume.lock();
        let volume = volume.as_ref().ok_or(Error::NotMounted)?;

        let id = fds.get(fd)?.inode;
        Ok(stat(id, &volume.inode(id)?))
    }

    pub fn allocate_block(&self) -> Result<BlockId> {
        self.with_volume(|volume| volume.alloc_block())
    }

    /// 释放数据区之外的块是非法参数；释放空闲块什么也不做
    pub fn free_block(&self, block_id: BlockId) -> Result<()> {
        self.with_volume(|volume| volume.dealloc_block(block_id))
    }

    pub fn is_block_allocated(&self, block_id: BlockId) -> Result<bool> {
        self.with_volume(|volume| volume.is_block_allocated(block_id))
    }

    pub fn allocate_inode(&self) -> Result<InodeId> {
        self.with_volume(|volume| volume.alloc_inode())
    }

    pub fn free_inode(&self, inode_id: InodeId) -> Result<()> {
        self.with_volume(|volume| volume.dealloc_inode(inode_id))
    }

    /// 内存中超级块的副本
    pub fn super_block(&self) -> Result<SuperBlock> {
        self.with_volume(|volume| Ok(volume.super_block().clone()))
    }

    pub fn debug_info(&self) -> Result<DebugInfo> {
        let open_files = self.open_files();
        let sb = self.super_block()?;

        Ok(DebugInfo {
            volume_name: String::from(sb.volume_name()),
            block_size: sb.block_size,
            total_blocks: sb.total_blocks,
            free_blocks: sb.free_blocks,
            total_inodes: sb.total_inodes,
            free_inodes: sb.free_inodes,
            block_bitmap_start: sb.block_bitmap_start,
            inode_bitmap_start: sb.inode_bitmap_start,
            inode_table_start: sb.inode_table_start,
            data_blocks_start: sb.data_blocks_start,
            created_time: sb.created_time,
            last_mount_time: sb.last_mount_time,
            mount_count: sb.mount_count,
            open_files,
        })
    }

    fn with_volume<V>(&self, f: impl FnOnce(&mut Volume<D>) -> Result<V>) -> Result<V> {
        let mut volume = self.volume.lock();
        f(volume.as_mut().ok_or(Error::NotMounted)?)
    }
}

/// 在父目录中新建普通文件，失败时归还索引节点
fn create_file<D>(volume: &mut Volume<D>, cmps: &[&str], now: u64) -> Result<InodeId>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    let (name, parent_cmps) = cmps.split_last().ok_or(Error::InvalidArgument)?;
    let mut parent = volume.walk(parent_cmps)?;
    if !parent.inode.is_dir() {
        return Err(Error::NotADirectory);
    }

    let id = volume.alloc_inode()?;
    volume.write_inode(id, &DiskInode::new(S_IFREG | 0o644, 1, now))?;
    if let Err(e) = link_child(volume, &mut parent, name, id, DirEntryType::Regular, now) {
        volume.dealloc_inode(id)?;
        return Err(e);
    }

    log::debug!("created {name:?} ({id:?})");
    Ok(id)
}

/// 把子项加入父目录；子目录的 `..` 使父目录链接数加一
fn link_child<D>(
    volume: &mut Volume<D>,
    parent: &mut Walk,
    name: &str,
    child: InodeId,
    kind: DirEntryType,
    now: u64,
) -> Result<()>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    let result = volume.insert_entry(parent, name, child, kind);
    if result.is_ok() {
        if kind == DirEntryType::Directory {
            parent.inode.links += 1;
        }
        parent.inode.mtime = now;
        parent.inode.ctime = now;
    }
    volume.write_inode(parent.id, &parent.inode)?;
    result
}

fn unlink_child<D>(volume: &mut Volume<D>, parent: &mut Walk, name: &str, now: u64) -> Result<()>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    volume
        .remove_entry(&parent.inode, name)?
        .ok_or(Error::NotFound)?;
    parent.inode.mtime = now;
    parent.inode.ctime = now;
    volume.write_inode(parent.id, &parent.inode)
}

/// 找到路径的父目录与其中的子项
fn lookup_child<'a, D>(
    volume: &Volume<D>,
    path: &'a str,
) -> Result<(Walk, &'a str, InodeId, DiskInode)>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    let (parent_cmps, name) = path.parent_file()?;
    let parent = volume.walk(&parent_cmps)?;
    if !parent.inode.is_dir() {
        return Err(Error::NotADirectory);
    }
    let id = volume
        .lookup(&parent.inode, name)?
        .ok_or(Error::NotFound)?;
    let inode = volume.inode(id)?;
    Ok((parent, name, id, inode))
}

fn stat(id: InodeId, inode: &DiskInode) -> Stat {
    Stat {
        inode: id.into(),
        kind: inode.kind(),
        mode: inode.mode,
        links: inode.links,
        size: inode.size,
        blocks: inode.blocks.into(),
        block_size: BLOCK_SIZE as u64,
        atime: inode.atime,
        mtime: inode.mtime,
        ctime: inode.ctime,
    }
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "volume:       {}", self.volume_name)?;
        writeln!(f, "block size:   {}", self.block_size)?;
        writeln!(
            f,
            "blocks:       {} free / {} total",
            self.free_blocks, self.total_blocks
        )?;
        writeln!(
            f,
            "inodes:       {} free / {} total",
            self.free_inodes, self.total_inodes
        )?;
        writeln!(
            f,
            "layout:       block bitmap @{}, inode bitmap @{}, inode table @{}, data @{}",
            self.block_bitmap_start,
            self.inode_bitmap_start,
            self.inode_table_start,
            self.data_blocks_start
        )?;
        writeln!(
            f,
            "created:      {}, last mounted: {} (#{})",
            self.created_time, self.last_mount_time, self.mount_count
        )?;
        write!(f, "open files:   {}", self.open_files)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn mounted() -> HashFs {
        let fs = HashFs::new();
        fs.format_and_mount(vec![0u8; 1024 * BLOCK_SIZE]).unwrap();
        fs
    }

    #[test]
    fn operations_need_mount() {
        let fs: HashFs = HashFs::new();
        assert_eq!(fs.open("/a", OpenFlag::CREATE.into()), Err(Error::NotMounted));
        assert_eq!(fs.mkdir("/a", 0o755), Err(Error::NotMounted));
        assert_eq!(fs.debug_info().err(), Some(Error::NotMounted));
        assert!(fs.unmount().is_none());
    }

    #[test]
    fn second_mount_is_busy() {
        let fs = mounted();
        let mut other = vec![0u8; 1024 * BLOCK_SIZE];
        hfs::format(&mut other, "other").unwrap();
        let Err((err, other)) = fs.mount(other) else {
            panic!("second mount succeeded");
        };
        assert_eq!(err, Error::Busy);
        assert_eq!(other.len(), 1024 * BLOCK_SIZE);
    }

    #[test]
    fn failed_init_hands_image_back_for_reformat() {
        let fs: HashFs = HashFs::new();
        let blank = vec![0u8; 1024 * BLOCK_SIZE];

        let Err((err, blank)) = fs.init(blank) else {
            panic!("mounted a blank image");
        };
        assert_eq!(err, Error::CorruptSuperblock);
        assert!(blank.iter().all(|&b| b == 0));
        assert!(!fs.is_mounted());

        fs.format_and_mount(blank).unwrap();
        assert!(fs.is_mounted());

        let Err((err, small)) = fs.init(vec![0u8; 16]) else {
            panic!("mounted an undersized image");
        };
        assert_eq!(err, Error::InvalidArgument);
        assert_eq!(small.len(), 16);
        // 过小的映像被拒绝时不影响已挂载的卷
        assert!(fs.is_mounted());
    }

    #[test]
    fn timestamps_follow_clock() {
        let fs = HashFs::with_clock(|| 1_700_000_000);
        fs.format_and_mount(vec![0u8; 1024 * BLOCK_SIZE]).unwrap();

        let fd = fs.open("/t", OpenFlag::CREATE | OpenFlag::RDWR).unwrap();
        fs.write(fd, b"now").unwrap();
        let stat = fs.fstat(fd).unwrap();
        assert_eq!(stat.mtime, 1_700_000_000);
        assert_eq!(fs.debug_info().unwrap().last_mount_time, 1_700_000_000);
    }

    #[test]
    fn debug_info_renders() {
        let fs = mounted();
        let fd = fs.open("/", OpenFlag::read_only()).unwrap();
        let info = fs.debug_info().unwrap();
        assert_eq!(info.open_files, 1);
        fs.close(fd).unwrap();

        let text = alloc::format!("{info}");
        assert!(text.contains("volume:       HASH_FS"));
        assert!(text.ends_with("open files:   1"));
    }
}
