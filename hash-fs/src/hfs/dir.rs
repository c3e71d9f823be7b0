//! 目录遍历：目录的数据是若干铺满的目录项块

use alloc::string::String;

use vfs::{DirEntry, DirEntryType};

use super::Volume;
use crate::layout::dir_entry::{self, Header};
use crate::layout::DiskInode;
use crate::{Error, InodeId, Result, BLOCK_SIZE};

const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// 沿路径走到的最后一级，以及它的父目录
#[derive(Debug, Clone)]
pub(crate) struct Walk {
    pub parent: InodeId,
    pub id: InodeId,
    pub inode: DiskInode,
}

impl<D> Volume<D>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
{
    /// 自根目录起逐级查找
    pub fn walk(&self, cmps: &[&str]) -> Result<Walk> {
        let mut walk = Walk {
            parent: InodeId::ROOT,
            id: InodeId::ROOT,
            inode: self.inode(InodeId::ROOT)?,
        };

        for name in cmps {
            if !walk.inode.is_dir() {
                return Err(Error::NotADirectory);
            }
            let id = self.lookup(&walk.inode, name)?.ok_or(Error::NotFound)?;
            walk = Walk {
                parent: walk.id,
                id,
                inode: self.inode(id)?,
            };
        }

        Ok(walk)
    }

    /// 在目录下通过名字获取目录项的inode ID
    pub fn lookup(&self, dir: &DiskInode, name: &str) -> Result<Option<InodeId>> {
        debug_assert!(dir.is_dir());

        for index in 0..dir_blocks(dir) {
            let Some(block_id) = self.block_of(dir, index)? else {
                continue;
            };
            if let Some(header) = dir_entry::find(self.block(block_id)?, name.as_bytes())? {
                return Ok(Some(InodeId::from(header.inode)));
            }
        }

        Ok(None)
    }

    /// 向目录加入一项。首次加入时先建立含 `.` 与 `..` 的首块；
    /// 现有块都放不下时追加新块。
    ///
    /// 目录的 inode 可能已被修改，出错时调用者同样应将其写回。
    pub fn insert_entry(
        &mut self,
        dir: &mut Walk,
        name: &str,
        child: InodeId,
        kind: DirEntryType,
    ) -> Result<()> {
        debug_assert!(dir.inode.is_dir());

        if dir.inode.size == 0 {
            let block_id = self.ensure_block(&mut dir.inode, 0)?;
            dir_entry::init_first(self.block_mut(block_id)?, dir.id.into(), dir.parent.into());
            dir.inode.size = BLOCK_SIZE_U64;
        }

        let blocks = dir_blocks(&dir.inode);
        for index in 0..blocks {
            let Some(block_id) = self.block_of(&dir.inode, index)? else {
                continue;
            };
            let block = self.block_mut(block_id)?;
            if dir_entry::insert(block, child.into(), name.as_bytes(), kind)? {
                return Ok(());
            }
        }

        let block_id = self.ensure_block(&mut dir.inode, blocks)?;
        let block = self.block_mut(block_id)?;
        dir_entry::init_empty(block);
        if !dir_entry::insert(block, child.into(), name.as_bytes(), kind)? {
            return Err(Error::InvalidArgument);
        }
        dir.inode.size += BLOCK_SIZE_U64;

        Ok(())
    }

    /// 从目录删除同名项并返回其记录头
    pub fn remove_entry(&mut self, dir: &DiskInode, name: &str) -> Result<Option<Header>> {
        for index in 0..dir_blocks(dir) {
            let Some(block_id) = self.block_of(dir, index)? else {
                continue;
            };
            if let Some(header) = dir_entry::remove(self.block_mut(block_id)?, name.as_bytes())? {
                return Ok(Some(header));
            }
        }

        Ok(None)
    }

    /// 除 `.` 与 `..` 外再无其它项
    pub fn is_empty_dir(&self, dir: &DiskInode) -> Result<bool> {
        for index in 0..dir_blocks(dir) {
            let Some(block_id) = self.block_of(dir, index)? else {
                continue;
            };
            let block = self.block(block_id)?;
            for record in dir_entry::records(block) {
                let (offset, header) = record?;
                if header.is_used() && !matches!(header.name(block, offset), b"." | b"..") {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// 目录数据中位于 offset 及其之后的第一条有效项，连同下一项的起始偏移
    pub fn entry_at(&self, dir: &DiskInode, offset: u64) -> Result<Option<(DirEntry, u64)>> {
        let first = u32::try_from(offset / BLOCK_SIZE_U64).map_err(|_| Error::InvalidArgument)?;

        for index in first..dir_blocks(dir) {
            let Some(block_id) = self.block_of(dir, index)? else {
                continue;
            };
            let block = self.block(block_id)?;
            let base = u64::from(index) * BLOCK_SIZE_U64;

            for record in dir_entry::records(block) {
                let (in_block, header) = record?;
                let pos = base + in_block as u64;
                if pos < offset || !header.is_used() {
                    continue;
                }

                let entry = DirEntry {
                    inode: header.inode.into(),
                    ty: header.kind()?,
                    name: String::from_utf8_lossy(header.name(block, in_block)).into_owned(),
                };
                return Ok(Some((entry, pos + u64::from(header.rec_len))));
            }
        }

        Ok(None)
    }
}

/// 目录长度总是块大小的整数倍
#[inline]
fn dir_blocks(dir: &DiskInode) -> u32 {
    (dir.size / BLOCK_SIZE_U64) as u32
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::hfs::format;
    use crate::layout::{dir_entry::NAME_MAX_LEN, S_IFDIR};

    fn mounted() -> Volume<Vec<u8>> {
        let mut disk = vec![0u8; 1024 * BLOCK_SIZE];
        format(&mut disk, "dir").unwrap();
        Volume::mount(disk, 0).unwrap()
    }

    fn root(volume: &Volume<Vec<u8>>) -> Walk {
        volume.walk(&[]).unwrap()
    }

    #[test]
    fn first_insert_creates_dot_entries() {
        let mut volume = mounted();
        let mut dir = root(&volume);
        assert_eq!(dir.inode.size, 0);

        let child = volume.alloc_inode().unwrap();
        volume
            .insert_entry(&mut dir, "docs", child, DirEntryType::Directory)
            .unwrap();
        assert_eq!(dir.inode.size, BLOCK_SIZE_U64);
        assert_eq!(dir.inode.blocks, 1);

        assert_eq!(volume.lookup(&dir.inode, "docs"), Ok(Some(child)));
        assert_eq!(volume.lookup(&dir.inode, "."), Ok(Some(InodeId::ROOT)));
        assert_eq!(volume.lookup(&dir.inode, ".."), Ok(Some(InodeId::ROOT)));
        assert_eq!(volume.lookup(&dir.inode, "none"), Ok(None));
    }

    #[test]
    fn full_block_grows_directory() {
        let mut volume = mounted();
        let mut dir = root(&volume);
        let long = "n".repeat(NAME_MAX_LEN - 3);

        for i in 0..20u32 {
            let name = alloc::format!("{long}{i:03}");
            volume
                .insert_entry(&mut dir, &name, InodeId::from(100 + i), DirEntryType::Regular)
                .unwrap();
        }
        assert_eq!(dir.inode.size, 2 * BLOCK_SIZE_U64);

        let name = alloc::format!("{long}019");
        assert_eq!(volume.lookup(&dir.inode, &name), Ok(Some(InodeId::from(119))));
    }

    #[test]
    fn entries_list_in_order_and_skip_removed() {
        let mut volume = mounted();
        let mut dir = root(&volume);
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            volume
                .insert_entry(&mut dir, name, InodeId::from(i as u32 + 1), DirEntryType::Regular)
                .unwrap();
        }
        assert!(volume.remove_entry(&dir.inode, "b").unwrap().is_some());
        assert!(!volume.is_empty_dir(&dir.inode).unwrap());

        let mut names = Vec::new();
        let mut offset = 0;
        while let Some((entry, next)) = volume.entry_at(&dir.inode, offset).unwrap() {
            names.push(entry.name);
            offset = next;
        }
        assert_eq!(names, [".", "..", "a", "c"]);
    }

    #[test]
    fn emptied_directory_is_empty() {
        let mut volume = mounted();
        let mut dir = root(&volume);
        volume
            .insert_entry(&mut dir, "x", InodeId::from(1), DirEntryType::Regular)
            .unwrap();
        volume.remove_entry(&dir.inode, "x").unwrap();

        assert!(volume.is_empty_dir(&dir.inode).unwrap());
    }

    #[test]
    fn walk_reports_missing_and_non_directory() {
        let mut volume = mounted();
        let mut dir = root(&volume);
        let file = volume.alloc_inode().unwrap();
        volume
            .write_inode(file, &DiskInode::new(crate::S_IFREG | 0o644, 1, 0))
            .unwrap();
        volume
            .insert_entry(&mut dir, "file", file, DirEntryType::Regular)
            .unwrap();
        volume.write_inode(InodeId::ROOT, &dir.inode).unwrap();

        assert_eq!(volume.walk(&["file"]).unwrap().id, file);
        assert_eq!(volume.walk(&["missing"]).err(), Some(Error::NotFound));
        assert_eq!(volume.walk(&["file", "x"]).err(), Some(Error::NotADirectory));
        assert!(volume.walk(&[]).unwrap().inode.mode & S_IFDIR != 0);
    }
}
