//! 目录项编码
//!
//! 目录的数据块由若干变长记录首尾相接铺满：
//! `inode: u32 | rec_len: u16 | name_len: u8 | file_type: u8 | name`。
//! 记录按 4 字节对齐，最后一条记录的 `rec_len` 延伸到块尾；
//! `name_len == 0` 的记录是空槽位；0 号 inode 是根目录，不能当作空标记。

use vfs::DirEntryType;

use super::{read_u16, read_u32, write_u16, write_u32};
use crate::{Error, Result};
use crate::BLOCK_SIZE;

/// 记录头部大小
pub const HEADER_SIZE: usize = 8;
pub const NAME_MAX_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

/// 容纳指定长度名字所需的最短记录
#[inline]
pub fn record_len(name_len: usize) -> usize {
    (HEADER_SIZE + name_len).next_multiple_of(4)
}

impl Header {
    /// 读取并校验块内 `offset` 处的记录头
    pub fn decode(block: &[u8], offset: usize) -> Result<Self> {
        if offset + HEADER_SIZE > BLOCK_SIZE {
            return Err(Error::Corrupted);
        }

        let header = Self {
            inode: read_u32(block, offset),
            rec_len: read_u16(block, offset + 4),
            name_len: block[offset + 6],
            file_type: block[offset + 7],
        };
        let rec_len = header.rec_len as usize;

        if rec_len < HEADER_SIZE
            || rec_len % 4 != 0
            || offset + rec_len > BLOCK_SIZE
            || HEADER_SIZE + header.name_len as usize > rec_len
        {
            log::error!("bad directory record at offset {offset}: {header:?}");
            return Err(Error::Corrupted);
        }

        Ok(header)
    }

    pub fn encode(&self, block: &mut [u8], offset: usize) {
        write_u32(block, offset, self.inode);
        write_u16(block, offset + 4, self.rec_len);
        block[offset + 6] = self.name_len;
        block[offset + 7] = self.file_type;
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.name_len != 0
    }

    /// 本记录至少需要的长度，多出的部分可以切给新记录
    #[inline]
    pub fn min_len(&self) -> usize {
        record_len(self.name_len as usize)
    }

    #[inline]
    pub fn name<'a>(&self, block: &'a [u8], offset: usize) -> &'a [u8] {
        &block[offset + HEADER_SIZE..offset + HEADER_SIZE + self.name_len as usize]
    }

    pub fn kind(&self) -> Result<DirEntryType> {
        DirEntryType::try_from(self.file_type)
    }
}

/// 依次遍历块内的所有记录（含空槽位），返回 `(offset, header)`
pub fn records(block: &[u8]) -> Records<'_> {
    Records { block, offset: 0 }
}

pub struct Records<'a> {
    block: &'a [u8],
    offset: usize,
}

impl Iterator for Records<'_> {
    type Item = Result<(usize, Header)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= BLOCK_SIZE {
            return None;
        }

        let offset = self.offset;
        match Header::decode(self.block, offset) {
            Ok(header) => {
                self.offset += header.rec_len as usize;
                Some(Ok((offset, header)))
            }
            Err(e) => {
                // 记录链已损坏，后续偏移不可信
                self.offset = BLOCK_SIZE;
                Some(Err(e))
            }
        }
    }
}

/// 把整块初始化为一条空记录
pub fn init_empty(block: &mut [u8]) {
    block[..BLOCK_SIZE].fill(0);
    Header {
        inode: 0,
        rec_len: BLOCK_SIZE as u16,
        name_len: 0,
        file_type: 0,
    }
    .encode(block, 0);
}

/// 目录的首块：`.` 指向自身，`..` 指向父目录，其余空间归 `..` 所有
pub fn init_first(block: &mut [u8], self_id: u32, parent_id: u32) {
    block[..BLOCK_SIZE].fill(0);

    let dot_len = record_len(1);
    write_record(block, 0, self_id, dot_len, b".", DirEntryType::Directory);
    write_record(
        block,
        dot_len,
        parent_id,
        BLOCK_SIZE - dot_len,
        b"..",
        DirEntryType::Directory,
    );
}

/// 在块内找位置放入新记录：复用足够大的空槽位，或切分尾部有富余的记录。
/// 放不下时返回 `false`。
pub fn insert(block: &mut [u8], inode: u32, name: &[u8], kind: DirEntryType) -> Result<bool> {
    let needed = record_len(name.len());

    let mut slot = None;
    for record in records(block) {
        let (offset, header) = record?;
        let rec_len = header.rec_len as usize;

        if !header.is_used() && rec_len >= needed {
            slot = Some((offset, rec_len));
            break;
        }
        if header.is_used() && rec_len - header.min_len() >= needed {
            let kept = header.min_len();
            Header {
                rec_len: kept as u16,
                ..header
            }
            .encode(block, offset);
            slot = Some((offset + kept, rec_len - kept));
            break;
        }
    }

    let Some((offset, rec_len)) = slot else {
        return Ok(false);
    };
    write_record(block, offset, inode, rec_len, name, kind);
    Ok(true)
}

/// 按名字查找有效记录
pub fn find(block: &[u8], name: &[u8]) -> Result<Option<Header>> {
    for record in records(block) {
        let (offset, header) = record?;
        if header.is_used() && header.name(block, offset) == name {
            return Ok(Some(header));
        }
    }
    Ok(None)
}

/// 删除同名记录并返回它；记录并入前一条，块首的记录则清空名字长度
pub fn remove(block: &mut [u8], name: &[u8]) -> Result<Option<Header>> {
    let mut prev: Option<(usize, Header)> = None;
    let mut found = None;

    for record in records(block) {
        let (offset, header) = record?;
        if header.is_used() && header.name(block, offset) == name {
            found = Some((offset, header));
            break;
        }
        prev = Some((offset, header));
    }

    let Some((offset, header)) = found else {
        return Ok(None);
    };

    match prev {
        Some((prev_offset, prev_header)) => Header {
            rec_len: prev_header.rec_len + header.rec_len,
            ..prev_header
        }
        .encode(block, prev_offset),
        None => Header {
            inode: 0,
            name_len: 0,
            file_type: 0,
            ..header
        }
        .encode(block, offset),
    }

    Ok(Some(header))
}

fn write_record(
    block: &mut [u8],
    offset: usize,
    inode: u32,
    rec_len: usize,
    name: &[u8],
    kind: DirEntryType,
) {
    debug_assert!(name.len() <= NAME_MAX_LEN && record_len(name.len()) <= rec_len);
    Header {
        inode,
        rec_len: rec_len as u16,
        name_len: name.len() as u8,
        file_type: kind.into(),
    }
    .encode(block, offset);
    block[offset + HEADER_SIZE..offset + HEADER_SIZE + name.len()].copy_from_slice(name);
}
