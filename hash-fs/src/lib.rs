#![no_std]

extern crate alloc;

/* hash-fs 的整体架构，自上而下 */

// 句柄层：挂载状态、文件描述符表与面向调用者的文件操作
mod handle;

// 文件描述符表
mod fd;

// 卷管理层：格式化、挂载、分配器、索引节点表、块映射与目录遍历
mod hfs;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

mod id;
mod path;

pub use self::{
    fd::{FileDescriptor, OpenFlag, Whence},
    hfs::{format, format_with, FormatOptions},
    id::{BlockId, InodeId},
    layout::{DiskInode, SuperBlock, S_IFDIR, S_IFMT, S_IFREG},
    handle::{DebugInfo, HashFs, MountResult},
};

pub use vfs::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// "HASH"
pub const MAGIC: u32 = 0x4841_5348;
pub const BLOCK_SIZE: usize = 4096;
pub const BLOCK_BITS: u32 = BLOCK_SIZE as u32 * 8;
pub const MAX_INODES: u32 = 65536;
pub const MAX_OPEN_FILES: usize = 256;
/// Smallest image `format` and `init` accept
pub const MIN_VOLUME_SIZE: usize = 1024 * BLOCK_SIZE;
pub const DEFAULT_VOLUME_NAME: &str = "HASH_FS";
