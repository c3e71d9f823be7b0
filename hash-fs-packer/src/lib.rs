
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use hash_fs::{FormatOptions, HashFs, OpenFlag};
use vfs::{DirEntryType, Stat};

/// 一次打包写入的内容
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackStats {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// 自 UNIX 纪元起的秒数
pub fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[inline]
pub fn to_io(e: hash_fs::Error) -> io::Error {
    io::Error::other(e)
}

/// 建立一张格式化好的空映像
pub fn new_image(size: usize, volume_name: &str) -> io::Result<Vec<u8>> {
    let mut disk = vec![0u8; size];
    hash_fs::format_with(
        &mut disk,
        &FormatOptions {
            volume_name,
            created_time: system_clock(),
            ..Default::default()
        },
    )
    .map_err(to_io)?;
    Ok(disk)
}

/// 把宿主目录 `source` 下的整棵树复制到文件系统的 `target` 目录
pub fn pack_dir(fs: &HashFs, source: &Path, target: &str) -> io::Result<PackStats> {
    let mut stats = PackStats::default();

    let mut entries = fs::read_dir(source)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            log::warn!("skipping non UTF-8 name {name:?}");
            continue;
        };
        let path = join(target, name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            log::info!("dir={path:?}");
            fs.mkdir(&path, 0o755).map_err(to_io)?;
            stats.dirs += 1;

            let sub = pack_dir(fs, &entry.path(), &path)?;
            stats.files += sub.files;
            stats.dirs += sub.dirs;
            stats.bytes += sub.bytes;
        } else if file_type.is_file() {
            let data = fs::read(entry.path())?;
            log::info!("file={path:?} ({} bytes)", data.len());
            write_file(fs, &path, &data)?;
            stats.files += 1;
            stats.bytes += data.len() as u64;
        } else {
            log::warn!("skipping {path:?}: neither file nor directory");
        }
    }

    Ok(stats)
}

/// 创建或覆盖文件
pub fn write_file(fs: &HashFs, path: &str, data: &[u8]) -> io::Result<()> {
    let fd = fs
        .open(path, OpenFlag::WRONLY | OpenFlag::CREATE | OpenFlag::TRUNC)
        .map_err(to_io)?;

    let mut written = 0;
    let result = loop {
        if written == data.len() {
            break Ok(());
        }
        match fs.write(fd, &data[written..]) {
            Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e) => break Err(to_io(e)),
        }
    };

    fs.close(fd).map_err(to_io)?;
    result
}

pub fn read_file(fs: &HashFs, path: &str) -> io::Result<Vec<u8>> {
    let fd = fs.open(path, OpenFlag::read_only()).map_err(to_io)?;
    let mut data = Vec::new();
    let mut buf = [0u8; hash_fs::BLOCK_SIZE];

    let result = loop {
        match fs.read(fd, &mut buf) {
            Ok(0) => break Ok(data),
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) => break Err(to_io(e)),
        }
    };

    fs.close(fd).map_err(to_io)?;
    result
}

/// 深度优先列出 `path` 之下的所有项（不含 `.` 与 `..`）
pub fn tree(fs: &HashFs, path: &str) -> io::Result<Vec<(String, Stat)>> {
    let mut out = Vec::new();
    let mut children = Vec::new();

    let fd = fs.opendir(path).map_err(to_io)?;
    let listed = loop {
        match fs.readdir(fd) {
            Ok(Some(entry)) if entry.name == "." || entry.name == ".." => (),
            Ok(Some(entry)) => children.push(entry),
            Ok(None) => break Ok(()),
            Err(e) => break Err(to_io(e)),
        }
    };
    fs.closedir(fd).map_err(to_io)?;
    listed?;

    for entry in children {
        let child = join(path, &entry.name);
        let stat = fs.stat(&child).map_err(to_io)?;
        out.push((child.clone(), stat));
        if entry.ty == DirEntryType::Directory {
            out.extend(tree(fs, &child)?);
        }
    }

    Ok(out)
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
