mod cli;

use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use hash_fs::HashFs;
use hash_fs_packer::{new_image, pack_dir, system_clock, to_io, tree};
use typed_bytesize::ByteSizeIec;

use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            output,
            size_mib,
            name,
        } => pack(&source, &output, size_mib, &name),
        Command::Inspect { image } => inspect(&image),
    }
}

fn pack(source: &Path, output: &Path, size_mib: u64, name: &str) -> io::Result<()> {
    println!("source={source:?}\noutput={output:?}");

    let disk_size = usize::try_from(ByteSizeIec::mib(size_mib).0).map_err(io::Error::other)?;
    let fs = HashFs::with_clock(system_clock);
    fs.mount(new_image(disk_size, name)?)
        .map_err(|(e, _)| to_io(e))?;

    let stats = pack_dir(&fs, source, "/")?;
    log::info!(
        "packed {} files and {} directories, {} bytes",
        stats.files,
        stats.dirs,
        stats.bytes
    );

    println!("{}", fs.debug_info().map_err(to_io)?);
    let disk = fs
        .unmount()
        .ok_or_else(|| io::Error::other("image was not mounted"))?;
    fs::write(output, disk)
}

fn inspect(image: &Path) -> io::Result<()> {
    let fs = HashFs::with_clock(system_clock);
    fs.mount(fs::read(image)?).map_err(|(e, _)| to_io(e))?;

    println!("{}", fs.debug_info().map_err(to_io)?);
    for (path, stat) in tree(&fs, "/")? {
        println!(
            "{:>8} {:o} {:>3} {:>10} {path}",
            stat.inode, stat.mode, stat.links, stat.size
        );
    }

    Ok(())
}
