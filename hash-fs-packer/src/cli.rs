use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a fresh image from a host directory
    Pack {
        /// Host directory copied into the image root
        #[arg(long, short)]
        source: PathBuf,

        /// Output image
        #[arg(long, short)]
        output: PathBuf,

        /// Image size in MiB
        #[arg(long, default_value_t = 16)]
        size_mib: u64,

        /// Volume name stored in the superblock
        #[arg(long, default_value = hash_fs::DEFAULT_VOLUME_NAME)]
        name: String,
    },

    /// Print the superblock summary and the file tree of an image
    Inspect {
        /// Image to read
        image: PathBuf,
    },
}
