use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and edit chainfs disk images
#[derive(Parser)]
pub struct Cli {
    /// Disk image file
    #[arg(long, short, default_value = "disk.img")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new image holding an empty file system
    Format {
        /// Size of the disk in sectors
        #[arg(long, short, default_value_t = 1024)]
        sectors: usize,
    },
    /// Copy a host file into the image
    Put { source: PathBuf, path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Remove a file or an empty directory
    Rm { path: String },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Descend into subdirectories
        #[arg(long, short)]
        recursive: bool,
    },
    /// Print the system file headers, the free map and the root directory
    Dump,
}
