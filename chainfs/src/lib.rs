//! A small sector based file system. Files are described by headers that point
//! at a chain of index blocks, so a file may span any number of data sectors.
//!
//! # Layout
//! ==========================================================================
//! | Free map header | Root dir header | Free map, root dir and user sectors |
//! ==========================================================================
//!
//! Both the free sector bitmap and the root directory are ordinary files whose
//! headers live at the well known sectors [`FREE_MAP_SECTOR`] and
//! [`DIRECTORY_SECTOR`].
mod alloc;
mod chain;
mod dir;
mod file;
mod fs;
mod header;
pub mod io;

pub use crate::alloc::{Bitmap, State};
pub use crate::dir::{DirEntry, Directory};
pub use crate::file::OpenFile;
pub use crate::fs::{FileSystem, FsError, OpenFileId, Result};
pub use crate::header::FileHeader;
pub use crate::io::SectorNumber;

use std::mem::size_of;

/// Bytes per disk sector, the unit of both transfer and allocation.
pub const SECTOR_SIZE: usize = 128;

/// Longest file or directory name that fits a directory entry.
pub const FILE_NAME_MAX_LEN: usize = 12;

/// Capacity of every directory created by the file system.
pub const NUM_DIR_ENTRIES: usize = 64;

/// Data sectors addressed by one index block: a sector holds one link field
/// followed by this many sector numbers.
pub const LINKED_DIRECT: usize = (SECTOR_SIZE - size_of::<i32>()) / size_of::<i32>();

/// Sector holding the header of the free sector bitmap file.
pub const FREE_MAP_SECTOR: SectorNumber = 0;

/// Sector holding the header of the root directory file.
pub const DIRECTORY_SECTOR: SectorNumber = 1;

/// On-disk encoding of "no sector".
pub const NO_SECTOR: i32 = -1;

pub(crate) fn div_round_up(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// Converts a sector field read from disk into a sector number.
pub(crate) fn decode_sector(raw: i32) -> Option<SectorNumber> {
    if raw < 0 {
        None
    } else {
        Some(raw as SectorNumber)
    }
}

pub(crate) fn encode_sector(sector: Option<SectorNumber>) -> i32 {
    match sector {
        Some(s) => s as i32,
        None => NO_SECTOR,
    }
}
