use crate::alloc::Bitmap;
use crate::chain::IndexChain;
use crate::fs::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};
use crate::{decode_sector, div_round_up, encode_sector, SECTOR_SIZE};

use log::debug;
use std::fmt;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The on-disk part of a header. The rest of the header's sector is unused.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy)]
struct HeaderRecord {
    num_bytes: i32,
    num_sectors: i32,
    chain_head: i32,
}

/// Describes where on disk a file's data lives (the file system's inode). A
/// header occupies one sector of its own and owns one chain of index blocks.
///
/// There is no constructor that touches the disk: a header is either filled by
/// [`FileHeader::allocate`] for a new file or read with
/// [`FileHeader::fetch_from`] for an existing one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileHeader {
    /// The total size of the file in bytes.
    num_bytes: usize,
    /// Number of data sectors, always `num_bytes` rounded up to whole sectors.
    num_sectors: usize,
    chain: IndexChain,
}

impl FileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves space for `file_size` bytes of data out of `free_map`.
    ///
    /// # Errors
    ///
    /// [`FsError::NoSpace`] when the disk cannot hold the data and its index
    /// blocks. The header is left empty in that case.
    pub fn allocate(&mut self, free_map: &mut Bitmap, file_size: usize) -> Result<()> {
        let num_sectors = div_round_up(file_size, SECTOR_SIZE);
        self.chain.allocate(free_map, num_sectors)?;
        self.num_bytes = file_size;
        self.num_sectors = num_sectors;
        Ok(())
    }

    /// Releases the file's data sectors and index blocks. The sector of the
    /// header itself belongs to the caller.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        self.chain.deallocate(free_map);
    }

    /// Reads a header and its whole index block chain from disk.
    pub fn fetch_from<T: BlockStorage>(dev: &mut T, sector: SectorNumber) -> Result<Self> {
        let mut buf = [0; SECTOR_SIZE];
        dev.read_sector(sector, &mut buf)?;
        let record = HeaderRecord::read_from_prefix(&buf[..]).ok_or_else(|| {
            FsError::InvalidLayout(format!("unreadable file header at sector {}", sector))
        })?;

        if record.num_bytes < 0
            || record.num_sectors as usize != div_round_up(record.num_bytes as usize, SECTOR_SIZE)
        {
            return Err(FsError::InvalidLayout(format!(
                "file header at sector {} claims {} bytes in {} sectors",
                sector, record.num_bytes, record.num_sectors
            )));
        }
        let num_sectors = record.num_sectors as usize;
        let chain = IndexChain::fetch_from(
            dev,
            decode_sector(record.chain_head),
            IndexChain::blocks_for(num_sectors),
        )?;

        Ok(Self {
            num_bytes: record.num_bytes as usize,
            num_sectors,
            chain,
        })
    }

    /// Writes the header to `sector`, then each index block to its own sector.
    pub fn write_back<T: BlockStorage>(&self, dev: &mut T, sector: SectorNumber) -> Result<()> {
        let record = HeaderRecord {
            num_bytes: self.num_bytes as i32,
            num_sectors: self.num_sectors as i32,
            chain_head: encode_sector(self.chain.head()),
        };
        let mut buf = [0; SECTOR_SIZE];
        buf[..std::mem::size_of::<HeaderRecord>()].copy_from_slice(record.as_bytes());
        dev.write_sector(sector, &buf)?;
        debug!(
            "Wrote header to sector {} with {} index blocks.",
            sector,
            self.chain.len()
        );
        self.chain.write_back(dev)
    }

    /// Translates a byte offset within the file into the disk sector storing
    /// that byte.
    pub fn byte_to_sector(&self, offset: usize) -> SectorNumber {
        self.chain.sector_for(offset / SECTOR_SIZE)
    }

    /// The length of the file in bytes.
    pub fn file_length(&self) -> usize {
        self.num_bytes
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    /// Data sectors in file order.
    pub fn data_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.chain.data_sectors()
    }

    /// Sectors used by the index block chain.
    pub fn index_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.chain.index_sectors()
    }

    /// Reads the file's data and renders it one line per sector. Printable
    /// ASCII appears as is, any other byte as `\` followed by its hex value.
    pub fn contents<T: BlockStorage>(&self, dev: &mut T) -> Result<String> {
        let mut out = String::new();
        let mut remaining = self.num_bytes;
        let mut buf = [0; SECTOR_SIZE];
        for sector in self.data_sectors() {
            dev.read_sector(sector, &mut buf)?;
            let len = usize::min(remaining, SECTOR_SIZE);
            for &byte in &buf[..len] {
                if (b' '..=b'~').contains(&byte) {
                    out.push(byte as char);
                } else {
                    out.push_str(&format!("\\{:x}", byte));
                }
            }
            out.push('\n');
            remaining -= len;
        }
        Ok(out)
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FileHeader contents.  File size: {}.  Index blocks: {:?}.  File blocks:",
            self.num_bytes,
            self.index_sectors().collect::<Vec<_>>()
        )?;
        let sectors: Vec<String> = self.data_sectors().map(|s| s.to_string()).collect();
        write!(f, "{}", sectors.join(" "))
    }
}
