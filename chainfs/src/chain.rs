//! Chained index blocks.
//!
//! A file's data sectors are listed in a singly linked chain of index blocks.
//! Each block fills exactly one sector: a link to the next block's sector
//! followed by [`LINKED_DIRECT`] data sector numbers. Unused slots, and the link
//! of the last block, hold [`NO_SECTOR`].
//!
//! ```text
//! header.chain_head -> [link | d0 d1 .. d30] -> [link | d31 .. d61] -> ... -> NO_SECTOR
//! ```
//!
//! In memory the chain is a vector of blocks paired with the sector each block
//! is stored in, so within-file sector `i` lives in block `i / LINKED_DIRECT` at
//! slot `i % LINKED_DIRECT`.

use crate::alloc::Bitmap;
use crate::fs::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};
use crate::{decode_sector, div_round_up, encode_sector, LINKED_DIRECT, NO_SECTOR, SECTOR_SIZE};

use log::debug;
use std::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
struct IndexBlock {
    /// Sector of the next block in the chain.
    link: i32,
    /// Data sectors addressed by this block.
    slots: [i32; LINKED_DIRECT],
}

// An index block is written as one whole sector.
const _: () = assert!(size_of::<IndexBlock>() == SECTOR_SIZE);

impl IndexBlock {
    fn empty() -> Self {
        Self {
            link: NO_SECTOR,
            slots: [NO_SECTOR; LINKED_DIRECT],
        }
    }

    fn data_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.slots.iter().map_while(|&raw| decode_sector(raw))
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Link {
    /// The sector this block is stored in.
    sector: SectorNumber,
    block: IndexBlock,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexChain {
    links: Vec<Link>,
}

impl IndexChain {
    /// Number of index blocks needed to address `num_sectors` data sectors.
    pub fn blocks_for(num_sectors: usize) -> usize {
        div_round_up(num_sectors, LINKED_DIRECT)
    }

    /// The sector of the first index block, `None` for an empty file.
    pub fn head(&self) -> Option<SectorNumber> {
        self.links.first().map(|link| link.sector)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Claims index and data sectors from `free_map` until `num_sectors` data
    /// sectors are addressed.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::NoSpace`] without touching `free_map` when fewer
    /// sectors are free than the data and its index blocks need.
    pub fn allocate(&mut self, free_map: &mut Bitmap, num_sectors: usize) -> Result<()> {
        assert!(self.links.is_empty(), "Index block chain is already allocated.");

        let needed = num_sectors + Self::blocks_for(num_sectors);
        if free_map.num_clear() < needed {
            return Err(FsError::NoSpace);
        }

        let mut assigned = 0;
        while assigned < num_sectors {
            let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
            if let Some(last) = self.links.last_mut() {
                last.block.link = encode_sector(Some(sector));
            }
            debug!(
                "Assigned sector {} to index block #{}.",
                sector,
                self.links.len() + 1
            );

            let mut block = IndexBlock::empty();
            for slot in block.slots.iter_mut().take(num_sectors - assigned) {
                *slot = encode_sector(Some(free_map.find_and_set().ok_or(FsError::NoSpace)?));
                assigned += 1;
            }
            self.links.push(Link { sector, block });
        }
        Ok(())
    }

    /// Returns every data sector and every index block sector to `free_map`.
    /// An empty chain releases nothing.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        for link in &self.links {
            for sector in link.block.data_sectors() {
                free_map.set_free(sector);
            }
            free_map.set_free(link.sector);
        }
    }

    /// Maps a within-file sector index to the disk sector holding it.
    ///
    /// Panics when the chain does not reach that far, which means the header
    /// and its chain disagree.
    pub fn sector_for(&self, index: usize) -> SectorNumber {
        let block_index = index / LINKED_DIRECT;
        let slot = index % LINKED_DIRECT;
        let link = self.links.get(block_index).unwrap_or_else(|| {
            panic!(
                "Index block chain has {} blocks but sector {} lives in block {}.",
                self.links.len(),
                index,
                block_index
            )
        });
        decode_sector(link.block.slots[slot]).unwrap_or_else(|| {
            panic!(
                "Index block at sector {} has no data sector in slot {}.",
                link.sector, slot
            )
        })
    }

    /// Every data sector of the chain, in file order.
    pub fn data_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.links.iter().flat_map(|link| link.block.data_sectors())
    }

    /// The sectors holding the index blocks themselves, in chain order.
    pub fn index_sectors(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        self.links.iter().map(|link| link.sector)
    }

    /// Loads the chain starting at `head`, one read per block. `max_blocks`
    /// bounds the walk so a corrupt link cannot loop forever.
    pub fn fetch_from<T: BlockStorage>(
        dev: &mut T,
        head: Option<SectorNumber>,
        max_blocks: usize,
    ) -> Result<Self> {
        let mut links = Vec::new();
        let mut buf = [0; SECTOR_SIZE];
        let mut next = head;
        while let Some(sector) = next {
            if links.len() == max_blocks {
                return Err(FsError::InvalidLayout(format!(
                    "index block chain continues past {} blocks at sector {}",
                    max_blocks, sector
                )));
            }
            dev.read_sector(sector, &mut buf)?;
            let block = IndexBlock::read_from(&buf[..]).ok_or_else(|| {
                FsError::InvalidLayout(format!("unreadable index block at sector {}", sector))
            })?;
            next = decode_sector(block.link);
            links.push(Link { sector, block });
        }
        Ok(Self { links })
    }

    /// Writes every block to its own sector.
    pub fn write_back<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        for link in &self.links {
            dev.write_sector(link.sector, link.block.as_bytes())?;
        }
        Ok(())
    }
}
