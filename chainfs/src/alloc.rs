use crate::file::OpenFile;
use crate::fs::Result;
use crate::io::{BlockStorage, SectorNumber};
use crate::div_round_up;

use std::fmt;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// One bit per disk sector, set when the sector is owned by a header, an index
/// block or file data.
///
/// The map is persisted as an ordinary file. Structural operations fetch a
/// private copy, mutate it, and only write it back once the whole operation has
/// succeeded, so dropping the copy is how a failed operation rolls back.
#[derive(Clone, Debug, PartialEq)]
pub struct Bitmap {
    bitmap: Vec<u64>,
    /// The number of meaningful bits, i.e. the number of sectors on disk.
    num_bits: usize,
}

impl Bitmap {
    /// Creates a map of `num_bits` free sectors.
    pub fn new(num_bits: usize) -> Self {
        Self {
            bitmap: vec![0; div_round_up(num_bits, 64)],
            num_bits,
        }
    }

    /// The size in bytes of the persisted form of a map tracking `num_bits` sectors.
    pub fn byte_len(num_bits: usize) -> usize {
        div_round_up(num_bits, 8)
    }

    pub fn len(&self) -> usize {
        self.num_bits
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Reads the map from its persisted form. Bit `i` lives in byte `i / 8` at
    /// position `i % 8`. Bits past `num_bits` are ignored.
    pub fn parse(num_bits: usize, buf: &[u8]) -> Self {
        assert!(
            buf.len() >= Self::byte_len(num_bits),
            "Buffer too short for a bitmap of {} bits.",
            num_bits
        );
        let mut map = Self::new(num_bits);
        for (i, word) in map.bitmap.iter_mut().enumerate() {
            let mut bytes = [0; 8];
            let start = i * 8;
            let end = usize::min(start + 8, Self::byte_len(num_bits));
            bytes[..end - start].copy_from_slice(&buf[start..end]);
            *word = u64::from_le_bytes(bytes);
        }
        if let Some(last) = map.bitmap.last_mut() {
            let tail = num_bits % 64;
            if tail != 0 {
                *last &= (1_u64 << tail) - 1;
            }
        }
        map
    }

    /// Serializes the map into exactly `byte_len` bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut encoded: Vec<u8> = self
            .bitmap
            .iter()
            .flat_map(|word| word.to_le_bytes())
            .collect();
        encoded.truncate(Self::byte_len(self.num_bits));
        encoded
    }

    pub fn get(&self, sector: SectorNumber) -> State {
        assert!(sector < self.num_bits, "Sector {} is outside the bitmap.", sector);
        // Grab the u64 containing the significant bit.
        let outer_offset = self.bitmap[sector / 64];

        let inner_offset = sector % 64;
        match (outer_offset >> inner_offset) & 0b01 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    /// Marks a sector as allocated whatever its current state.
    pub fn set_reserved(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "Sector {} is outside the bitmap.", sector);
        self.bitmap[sector / 64] |= 0b01_u64 << (sector % 64);
    }

    /// Releases an allocated sector. Releasing a free sector would corrupt the
    /// free count, so it panics.
    pub fn set_free(&mut self, sector: SectorNumber) {
        assert_eq!(
            self.get(sector),
            State::Used,
            "Sector {} is already free.",
            sector
        );
        self.bitmap[sector / 64] &= !(0b01_u64 << (sector % 64));
    }

    /// Claims the lowest numbered free sector. Returns `None` once the disk is full.
    pub fn find_and_set(&mut self) -> Option<SectorNumber> {
        let (group, bits) = self
            .bitmap
            .iter()
            .enumerate()
            .find(|&(_, &bits)| bits != u64::MAX)?;
        let sector = group * 64 + bits.trailing_ones() as usize;
        if sector >= self.num_bits {
            return None;
        }
        self.set_reserved(sector);
        Some(sector)
    }

    /// The number of free sectors.
    pub fn num_clear(&self) -> usize {
        let used: u32 = self.bitmap.iter().map(|bits| bits.count_ones()).sum();
        self.num_bits - used as usize
    }

    /// Iterates the allocated sectors in ascending order.
    pub fn used(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        (0..self.num_bits).filter(move |&sector| self.get(sector) == State::Used)
    }

    /// Loads the map from the file backing it.
    pub fn fetch_from<T: BlockStorage>(
        dev: &mut T,
        file: &OpenFile,
        num_bits: usize,
    ) -> Result<Self> {
        let mut buf = vec![0; Self::byte_len(num_bits)];
        file.read_at(dev, &mut buf, 0)?;
        Ok(Self::parse(num_bits, &buf))
    }

    /// Stores the map into the file backing it.
    pub fn write_back<T: BlockStorage>(&self, dev: &mut T, file: &OpenFile) -> Result<()> {
        file.write_at(dev, &self.serialize(), 0)?;
        Ok(())
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used: Vec<String> = self.used().map(|sector| sector.to_string()).collect();
        write!(f, "Bitmap set:\n{}", used.join(", "))
    }
}
