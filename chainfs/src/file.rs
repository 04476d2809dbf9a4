use crate::fs::Result;
use crate::header::FileHeader;
use crate::io::{BlockStorage, SectorNumber};
use crate::SECTOR_SIZE;

/// A handle to a file addressed by the sector of its header. Reads and writes
/// are byte granular and never change the file's length, which is fixed when the
/// file is created; transfers are clipped at the end of the file.
#[derive(Clone, Debug)]
pub struct OpenFile {
    sector: SectorNumber,
    hdr: FileHeader,
    seek_position: usize,
}

impl OpenFile {
    /// Opens the file whose header is stored at `sector`.
    pub fn open<T: BlockStorage>(dev: &mut T, sector: SectorNumber) -> Result<Self> {
        Ok(Self {
            sector,
            hdr: FileHeader::fetch_from(dev, sector)?,
            seek_position: 0,
        })
    }

    /// The sector holding this file's header.
    pub fn sector(&self) -> SectorNumber {
        self.sector
    }

    pub fn header(&self) -> &FileHeader {
        &self.hdr
    }

    pub fn length(&self) -> usize {
        self.hdr.file_length()
    }

    pub fn seek(&mut self, position: usize) {
        self.seek_position = position;
    }

    pub fn position(&self) -> usize {
        self.seek_position
    }

    /// Reads from the current position and advances it by the bytes read.
    pub fn read<T: BlockStorage>(&mut self, dev: &mut T, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(dev, buf, self.seek_position)?;
        self.seek_position += n;
        Ok(n)
    }

    /// Writes at the current position and advances it by the bytes written.
    pub fn write<T: BlockStorage>(&mut self, dev: &mut T, buf: &[u8]) -> Result<usize> {
        let n = self.write_at(dev, buf, self.seek_position)?;
        self.seek_position += n;
        Ok(n)
    }

    /// Reads up to `buf.len()` bytes starting at `position`. Returns the number
    /// of bytes read, 0 at or past the end of the file.
    pub fn read_at<T: BlockStorage>(
        &self,
        dev: &mut T,
        buf: &mut [u8],
        position: usize,
    ) -> Result<usize> {
        let len = self.clip(buf.len(), position);
        if len == 0 {
            return Ok(0);
        }

        let first_sector = position / SECTOR_SIZE;
        let last_sector = (position + len - 1) / SECTOR_SIZE;
        let mut sector_buf = [0; SECTOR_SIZE];
        for i in first_sector..=last_sector {
            dev.read_sector(self.hdr.byte_to_sector(i * SECTOR_SIZE), &mut sector_buf)?;
            let (src, dst) = Self::overlap(i, position, len);
            buf[dst].copy_from_slice(&sector_buf[src]);
        }
        Ok(len)
    }

    /// Writes up to `buf.len()` bytes starting at `position`. Sectors only
    /// partially covered by the write are read first so their other bytes are
    /// preserved. Returns the number of bytes written.
    pub fn write_at<T: BlockStorage>(
        &self,
        dev: &mut T,
        buf: &[u8],
        position: usize,
    ) -> Result<usize> {
        let len = self.clip(buf.len(), position);
        if len == 0 {
            return Ok(0);
        }

        let first_sector = position / SECTOR_SIZE;
        let last_sector = (position + len - 1) / SECTOR_SIZE;
        let mut sector_buf = [0; SECTOR_SIZE];
        for i in first_sector..=last_sector {
            let sector = self.hdr.byte_to_sector(i * SECTOR_SIZE);
            let (dst, src) = Self::overlap(i, position, len);
            if dst.len() < SECTOR_SIZE {
                dev.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[dst].copy_from_slice(&buf[src]);
            dev.write_sector(sector, &sector_buf)?;
        }
        Ok(len)
    }

    fn clip(&self, requested: usize, position: usize) -> usize {
        let length = self.length();
        if position >= length {
            return 0;
        }
        usize::min(requested, length - position)
    }

    /// For within-file sector `i` and a transfer of `len` bytes at `position`,
    /// returns the byte range inside the sector and the matching range inside
    /// the caller's buffer.
    fn overlap(
        i: usize,
        position: usize,
        len: usize,
    ) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let sector_start = i * SECTOR_SIZE;
        let start = usize::max(sector_start, position);
        let end = usize::min(sector_start + SECTOR_SIZE, position + len);
        (
            start - sector_start..end - sector_start,
            start - position..end - position,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Bitmap;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_device(sectors: usize) -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_sector_count(sectors)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    /// Lays a file of `size` bytes out on a fresh disk with its header at sector 0.
    fn create_file(dev: &mut FileBlockEmulator, size: usize) -> OpenFile {
        let mut free_map = Bitmap::new(dev.sector_count());
        free_map.set_reserved(0);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, size).unwrap();
        hdr.write_back(dev, 0).unwrap();
        OpenFile::open(dev, 0).unwrap()
    }

    #[test]
    fn unaligned_write_then_read() {
        let mut dev = create_test_device(64);
        let file = create_file(&mut dev, 5 * SECTOR_SIZE);

        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        assert_eq!(file.write_at(&mut dev, &data, 100).unwrap(), 300);

        let mut read = vec![0; 300];
        assert_eq!(file.read_at(&mut dev, &mut read, 100).unwrap(), 300);
        assert_eq!(read, data);

        // Bytes around the write are still zero.
        let mut edge = [0xff; 4];
        file.read_at(&mut dev, &mut edge, 98).unwrap();
        assert_eq!(edge, [0, 0, 0, 1]);
    }

    #[test]
    fn partial_write_preserves_rest_of_sector() {
        let mut dev = create_test_device(16);
        let file = create_file(&mut dev, SECTOR_SIZE);

        file.write_at(&mut dev, &[0xaa; SECTOR_SIZE], 0).unwrap();
        file.write_at(&mut dev, &[0x11; 8], 60).unwrap();

        let mut read = [0; SECTOR_SIZE];
        file.read_at(&mut dev, &mut read, 0).unwrap();
        assert_eq!(read[59], 0xaa);
        assert_eq!(&read[60..68], &[0x11; 8]);
        assert_eq!(read[68], 0xaa);
    }

    #[test]
    fn transfers_are_clipped_at_end_of_file() {
        let mut dev = create_test_device(16);
        let file = create_file(&mut dev, 10);

        assert_eq!(file.write_at(&mut dev, &[7; 20], 4).unwrap(), 6);
        assert_eq!(file.write_at(&mut dev, &[7; 20], 10).unwrap(), 0);

        let mut read = [0; 32];
        assert_eq!(file.read_at(&mut dev, &mut read, 0).unwrap(), 10);
        assert_eq!(&read[..10], &[0, 0, 0, 0, 7, 7, 7, 7, 7, 7]);
        assert_eq!(file.read_at(&mut dev, &mut read, 50).unwrap(), 0);
    }

    #[test]
    fn sequential_io_advances_cursor() {
        let mut dev = create_test_device(64);
        let mut file = create_file(&mut dev, 40 * SECTOR_SIZE);

        for chunk in 0..40u8 {
            assert_eq!(file.write(&mut dev, &[chunk; SECTOR_SIZE]).unwrap(), SECTOR_SIZE);
        }
        assert_eq!(file.position(), 40 * SECTOR_SIZE);
        assert_eq!(file.write(&mut dev, b"past the end").unwrap(), 0);

        file.seek(31 * SECTOR_SIZE - 2);
        let mut read = [0; 4];
        assert_eq!(file.read(&mut dev, &mut read).unwrap(), 4);
        assert_eq!(read, [30, 30, 31, 31]);
        assert_eq!(file.position(), 31 * SECTOR_SIZE + 2);
    }

    #[test]
    fn empty_file_reads_nothing() {
        let mut dev = create_test_device(4);
        let mut file = create_file(&mut dev, 0);

        let mut buf = [0; 8];
        assert_eq!(file.read(&mut dev, &mut buf).unwrap(), 0);
        assert_eq!(file.length(), 0);
    }
}
