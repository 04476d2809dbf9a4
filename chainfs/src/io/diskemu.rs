use crate::io::{BlockStorage, SectorNumber};
use crate::SECTOR_SIZE;

use log::trace;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates a sector addressed disk in userspace using a file as backing storage.
/// This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a sector.
    fd: File,
    /// The total number of sectors available in the file store.
    sector_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_request(&self, sector: SectorNumber, len: usize) -> std::io::Result<()> {
        if sector >= self.sector_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "sector out of range",
            ));
        }
        if len != SECTOR_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer must be exactly one sector long",
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P, nsectors: usize) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let emu = FileBlockEmulator {
            fd: file,
            sector_count: nsectors,
        };

        Ok(emu)
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_request(sector, buf.len())?;
        trace!("read sector {}", sector);
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        self.fd.read_exact(buf)
    }

    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_request(sector, buf.len())?;
        trace!("write sector {}", sector);
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    sector_count: usize,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // A better default here might be the size of the file rounded down
            // to the nearest sector.
            sector_count: 0,
            clear_medium: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired sectors in the emulated disk.
    pub fn with_sector_count(mut self, sectors: usize) -> Self {
        self.sector_count = sectors;
        self
    }

    /// Zero the backing file on build. Disable to reattach an image that already
    /// holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumed ownership of the file descriptor used and, unless told
    /// otherwise, does destructive things to prepare the file for use. Additionally,
    /// ownership of the file is transfered to the emulator meaning this builder can
    /// only be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.sector_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "disk must have at least one sector",
            ));
        }
        if self.clear_medium {
            self.zero_medium()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            sector_count: self.sector_count,
        })
    }

    fn zero_medium(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk", buffering each write to prevent excessive syscalls.
        let zeroes = [0x00; SECTOR_SIZE];
        for _ in 0..self.sector_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(sectors: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_sector_count(sectors)
            .build()
            .expect("failed to allocate disk")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * SECTOR_SIZE as u64
        );
    }

    #[test]
    fn can_read_and_write_sectors() {
        let mut disk_emu = emulator(4);

        // Fill a sector with a non-zero character.
        let sector = vec![0x55; SECTOR_SIZE];
        disk_emu.write_sector(2, &sector).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_sector = vec![0x00; SECTOR_SIZE];
        // Read a different sector.
        disk_emu.read_sector(3, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x00; SECTOR_SIZE]);

        // Read the sector with data.
        disk_emu.read_sector(2, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x55; SECTOR_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_sectors() {
        let mut disk_emu = emulator(2);

        disk_emu.write_sector(0, &[0x11; SECTOR_SIZE]).unwrap();
        disk_emu.write_sector(1, &[0x22; SECTOR_SIZE]).unwrap();

        let mut read_sector = [0x00; SECTOR_SIZE];
        disk_emu.read_sector(0, &mut read_sector).unwrap();
        assert_eq!(read_sector, [0x11; SECTOR_SIZE]);
        disk_emu.read_sector(1, &mut read_sector).unwrap();
        assert_eq!(read_sector, [0x22; SECTOR_SIZE]);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let mut disk_emu = emulator(1);

        let wresult = disk_emu.write_sector(1, &[0x55; SECTOR_SIZE]);
        assert_eq!(wresult.unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut buf = [0x00; SECTOR_SIZE];
        let rresult = disk_emu.read_sector(1, &mut buf);
        assert_eq!(rresult.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn partial_sector_buffers_are_rejected() {
        let mut disk_emu = emulator(1);

        let half = vec![0x55; SECTOR_SIZE / 2];
        let result = disk_emu.write_sector(0, &half);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn reattached_medium_keeps_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_sector_count(2)
            .build()
            .unwrap();
        first.write_sector(1, &[0x7f; SECTOR_SIZE]).unwrap();
        first.sync_disk().unwrap();

        let mut second = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_sector_count(2)
            // Don't reset the written image.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = [0x00; SECTOR_SIZE];
        second.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf, [0x7f; SECTOR_SIZE]);
    }

    #[test]
    fn zero_sector_disk_is_rejected() {
        let fs_block = tempfile::tempfile().unwrap();
        let result = FileBlockEmulatorBuilder::from(fs_block).build();
        assert!(result.is_err());
    }
}
