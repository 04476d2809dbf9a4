use crate::alloc::{Bitmap, State};
use crate::dir::{Directory, ENTRY_SIZE};
use crate::file::OpenFile;
use crate::header::FileHeader;
use crate::io::{BlockStorage, SectorNumber};
use crate::{DIRECTORY_SECTOR, FREE_MAP_SECTOR, NUM_DIR_ENTRIES};

use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;

/// Identifies a file opened through [`FileSystem::open`].
pub type OpenFileId = u32;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("file name longer than {} bytes", crate::FILE_NAME_MAX_LEN)]
    NameTooLong,
    #[error("found no file at path")]
    NotFound,
    #[error("file already exists")]
    AlreadyExists,
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("directory is not empty")]
    DirectoryNotEmpty,
    #[error("directory has no free entry")]
    DirectoryFull,
    #[error("no free sector for a file header")]
    NoHeaderSector,
    #[error("not enough free sectors")]
    NoSpace,
    #[error("file is open")]
    FileInUse,
    #[error("bad file descriptor {0}")]
    BadDescriptor(OpenFileId),
    #[error("no file descriptor left")]
    NoDescriptor,
    #[error("file is a directory")]
    IsADirectory,
    #[error("invalid file system layout: {0}")]
    InvalidLayout(String),
    #[error("disk failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Splits an absolute path at its last separator into the directory prefix and
/// the leaf name. The prefix of a root level name is empty.
///
/// Panics on a relative path.
fn split_path(path: &str) -> (&str, &str) {
    assert_absolute(path);
    let split = path.rfind('/').unwrap_or(0);
    (&path[..split], &path[split + 1..])
}

fn assert_absolute(path: &str) {
    assert!(path.starts_with('/'), "Path {:?} must start with \"/\".", path);
}

/// The names along a directory path. Repeated separators are ignored.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|name| !name.is_empty())
}

/// A hierarchical file system on a sector addressed disk.
///
/// # Layout
/// ===========================================================================
/// | Free map header | Root dir header | Free map data | Root dir data | ... |
/// ===========================================================================
///
/// The free map and root directory files stay open for as long as the file
/// system is mounted. Structural operations (create, remove, directory creation)
/// change private copies of the free map and the affected directory and only
/// write them back once every step has succeeded.
///
/// Access must be serialized by the caller; nothing here locks.
pub struct FileSystem<T: BlockStorage> {
    dev: T,
    num_sectors: usize,
    free_map_file: OpenFile,
    directory_file: OpenFile,
    open_files: HashMap<OpenFileId, Descriptor>,
    next_fd: OpenFileId,
}

/// An entry of the descriptor table.
struct Descriptor {
    file: OpenFile,
    /// Directory files are read only through descriptors.
    is_directory: bool,
}

impl<T: BlockStorage> FileSystem<T> {
    /// Lays out an empty file system on `dev`: an empty root directory and a
    /// free map with only the system files' sectors in use.
    ///
    /// Panics when the disk is too small to hold the free map and root directory.
    pub fn format(mut dev: T) -> Result<Self> {
        let num_sectors = dev.sector_count();
        info!("Formatting a disk of {} sectors.", num_sectors);
        assert!(
            num_sectors > DIRECTORY_SECTOR,
            "Disk of {} sectors cannot hold the system file headers.",
            num_sectors
        );

        let mut free_map = Bitmap::new(num_sectors);
        let directory = Directory::new(NUM_DIR_ENTRIES);
        let mut map_hdr = FileHeader::new();
        let mut dir_hdr = FileHeader::new();

        // The headers go first so no one else grabs their sectors.
        free_map.set_reserved(FREE_MAP_SECTOR);
        free_map.set_reserved(DIRECTORY_SECTOR);

        assert!(
            map_hdr
                .allocate(&mut free_map, Bitmap::byte_len(num_sectors))
                .is_ok(),
            "Disk of {} sectors cannot hold the free map.",
            num_sectors
        );
        assert!(
            dir_hdr
                .allocate(&mut free_map, Directory::file_size(NUM_DIR_ENTRIES))
                .is_ok(),
            "Disk of {} sectors cannot hold the root directory.",
            num_sectors
        );

        // Headers must be on disk before the files can be opened.
        debug!("Writing system file headers.");
        map_hdr.write_back(&mut dev, FREE_MAP_SECTOR)?;
        dir_hdr.write_back(&mut dev, DIRECTORY_SECTOR)?;

        let free_map_file = OpenFile::open(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::open(&mut dev, DIRECTORY_SECTOR)?;

        debug!("Writing initial free map and root directory.");
        free_map.write_back(&mut dev, &free_map_file)?;
        directory.write_back(&mut dev, &directory_file)?;
        dev.sync_disk()?;

        Ok(Self::from_parts(dev, num_sectors, free_map_file, directory_file))
    }

    /// Opens the file system already laid out on `dev`.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidLayout`] when the disk does not hold a file system of
    /// the device's size.
    pub fn mount(mut dev: T) -> Result<Self> {
        let num_sectors = dev.sector_count();
        if num_sectors <= DIRECTORY_SECTOR {
            return Err(FsError::InvalidLayout(format!(
                "disk of {} sectors is too small",
                num_sectors
            )));
        }

        let free_map_file = OpenFile::open(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::open(&mut dev, DIRECTORY_SECTOR)?;
        if free_map_file.length() != Bitmap::byte_len(num_sectors) {
            return Err(FsError::InvalidLayout(format!(
                "free map of {} bytes does not match a disk of {} sectors",
                free_map_file.length(),
                num_sectors
            )));
        }
        if directory_file.length() == 0 || directory_file.length() % ENTRY_SIZE != 0 {
            return Err(FsError::InvalidLayout(format!(
                "root directory file has a length of {} bytes",
                directory_file.length()
            )));
        }

        let free_map = Bitmap::fetch_from(&mut dev, &free_map_file, num_sectors)?;
        if [FREE_MAP_SECTOR, DIRECTORY_SECTOR]
            .iter()
            .any(|&sector| free_map.get(sector) == State::Free)
        {
            return Err(FsError::InvalidLayout(
                "system file headers are not marked in use".to_string(),
            ));
        }

        info!(
            "Mounted a disk of {} sectors, {} free.",
            num_sectors,
            free_map.num_clear()
        );
        Ok(Self::from_parts(dev, num_sectors, free_map_file, directory_file))
    }

    fn from_parts(
        dev: T,
        num_sectors: usize,
        free_map_file: OpenFile,
        directory_file: OpenFile,
    ) -> Self {
        Self {
            dev,
            num_sectors,
            free_map_file,
            directory_file,
            open_files: HashMap::new(),
            next_fd: 1,
        }
    }

    /// Flushes the disk and hands it back. Open descriptors are dropped.
    pub fn unmount(mut self) -> Result<T> {
        self.dev.sync_disk()?;
        Ok(self.dev)
    }

    /// Creates a file of a fixed size. Missing directories along the path are
    /// created on the way.
    ///
    /// Fails if the name is already in use, if there is no free sector for the
    /// header, if the directory is full, or if the disk cannot hold the data.
    /// A failed create leaves the free map and the file's directory untouched,
    /// though directories created while resolving the path stay.
    pub fn create(&mut self, path: &str, initial_size: usize) -> Result<()> {
        let (prefix, name) = split_path(path);
        let dir_sector = self.traverse_directory(prefix)?;
        debug!(
            "Split path {} into directory sector {} and file name {}.",
            path, dir_sector, name
        );

        let (dir_file, mut directory) = self.open_directory(dir_sector)?;
        match self.create_in(&dir_file, &mut directory, name, initial_size) {
            Ok(sector) => {
                info!("Created {} with header in sector {}.", path, sector);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to create {}: {}.", path, e);
                Err(e)
            }
        }
    }

    fn create_in(
        &mut self,
        dir_file: &OpenFile,
        directory: &mut Directory,
        name: &str,
        initial_size: usize,
    ) -> Result<SectorNumber> {
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let mut free_map = self.fetch_free_map()?;
        let sector = free_map.find_and_set().ok_or(FsError::NoHeaderSector)?;
        directory.add(name, sector, false)?;
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, initial_size)?;

        // Everything worked, flush all changes back to disk.
        hdr.write_back(&mut self.dev, sector)?;
        directory.write_back(&mut self.dev, dir_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        Ok(sector)
    }

    /// Creates the directory at `path`, along with any missing parents.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let (prefix, name) = split_path(path);
        let parent = self.traverse_directory(prefix)?;
        let (parent_file, mut directory) = self.open_directory(parent)?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        self.create_directory(&parent_file, &mut directory, name)?;
        Ok(())
    }

    /// Walks `path` from the root directory and returns the header sector of
    /// the directory it names, creating every directory that does not exist.
    /// The empty path names the root directory.
    fn traverse_directory(&mut self, path: &str) -> Result<SectorNumber> {
        let mut current = DIRECTORY_SECTOR;
        for name in components(path) {
            let (dir_file, mut directory) = self.open_directory(current)?;
            current = match directory.lookup(name) {
                Some(entry) if entry.is_directory => entry.sector,
                Some(_) => return Err(FsError::NotADirectory),
                None => self.create_directory(&dir_file, &mut directory, name)?,
            };
        }
        Ok(current)
    }

    /// Like [`FileSystem::traverse_directory`] but never creates anything.
    fn lookup_directory(&mut self, path: &str) -> Result<SectorNumber> {
        let mut current = DIRECTORY_SECTOR;
        for name in components(path) {
            let (_, directory) = self.open_directory(current)?;
            current = match directory.lookup(name) {
                Some(entry) if entry.is_directory => entry.sector,
                Some(_) => return Err(FsError::NotADirectory),
                None => return Err(FsError::NotFound),
            };
        }
        Ok(current)
    }

    /// Adds an empty subdirectory `name` to `parent` and persists the new
    /// directory file, the parent and the free map.
    fn create_directory(
        &mut self,
        parent_file: &OpenFile,
        parent: &mut Directory,
        name: &str,
    ) -> Result<SectorNumber> {
        let mut free_map = self.fetch_free_map()?;
        let sector = free_map.find_and_set().ok_or(FsError::NoHeaderSector)?;
        parent.add(name, sector, true)?;
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, Directory::file_size(NUM_DIR_ENTRIES))?;

        hdr.write_back(&mut self.dev, sector)?;
        let dir_file = OpenFile::open(&mut self.dev, sector)?;
        Directory::new(NUM_DIR_ENTRIES).write_back(&mut self.dev, &dir_file)?;
        parent.write_back(&mut self.dev, parent_file)?;
        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        debug!("Created directory {} with header in sector {}.", name, sector);
        Ok(sector)
    }

    /// Opens the file at `path` and registers it under a new descriptor.
    ///
    /// Missing directories along the path are created, as for
    /// [`FileSystem::create`]; a missing leaf is [`FsError::NotFound`].
    /// Directories may be opened for reading only.
    pub fn open(&mut self, path: &str) -> Result<OpenFileId> {
        let fd = self.next_fd;
        let next_fd = fd.checked_add(1).ok_or(FsError::NoDescriptor)?;
        let descriptor = self.open_file(path)?;
        self.next_fd = next_fd;
        debug!(
            "Opened {} (header sector {}) as {}.",
            path,
            descriptor.file.sector(),
            fd
        );
        self.open_files.insert(fd, descriptor);
        Ok(fd)
    }

    fn open_file(&mut self, path: &str) -> Result<Descriptor> {
        let (prefix, name) = split_path(path);
        if prefix.is_empty() && name.is_empty() {
            return Ok(Descriptor {
                file: self.directory_file.clone(),
                is_directory: true,
            });
        }
        let dir_sector = self.traverse_directory(prefix)?;
        let (_, directory) = self.open_directory(dir_sector)?;
        let entry = directory.lookup(name).ok_or(FsError::NotFound)?;
        Ok(Descriptor {
            file: OpenFile::open(&mut self.dev, entry.sector)?,
            is_directory: entry.is_directory,
        })
    }

    fn descriptor(&mut self, fd: OpenFileId) -> Result<&mut Descriptor> {
        self.open_files.get_mut(&fd).ok_or(FsError::BadDescriptor(fd))
    }

    /// Reads from the descriptor's position. Returns the bytes read, 0 at end
    /// of file.
    pub fn read(&mut self, fd: OpenFileId, buf: &mut [u8]) -> Result<usize> {
        let descriptor = self.open_files.get_mut(&fd).ok_or(FsError::BadDescriptor(fd))?;
        descriptor.file.read(&mut self.dev, buf)
    }

    /// Writes at the descriptor's position. Files never grow, so the write is
    /// cut short at end of file. Returns the bytes written.
    pub fn write(&mut self, fd: OpenFileId, buf: &[u8]) -> Result<usize> {
        let descriptor = self.open_files.get_mut(&fd).ok_or(FsError::BadDescriptor(fd))?;
        if descriptor.is_directory {
            return Err(FsError::IsADirectory);
        }
        descriptor.file.write(&mut self.dev, buf)
    }

    pub fn seek(&mut self, fd: OpenFileId, position: usize) -> Result<()> {
        self.descriptor(fd)?.file.seek(position);
        Ok(())
    }

    /// The length in bytes of an open file.
    pub fn file_length(&mut self, fd: OpenFileId) -> Result<usize> {
        Ok(self.descriptor(fd)?.file.length())
    }

    pub fn close(&mut self, fd: OpenFileId) -> Result<()> {
        self.open_files
            .remove(&fd)
            .map(|_| ())
            .ok_or(FsError::BadDescriptor(fd))
    }

    /// Deletes a file or an empty directory, returning its header, index blocks
    /// and data sectors to the free map.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let (prefix, name) = split_path(path);
        if name.is_empty() {
            return Err(FsError::InvalidArgument(format!("cannot remove {:?}", path)));
        }
        let dir_sector = self.lookup_directory(prefix)?;
        let (dir_file, mut directory) = self.open_directory(dir_sector)?;
        let entry = directory.lookup(name).ok_or(FsError::NotFound)?;
        if self.open_files.values().any(|descriptor| descriptor.file.sector() == entry.sector) {
            return Err(FsError::FileInUse);
        }

        let file = OpenFile::open(&mut self.dev, entry.sector)?;
        if entry.is_directory && !Directory::fetch_from(&mut self.dev, &file)?.is_empty() {
            return Err(FsError::DirectoryNotEmpty);
        }

        let mut free_map = self.fetch_free_map()?;
        file.header().deallocate(&mut free_map);
        free_map.set_free(entry.sector);
        directory.remove(name)?;

        free_map.write_back(&mut self.dev, &self.free_map_file)?;
        directory.write_back(&mut self.dev, &dir_file)?;
        info!("Removed {} (header sector {}).", path, entry.sector);
        Ok(())
    }

    /// Names in the directory at `path`.
    pub fn list(&mut self, path: &str) -> Result<Vec<String>> {
        assert_absolute(path);
        let sector = self.lookup_directory(path)?;
        let (_, directory) = self.open_directory(sector)?;
        Ok(directory.list())
    }

    /// An indented tree of everything below the directory at `path`, one entry
    /// per line marked `[D]` for directories and `[F]` for files.
    pub fn list_recursively(&mut self, path: &str) -> Result<String> {
        assert_absolute(path);
        let sector = self.lookup_directory(path)?;
        let (_, directory) = self.open_directory(sector)?;
        let mut out = String::new();
        directory.list_recursively(&mut self.dev, 0, &mut out)?;
        Ok(out)
    }

    /// The number of unallocated sectors on disk.
    pub fn num_free_sectors(&mut self) -> Result<usize> {
        Ok(self.fetch_free_map()?.num_clear())
    }

    /// Describes the system files, the free map and the root directory.
    pub fn dump(&mut self) -> Result<String> {
        let free_map = self.fetch_free_map()?;
        let directory = Directory::fetch_from(&mut self.dev, &self.directory_file)?;

        let map_hdr = self.free_map_file.header();
        let dir_hdr = self.directory_file.header();
        Ok(format!(
            "Bit map file header:\n{}\nFile contents:\n{}\
             Directory file header:\n{}\nFile contents:\n{}\
             {}\n{}",
            map_hdr,
            map_hdr.contents(&mut self.dev)?,
            dir_hdr,
            dir_hdr.contents(&mut self.dev)?,
            free_map,
            directory
        ))
    }

    fn fetch_free_map(&mut self) -> Result<Bitmap> {
        Bitmap::fetch_from(&mut self.dev, &self.free_map_file, self.num_sectors)
    }

    /// Loads the directory whose header is at `sector` along with its file.
    fn open_directory(&mut self, sector: SectorNumber) -> Result<(OpenFile, Directory)> {
        let file = if sector == DIRECTORY_SECTOR {
            self.directory_file.clone()
        } else {
            OpenFile::open(&mut self.dev, sector)?
        };
        let directory = Directory::fetch_from(&mut self.dev, &file)?;
        Ok((file, directory))
    }
}
