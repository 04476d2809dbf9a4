use crate::file::OpenFile;
use crate::fs::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};
use crate::{decode_sector, encode_sector, FILE_NAME_MAX_LEN};

use std::fmt;
use std::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Bytes used by one directory entry on disk.
pub(crate) const ENTRY_SIZE: usize = size_of::<RawEntry>();

/// This structure __must not contain padding__, it is written to disk as is.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug, PartialEq)]
struct RawEntry {
    in_use: u8,
    is_directory: u8,
    _reserved: [u8; 2],
    /// Sector of the entry's file header.
    sector: i32,
    /// Zero padded, not terminated when the name uses every byte.
    name: [u8; FILE_NAME_MAX_LEN],
}

impl RawEntry {
    fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_MAX_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    fn to_entry(&self) -> Option<DirEntry> {
        if self.in_use == 0 {
            return None;
        }
        Some(DirEntry {
            name: self.name(),
            sector: decode_sector(self.sector)?,
            is_directory: self.is_directory != 0,
        })
    }
}

/// A live directory entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Sector of the file header.
    pub sector: SectorNumber,
    pub is_directory: bool,
}

/// Encodes `name` into the fixed width name field.
fn encode_name(name: &str) -> Result<[u8; FILE_NAME_MAX_LEN]> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument(format!("invalid file name {:?}", name)));
    }
    if name.len() > FILE_NAME_MAX_LEN {
        return Err(FsError::NameTooLong);
    }
    let mut encoded = [0; FILE_NAME_MAX_LEN];
    encoded[..name.len()].copy_from_slice(name.as_bytes());
    Ok(encoded)
}

/// A fixed capacity table of names, stored as the contents of an ordinary
/// file. Capacity is chosen when the directory file is created and never grows.
///
/// Like the free map, a directory is fetched into memory, changed, and only
/// written back by operations that succeed.
#[derive(Clone, Debug, PartialEq)]
pub struct Directory {
    table: Vec<RawEntry>,
}

impl Directory {
    /// An empty directory with room for `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: vec![RawEntry::new_zeroed(); capacity],
        }
    }

    /// Size in bytes of the file holding a directory of `capacity` entries.
    pub fn file_size(capacity: usize) -> usize {
        capacity * ENTRY_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Reads the whole entry table from the directory's file. The capacity is
    /// implied by the file's length.
    pub fn fetch_from<T: BlockStorage>(dev: &mut T, file: &OpenFile) -> Result<Self> {
        let capacity = file.length() / ENTRY_SIZE;
        let mut buf = vec![0; Self::file_size(capacity)];
        file.read_at(dev, &mut buf, 0)?;

        let table = buf
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                RawEntry::read_from(chunk).ok_or_else(|| {
                    FsError::InvalidLayout(format!(
                        "unreadable directory entry in file at sector {}",
                        file.sector()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { table })
    }

    /// Writes the whole entry table into the directory's file.
    pub fn write_back<T: BlockStorage>(&self, dev: &mut T, file: &OpenFile) -> Result<()> {
        let buf: Vec<u8> = self
            .table
            .iter()
            .flat_map(|entry| entry.as_bytes().iter().copied())
            .collect();
        file.write_at(dev, &buf, 0)?;
        Ok(())
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        let encoded = encode_name(name).ok()?;
        self.table
            .iter()
            .position(|entry| entry.in_use != 0 && entry.name == encoded)
    }

    /// Looks a name up. The lowest numbered matching entry wins.
    pub fn lookup(&self, name: &str) -> Option<DirEntry> {
        self.find_index(name).and_then(|i| self.table[i].to_entry())
    }

    /// The header sector of `name`, if present.
    pub fn find(&self, name: &str) -> Option<SectorNumber> {
        self.lookup(name).map(|entry| entry.sector)
    }

    /// Adds a name to the directory.
    ///
    /// # Errors
    ///
    /// [`FsError::AlreadyExists`] if the name is taken, [`FsError::DirectoryFull`]
    /// if every entry is in use, and [`FsError::NameTooLong`] or
    /// [`FsError::InvalidArgument`] for names that cannot be stored. The
    /// directory is unchanged on error.
    pub fn add(&mut self, name: &str, sector: SectorNumber, is_directory: bool) -> Result<()> {
        let encoded = encode_name(name)?;
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter_mut()
            .find(|entry| entry.in_use == 0)
            .ok_or(FsError::DirectoryFull)?;

        *slot = RawEntry {
            in_use: 1,
            is_directory: is_directory as u8,
            _reserved: [0; 2],
            sector: encode_sector(Some(sector)),
            name: encoded,
        };
        Ok(())
    }

    /// Removes a name from the directory.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let i = self.find_index(name).ok_or(FsError::NotFound)?;
        self.table[i].in_use = 0;
        Ok(())
    }

    /// Entries in use, in table order.
    pub fn entries(&self) -> impl Iterator<Item = DirEntry> + '_ {
        self.table.iter().filter_map(RawEntry::to_entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Names of the entries in use.
    pub fn list(&self) -> Vec<String> {
        self.entries().map(|entry| entry.name).collect()
    }

    /// Appends one line per entry to `out`, descending into subdirectories.
    /// `indent` only controls how deep the lines are indented.
    pub fn list_recursively<T: BlockStorage>(
        &self,
        dev: &mut T,
        indent: usize,
        out: &mut String,
    ) -> Result<()> {
        for entry in self.entries() {
            let kind = if entry.is_directory { 'D' } else { 'F' };
            out.push_str(&format!(
                "{:width$}[{}] {}\n",
                "",
                kind,
                entry.name,
                width = indent * 4
            ));
            if entry.is_directory {
                let file = OpenFile::open(dev, entry.sector)?;
                Directory::fetch_from(dev, &file)?.list_recursively(dev, indent + 1, out)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Directory contents:")?;
        for entry in self.entries() {
            writeln!(
                f,
                "Name: {}, Sector: {}, Directory: {}",
                entry.name, entry.sector, entry.is_directory
            )?;
        }
        Ok(())
    }
}
