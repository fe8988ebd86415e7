use memmap2::Mmap;
use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::time::SystemTime;

/// True when `path` exists and is not a directory
pub fn exists_and_is_file<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path).map(|m| !m.is_dir()).unwrap_or(false)
}

/// Size and modification time of a file, taken with one `stat`. Two
/// stamps of the same path differ once the file has been rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    pub fn of<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::from_metadata(&fs::metadata(path)?))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// Read-only memory map of a whole file.
///
/// Empty files cannot be mapped, so they are represented without a mapping.
pub struct MappedFile {
    map: Option<Mmap>,
    stamp: FileStamp,
}

impl MappedFile {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let stamp = FileStamp::from_metadata(&file.metadata()?);
        if stamp.len == 0 {
            return Ok(Self { map: None, stamp });
        }
        // SAFETY: the map is read-only and private to this process; files
        // served from the web root are not truncated while being served.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            map: Some(map),
            stamp,
        })
    }

    /// Stamp of the file as it was when mapped
    pub fn stamp(&self) -> FileStamp {
        self.stamp
    }

    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl Deref for MappedFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}
