//! Append-only disk store for evicted drawers.
//!
//! ```text
//! [ "CABSWAP\x01" ][ blob ][ blob ] ...
//! ```
//!
//! There is no index: a spill returns the byte offset it was written at and
//! the caller keeps it. Offsets are never reused.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

pub const SWAP_MAGIC: &[u8; 8] = b"CABSWAP\x01";

#[derive(Debug)]
pub struct SwapFile {
    path: PathBuf,
    file: Option<File>,
    end: u64,
}

impl SwapFile {
    /// The file is created on the first spill, not here.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            end: 0,
        }
    }

    /// A unique path in the system temp directory.
    pub fn temp_path() -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("cabinet-{}-{n}.swap", std::process::id()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far, magic included. 0 while no file exists.
    pub fn len(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    fn open(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&self.path)?;
                file.write_all(SWAP_MAGIC)?;
                self.end = SWAP_MAGIC.len() as u64;
                log::debug!("created swap file {}", self.path.display());
                file
            }
        };
        Ok(self.file.insert(file))
    }

    /// Append `bytes`, returning the offset they start at.
    pub fn spill(&mut self, bytes: &[u8]) -> io::Result<u64> {
        self.open()?;
        let offset = self.end;
        let file = self.open()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        self.end = offset + bytes.len() as u64;
        log::trace!("spilled {} bytes at swap offset {offset}", bytes.len());
        Ok(offset)
    }

    /// Fill `dest` with the bytes stored at `offset`.
    pub fn restore(&mut self, offset: u64, dest: &mut [u8]) -> io::Result<()> {
        if offset < SWAP_MAGIC.len() as u64 || offset + dest.len() as u64 > self.end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "swap range {offset}+{} outside written {} bytes",
                    dest.len(),
                    self.end
                ),
            ));
        }
        let file = self.open()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(dest)
    }

    /// Close and delete the file. The next spill starts a fresh one.
    pub fn free_cache(&mut self) -> io::Result<()> {
        let had_file = self.file.take().is_some();
        self.end = 0;
        if had_file {
            match fs::remove_file(&self.path) {
                Ok(()) => log::debug!("removed swap file {}", self.path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for SwapFile {
    fn drop(&mut self) {
        if let Err(e) = self.free_cache() {
            log::warn!("failed to remove swap file {}: {e}", self.path.display());
        }
    }
}
