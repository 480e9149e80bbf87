//! The physical host file: a carrier prefix, `N` fixed-size blocks, and a
//! trailing 4-byte little-endian prefix-size marker.
//!
//! Reads and writes are positioned (`pread`/`pwrite` via
//! [`std::os::unix::fs::FileExt`]) rather than seek-then-read, so a
//! shared `&HostFile` can genuinely serve concurrent reads — the
//! property [`crate::fs::FileSystem`]'s read-write lock depends on.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::random::rand_bytes;

const PREFIX_MARKER_SIZE: u64 = 4;

/// An open host file: block-indexed reads and writes, blind to anything
/// above it (bitmap, tree, tokens).
pub struct HostFile {
    file: File,
    path: PathBuf,
    file_size: u64,
    prefix_size: u32,
    block_size: u32,
}

impl HostFile {
    /// Lay out a brand-new host file: optional carrier bytes, then
    /// `total_size` bytes of random filler, then the prefix-size marker.
    /// `total_size` is the size of the filler region, not counting the
    /// carrier or the marker.
    pub fn create(
        path: impl AsRef<Path>,
        total_size: u64,
        carrier: Option<&Path>,
        min_size: u64,
    ) -> Result<()> {
        use std::io::Write;

        let path = path.as_ref();
        if total_size < min_size {
            return Err(Error::SizeTooSmall {
                requested: total_size,
                minimum: min_size,
            });
        }
        if path.exists() {
            return Err(Error::Conflict(format!(
                "host file already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let mut out = File::create(path).map_err(|e| Error::io(path, e))?;

        let prefix_size: u32 = match carrier {
            Some(carrier_path) => match std::fs::read(carrier_path) {
                Ok(bytes) => {
                    out.write_all(&bytes).map_err(|e| Error::io(path, e))?;
                    bytes.len() as u32
                }
                Err(e) => {
                    warn!(
                        "carrier file {} unreadable ({e}); formatting without a carrier",
                        carrier_path.display()
                    );
                    0
                }
            },
            None => 0,
        };

        const CHUNK: usize = 4096;
        let mut remaining = total_size;
        let mut seed: u32 = 0x5151_5151;
        while remaining > 0 {
            let this_chunk = remaining.min(CHUNK as u64) as usize;
            let bytes = rand_bytes(this_chunk, seed, 0, 255);
            out.write_all(&bytes).map_err(|e| Error::io(path, e))?;
            remaining -= this_chunk as u64;
            seed = seed.wrapping_add(1);
        }

        out.write_all(&prefix_size.to_le_bytes())
            .map_err(|e| Error::io(path, e))?;
        out.flush().map_err(|e| Error::io(path, e))?;
        info!(
            "created host file {} ({} bytes, prefix {} bytes)",
            path.display(),
            total_size,
            prefix_size
        );
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>, block_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        let file_size = file.metadata().map_err(|e| Error::io(&path, e))?.len();
        if file_size < PREFIX_MARKER_SIZE {
            return Err(Error::Integrity(format!(
                "host file {} is smaller than the trailing marker",
                path.display()
            )));
        }
        let mut marker = [0u8; 4];
        file.read_exact_at(&mut marker, file_size - PREFIX_MARKER_SIZE)
            .map_err(|e| Error::io(&path, e))?;
        let prefix_size = u32::from_le_bytes(marker);
        debug!(
            "opened host file {} (size {file_size}, prefix {prefix_size})",
            path.display()
        );
        Ok(HostFile {
            file,
            path,
            file_size,
            prefix_size,
            block_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn prefix_size(&self) -> u32 {
        self.prefix_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Usable block count: everything between the prefix and the
    /// trailing marker.
    pub fn block_count(&self) -> u64 {
        (self.file_size - self.prefix_size as u64 - PREFIX_MARKER_SIZE) / self.block_size as u64
    }

    fn physical_offset(&self, block_index: u64) -> u64 {
        self.prefix_size as u64 + block_index * self.block_size as u64
    }

    pub fn read_block(&self, block_index: u64) -> Result<Vec<u8>> {
        self.read_blocks(block_index, 1)
    }

    pub fn read_blocks(&self, block_index: u64, count: u64) -> Result<Vec<u8>> {
        let bound = self.block_count();
        if block_index + count > bound {
            return Err(Error::out_of_range(block_index, bound));
        }
        let offset = self.physical_offset(block_index);
        let mut buf = vec![0u8; (count * self.block_size as u64) as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(buf)
    }

    pub fn write_block(&self, block_index: u64, data: &[u8]) -> Result<()> {
        let bound = self.block_count();
        let blocks = (data.len() as u64).div_ceil(self.block_size as u64).max(1);
        if block_index + blocks > bound {
            return Err(Error::out_of_range(block_index, bound));
        }
        let offset = self.physical_offset(block_index);
        self.file
            .write_all_at(data, offset)
            .map_err(|e| Error::io(&self.path, e))
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data().map_err(|e| Error::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("veilfs_hostfile_test_{name}_{}", std::process::id()))
    }

    #[test]
    fn create_rejects_undersized_requests() {
        let path = tmp_path("undersized");
        let _ = std::fs::remove_file(&path);
        let err = HostFile::create(&path, 10, None, 65536).unwrap_err();
        assert!(matches!(err, Error::SizeTooSmall { .. }));
    }

    #[test]
    fn create_then_open_round_trips_a_block() {
        let path = tmp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        HostFile::create(&path, 4096 * 8, None, 4096 * 4).unwrap();
        let hf = HostFile::open(&path, 4096).unwrap();
        assert_eq!(hf.prefix_size(), 0);
        assert_eq!(hf.block_count(), 8);
        let payload = vec![0xab; 4096];
        hf.write_block(2, &payload).unwrap();
        let back = hf.read_block(2).unwrap();
        assert_eq!(back, payload);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn out_of_range_block_is_rejected() {
        let path = tmp_path("oob");
        let _ = std::fs::remove_file(&path);
        HostFile::create(&path, 4096 * 4, None, 4096 * 4).unwrap();
        let hf = HostFile::open(&path, 4096).unwrap();
        assert!(hf.read_block(100).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
