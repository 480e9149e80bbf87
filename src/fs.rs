//! Superblock / FileSystem: the component that owns a host file plus its
//! bitmap, verifies the encrypted header on open, and serves
//! metadata-tracked block reads and writes.

use std::path::Path;

use log::{debug, info};
use parking_lot::RwLock;

use crate::bitmap::Bitmap;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hostfile::HostFile;
use crate::rca::Rca;
use crate::superblock::{Superblock, Trailer, header_hash};

fn unix_time_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

struct Inner {
    hostfile: HostFile,
    bitmap: Bitmap,
    modify_time: u64,
    trailer_seed_of_cell: u32,
}

/// Owns one open host file end to end: block I/O, the allocator, and the
/// superblock/trailer bookkeeping needed to reopen it safely later.
pub struct FileSystem {
    inner: RwLock<Inner>,
    block_size: u32,
    block_count: u64,
    create_time: u64,
}

impl FileSystem {
    /// Format a brand-new host file: lay out blocks, pick bitmap
    /// regions, write the (encrypted) superblock and the trailer, then
    /// mark every reserved system block.
    pub fn format(path: impl AsRef<Path>, total_size: u64, carrier: Option<&Path>, cfg: &Config) -> Result<()> {
        let path = path.as_ref();
        HostFile::create(path, total_size, carrier, cfg.system_file_min_size)?;
        let hostfile = HostFile::open(path, cfg.block_size)?;
        let block_count = hostfile.block_count();
        let block_size = cfg.block_size;

        let create_time = unix_time_now();
        let layout_seed = create_time as u32;
        let bitmap_start = crate::random::rand_number(
            layout_seed,
            (0.2 * block_count as f64) as i64,
            (0.5 * block_count as f64) as i64,
        ) as u64;
        let wear_bitmap_start = crate::random::rand_number(
            layout_seed.wrapping_add(1),
            (0.6 * block_count as f64) as i64,
            (0.9 * block_count as f64) as i64,
        ) as u64;
        let bitmap_size = block_count / 8 + 1;

        let superblock = Superblock {
            version: 0,
            file_size: hostfile.file_size(),
            block_size,
            block_count: block_count as u32,
            create_time,
            bitmap_start,
            wear_bitmap_start,
            bitmap_size,
        };
        let hash = header_hash(&superblock.header_bytes());
        let seed_of_cell = crate::random::rand_number(layout_seed.wrapping_add(2), 0, u32::MAX as i64) as u32;

        let plaintext_block = superblock.to_plaintext_block(block_size as usize, layout_seed.wrapping_add(3))?;
        let ciphertext = crate::buffer::ByteBuffer::from_bytes(plaintext_block);
        Rca::new(seed_of_cell, ciphertext.len()).forward(&ciphertext);
        hostfile.write_block(0, &ciphertext.read_all())?;

        let trailer = Trailer {
            modify_time: create_time,
            header_hash: hash,
            seed_of_cell,
        };
        hostfile.write_block(block_count - 1, &trailer.to_block(block_size as usize)?)?;

        let free_map_span = bitmap_size / block_size as u64 + 1;
        let wear_map_span = 8 * bitmap_size / block_size as u64 + 1;
        let mut bitmap = Bitmap::from_bytes(
            vec![0u8; bitmap_size as usize],
            vec![0u8; block_count as usize],
            block_count,
            bitmap_start,
            wear_bitmap_start,
        );
        bitmap.init_system_blocks(free_map_span, wear_map_span, block_count - 1)?;
        hostfile.write_block(bitmap_start, bitmap.free_map_bytes())?;
        hostfile.write_block(wear_bitmap_start, bitmap.wear_map_bytes())?;
        hostfile.sync()?;

        info!(
            "formatted {} ({block_count} blocks of {block_size} bytes, bitmap at {bitmap_start}, wear-map at {wear_bitmap_start})",
            path.display()
        );
        Ok(())
    }

    /// Open an existing, previously-formatted host file.
    pub fn open(path: impl AsRef<Path>, cfg: &Config) -> Result<Self> {
        let path = path.as_ref();
        let hostfile = HostFile::open(path, cfg.block_size)?;
        let block_count = hostfile.block_count();

        let trailer_block = hostfile.read_block(block_count - 1)?;
        let trailer = Trailer::from_block(&trailer_block)?;

        let ciphertext = crate::buffer::ByteBuffer::from_bytes(hostfile.read_block(0)?);
        Rca::new(trailer.seed_of_cell, ciphertext.len()).backward(&ciphertext);
        let plaintext = ciphertext.read_all();
        let superblock = Superblock::from_plaintext_block(&plaintext)?;

        let recomputed = header_hash(&superblock.header_bytes());
        if recomputed != trailer.header_hash {
            return Err(Error::Integrity(format!(
                "superblock integrity check failed for {}",
                path.display()
            )));
        }
        if superblock.file_size == 0 || superblock.block_size == 0 || superblock.block_count == 0 {
            return Err(Error::Integrity(format!(
                "superblock carries a zero-valued required field in {}",
                path.display()
            )));
        }

        let bitmap_size = superblock.bitmap_size;
        let free_map_span = bitmap_size / superblock.block_size as u64 + 1;
        let wear_map_span = 8 * bitmap_size / superblock.block_size as u64 + 1;

        let free_map = hostfile.read_blocks(superblock.bitmap_start, free_map_span)?;
        let wear_map = hostfile.read_blocks(superblock.wear_bitmap_start, wear_map_span)?;
        let bitmap = Bitmap::from_bytes(
            free_map[..bitmap_size as usize].to_vec(),
            wear_map[..block_count as usize].to_vec(),
            block_count,
            superblock.bitmap_start,
            superblock.wear_bitmap_start,
        );

        debug!(
            "opened {} ({block_count} blocks); last modified at {}",
            path.display(),
            trailer.modify_time
        );
        info!("superblock integrity check passed for {}", path.display());

        Ok(FileSystem {
            block_size: superblock.block_size,
            block_count,
            create_time: superblock.create_time,
            inner: RwLock::new(Inner {
                hostfile,
                bitmap,
                modify_time: trailer.modify_time,
                trailer_seed_of_cell: trailer.seed_of_cell,
            }),
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn create_time(&self) -> u64 {
        self.create_time
    }

    pub fn modify_time(&self) -> u64 {
        self.inner.read().modify_time
    }

    /// Shared read of a single block; does not touch the allocator.
    pub fn read(&self, idx: u64) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        inner.hostfile.read_block(idx)
    }

    /// Is `idx`'s free-bit currently set? Used to catch a dangling
    /// Entry (one whose target block was never committed, or was
    /// already released) before trusting its contents.
    pub fn is_allocated(&self, idx: u64) -> Result<bool> {
        let inner = self.inner.read();
        inner.bitmap.get(idx)
    }

    /// Exclusive raw write of a block. Does not allocate or mark the
    /// bitmap — see [`FileSystem::allocate`]/[`FileSystem::commit`].
    pub fn write(&self, idx: u64, buf: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.hostfile.write_block(idx, buf)?;
        inner.modify_time = unix_time_now();
        self.persist_trailer(&inner)
    }

    /// Reserve a free block from the allocator without marking it used
    /// yet (crash-atomicity: a block only becomes "allocated" at
    /// [`FileSystem::commit`]).
    pub fn allocate(&self) -> Result<u64> {
        let mut inner = self.inner.write();
        let idx = inner.bitmap.get_free_block();
        if idx == 0 {
            return Err(Error::OutOfSpace);
        }
        Ok(idx)
    }

    /// Mark `idx` used in the bitmap and persist both bitmap regions.
    pub fn commit(&self, idx: u64) -> Result<()> {
        let mut inner = self.inner.write();
        inner.bitmap.set(idx)?;
        self.persist_bitmap(&inner)?;
        inner.modify_time = unix_time_now();
        self.persist_trailer(&inner)
    }

    /// Clear `idx` in the bitmap (object deletion).
    pub fn release(&self, idx: u64) -> Result<()> {
        let mut inner = self.inner.write();
        inner.bitmap.clear(idx)?;
        self.persist_bitmap(&inner)?;
        inner.modify_time = unix_time_now();
        self.persist_trailer(&inner)
    }

    pub fn used_bytes(&self) -> u64 {
        let inner = self.inner.read();
        inner.bitmap.used_block_count() * self.block_size as u64
    }

    pub fn free_bytes(&self) -> u64 {
        let total = self.block_count * self.block_size as u64;
        total.saturating_sub(self.used_bytes())
    }

    fn persist_bitmap(&self, inner: &Inner) -> Result<()> {
        inner
            .hostfile
            .write_block(inner.bitmap.bitmap_start(), inner.bitmap.free_map_bytes())?;
        inner
            .hostfile
            .write_block(inner.bitmap.wear_bitmap_start(), inner.bitmap.wear_map_bytes())
    }

    fn persist_trailer(&self, inner: &Inner) -> Result<()> {
        let superblock_bytes = {
            let ciphertext = crate::buffer::ByteBuffer::from_bytes(inner.hostfile.read_block(0)?);
            Rca::new(inner.trailer_seed_of_cell, ciphertext.len()).backward(&ciphertext);
            ciphertext.read_all()
        };
        let superblock = Superblock::from_plaintext_block(&superblock_bytes)?;
        let hash = header_hash(&superblock.header_bytes());
        let trailer = Trailer {
            modify_time: inner.modify_time,
            header_hash: hash,
            seed_of_cell: inner.trailer_seed_of_cell,
        };
        inner
            .hostfile
            .write_block(self.block_count - 1, &trailer.to_block(self.block_size as usize)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("veilfs_fs_test_{name}_{}", std::process::id()))
    }

    fn test_config() -> Config {
        Config {
            block_size: 4096,
            system_file_min_size: 4096 * 32,
            ..Config::default()
        }
    }

    #[test]
    fn format_then_open_round_trips_metadata() {
        let path = tmp_path("format_open");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        FileSystem::format(&path, 4096 * 64, None, &cfg).unwrap();
        let fs = FileSystem::open(&path, &cfg).unwrap();
        assert_eq!(fs.block_count(), 64);
        assert_eq!(fs.block_size(), 4096);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupted_superblock_fails_integrity_check() {
        let path = tmp_path("corrupt");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        FileSystem::format(&path, 4096 * 64, None, &cfg).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = FileSystem::open(&path, &cfg).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn allocate_then_commit_marks_the_bitmap() {
        let path = tmp_path("alloc_commit");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        FileSystem::format(&path, 4096 * 64, None, &cfg).unwrap();
        let fs = FileSystem::open(&path, &cfg).unwrap();

        let used_before = fs.used_bytes();
        let idx = fs.allocate().unwrap();
        assert_eq!(fs.used_bytes(), used_before, "allocate alone must not mark the bitmap");
        fs.commit(idx).unwrap();
        assert_eq!(fs.used_bytes(), used_before + fs.block_size() as u64);
        std::fs::remove_file(&path).unwrap();
    }
}
