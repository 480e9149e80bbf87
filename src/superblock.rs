//! Superblock (block 0, RCA-encrypted) and Trailer (last block,
//! plaintext) — the two fixed records a host file carries around its
//! moving parts.

use binrw::{BinRead, BinWrite};

use crate::error::{Error, Result};
use crate::random::rand_bytes;

/// Plaintext superblock fields, before RCA encryption and before padding
/// out to a full block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Superblock {
    pub version: u8,
    pub file_size: u64,
    pub block_size: u32,
    pub block_count: u32,
    pub create_time: u64,
    pub bitmap_start: u64,
    pub wear_bitmap_start: u64,
    pub bitmap_size: u64,
}

pub const SUPERBLOCK_HEADER_SIZE: usize = 1 + 8 + 4 + 4 + 8 + 8 + 8 + 8;

impl Superblock {
    pub fn to_plaintext_block(&self, block_size: usize, pad_seed: u32) -> Result<Vec<u8>> {
        pack_with_padding(self, block_size, pad_seed)
    }

    /// Exact serialized header bytes, with no block padding — the
    /// stable input to [`header_hash`] on both format and open.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::with_capacity(SUPERBLOCK_HEADER_SIZE));
        self.write_le(&mut buf)
            .expect("Superblock serialization is infallible");
        buf.into_inner()
    }

    pub fn from_plaintext_block(block: &[u8]) -> Result<Self> {
        if block.len() < SUPERBLOCK_HEADER_SIZE {
            return Err(Error::Integrity("superblock block too short".into()));
        }
        let mut cursor = std::io::Cursor::new(block);
        Superblock::read(&mut cursor)
            .map_err(|e| Error::Integrity(format!("malformed superblock: {e}")))
    }
}

/// Plaintext trailer fields, before padding out to a full block. The
/// trailer is never encrypted: it carries the key (`seed_of_cell`)
/// needed to decrypt the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Trailer {
    pub modify_time: u64,
    pub header_hash: u64,
    pub seed_of_cell: u32,
}

pub const TRAILER_HEADER_SIZE: usize = 8 + 8 + 4;

impl Trailer {
    pub fn to_block(&self, block_size: usize) -> Result<Vec<u8>> {
        pack_with_zero_padding(self, block_size)
    }

    pub fn from_block(block: &[u8]) -> Result<Self> {
        if block.len() < TRAILER_HEADER_SIZE {
            return Err(Error::Integrity("trailer block too short".into()));
        }
        let mut cursor = std::io::Cursor::new(block);
        Trailer::read(&mut cursor).map_err(|e| Error::Integrity(format!("malformed trailer: {e}")))
    }
}

/// Deterministic, reproducible integrity hash of a superblock's
/// plaintext header bytes. The original implementation hashes via
/// `std::hash<string>`, whose algorithm is implementation-defined and
/// therefore not portable; CRC32C (already pulled in by this crate for
/// its ext4-writer lineage) gives a fixed, cheap, reproducible digest
/// instead — widened to 64 bits to match the trailer's `header_hash`
/// field width.
pub fn header_hash(superblock_header: &[u8]) -> u64 {
    crc32c::crc32c(superblock_header) as u64
}

fn pack_with_padding<T>(value: &T, block_size: usize, pad_seed: u32) -> Result<Vec<u8>>
where
    T: BinWrite,
    for<'a> <T as BinWrite>::Args<'a>: Default,
{
    let mut buf = std::io::Cursor::new(Vec::new());
    value
        .write_le(&mut buf)
        .map_err(|e| Error::Integrity(format!("failed to serialize block header: {e}")))?;
    let mut bytes = buf.into_inner();
    if bytes.len() > block_size {
        return Err(Error::Integrity(format!(
            "serialized header of {} bytes exceeds block size {block_size}",
            bytes.len()
        )));
    }
    let pad = rand_bytes(block_size - bytes.len(), pad_seed, 0, 255);
    bytes.extend_from_slice(&pad);
    Ok(bytes)
}

fn pack_with_zero_padding<T>(value: &T, block_size: usize) -> Result<Vec<u8>>
where
    T: BinWrite,
    for<'a> <T as BinWrite>::Args<'a>: Default,
{
    let mut buf = std::io::Cursor::new(Vec::new());
    value
        .write_le(&mut buf)
        .map_err(|e| Error::Integrity(format!("failed to serialize block header: {e}")))?;
    let mut bytes = buf.into_inner();
    if bytes.len() > block_size {
        return Err(Error::Integrity(format!(
            "serialized header of {} bytes exceeds block size {block_size}",
            bytes.len()
        )));
    }
    bytes.resize(block_size, 0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_round_trips_through_a_padded_block() {
        let sb = Superblock {
            version: 0,
            file_size: 64 * 1024 * 1024,
            block_size: 4096,
            block_count: 16384,
            create_time: 1_700_000_000,
            bitmap_start: 3000,
            wear_bitmap_start: 12000,
            bitmap_size: 2049,
        };
        let block = sb.to_plaintext_block(4096, 7).unwrap();
        assert_eq!(block.len(), 4096);
        let back = Superblock::from_plaintext_block(&block).unwrap();
        assert_eq!(sb, back);
    }

    #[test]
    fn trailer_round_trips_with_zero_padding() {
        let trailer = Trailer {
            modify_time: 42,
            header_hash: 0xdead_beef_cafe,
            seed_of_cell: 123_456,
        };
        let block = trailer.to_block(4096).unwrap();
        assert_eq!(block.len(), 4096);
        assert!(block[TRAILER_HEADER_SIZE..].iter().all(|&b| b == 0));
        let back = Trailer::from_block(&block).unwrap();
        assert_eq!(trailer, back);
    }

    #[test]
    fn header_hash_is_deterministic_and_sensitive_to_content() {
        let a = header_hash(b"hello");
        let b = header_hash(b"hello");
        let c = header_hash(b"hellp");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
