//! Public facade: the one type applications embed.
//!
//! [`Store`] owns a [`FileSystem`] and hands out [`Ingest`] handles for
//! writing, and plain byte vectors for reading. Nothing above this
//! layer ever sees a block index — only [`Token`]s cross the boundary.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::token::Token;
use crate::tree::{self, Ingest};

/// A content-addressed object store backed by a single host file.
pub struct Store {
    fs: Arc<FileSystem>,
}

impl Store {
    /// Format a brand-new host file at `path`. Does not open it — call
    /// [`Store::open`] afterward, the same as a real filesystem's
    /// mkfs-then-mount split.
    pub fn format(path: impl AsRef<Path>, total_size: u64, carrier: Option<&Path>, cfg: &Config) -> Result<()> {
        FileSystem::format(path, total_size, carrier, cfg)
    }

    /// Open a previously-formatted host file.
    pub fn open(path: impl AsRef<Path>, cfg: &Config) -> Result<Self> {
        let fs = FileSystem::open(path, cfg)?;
        Ok(Store { fs: Arc::new(fs) })
    }

    /// Begin a streaming ingest. Write bytes to the returned handle,
    /// then call [`Ingest::finish`] to mint the token.
    pub fn ingest(&self) -> Ingest {
        Ingest::new(self.fs.clone())
    }

    /// Convenience wrapper around [`Store::ingest`] for objects already
    /// fully in memory.
    pub fn put(&self, data: &[u8]) -> Result<Token> {
        let mut ingest = self.ingest();
        ingest.write_bytes(data)?;
        ingest.finish()
    }

    /// Recover the full object addressed by `token`.
    pub fn retrieve(&self, token: &Token) -> Result<Vec<u8>> {
        tree::retrieve(&self.fs, token)
    }

    /// Recover up to `len` bytes starting at logical offset `offset`.
    /// Short reads at the end of the object are not an error.
    pub fn read_at(&self, token: &Token, offset: u64, len: usize) -> Result<Vec<u8>> {
        tree::read_at(&self.fs, token, offset, len)
    }

    /// Release every block the object addressed by `token` occupies.
    pub fn delete(&self, token: &Token) -> Result<()> {
        tree::delete(&self.fs, token)
    }

    pub fn used_bytes(&self) -> u64 {
        self.fs.used_bytes()
    }

    pub fn free_bytes(&self) -> u64 {
        self.fs.free_bytes()
    }

    pub fn block_count(&self) -> u64 {
        self.fs.block_count()
    }

    pub fn block_size(&self) -> u32 {
        self.fs.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("veilfs_store_test_{name}_{}", std::process::id()))
    }

    fn test_config() -> Config {
        Config {
            block_size: 512,
            system_file_min_size: 512 * 64,
            ..Config::default()
        }
    }

    #[test]
    fn put_then_retrieve_through_a_formatted_token() {
        let path = tmp_path("put_retrieve");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        Store::format(&path, 512 * 1024, None, &cfg).unwrap();
        let store = Store::open(&path, &cfg).unwrap();

        let token = store.put(b"the quick brown fox").unwrap();
        let back = store.retrieve(&token).unwrap();
        assert_eq!(back, b"the quick brown fox");

        let parsed = Token::parse(&token.to_string_token()).unwrap();
        let via_text = store.retrieve(&parsed).unwrap();
        assert_eq!(via_text, b"the quick brown fox");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn delete_then_retrieve_fails_to_find_freed_blocks_reused() {
        let path = tmp_path("put_delete_reuse");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        Store::format(&path, 512 * 1024, None, &cfg).unwrap();
        let store = Store::open(&path, &cfg).unwrap();

        let token_a = store.put(&vec![0xaa; 3000]).unwrap();
        let used_with_a = store.used_bytes();
        store.delete(&token_a).unwrap();
        assert!(store.used_bytes() < used_with_a);

        let token_b = store.put(&vec![0xbb; 3000]).unwrap();
        let back = store.retrieve(&token_b).unwrap();
        assert_eq!(back, vec![0xbb; 3000]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn used_and_free_bytes_account_for_the_whole_file() {
        let path = tmp_path("accounting");
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        Store::format(&path, 512 * 1024, None, &cfg).unwrap();
        let store = Store::open(&path, &cfg).unwrap();
        let total = store.block_count() * store.block_size() as u64;
        assert_eq!(store.used_bytes() + store.free_bytes(), total);
        std::fs::remove_file(&path).unwrap();
    }
}
