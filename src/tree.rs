//! The object tree: slices an ingested byte stream into White (leaf)
//! and Black (index) nodes, drives the [`crate::writer::TransactionWriter`]
//! pipeline while building, and walks a token's root [`Entry`] back down
//! to recover, randomly-access, or delete the stored bytes.
//!
//! Ingestion runs two background workers alongside the caller: the
//! caller thread slices bytes into node-sized chunks, a build thread
//! frames/encrypts each chunk and assembles Black nodes over the
//! resulting Entries, and a writer thread (owned by
//! [`crate::writer::TransactionWriter`]) performs the actual disk I/O.
//! Retrieval, random-access reads, and deletion are single-threaded
//! walks — nothing in the original source implements the read path, so
//! these are built directly from the object model the write path
//! establishes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;

use crate::buffer::ByteBuffer;
use crate::entry::{Entry, EntryList, Kind};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::node;
use crate::random::Mt19937;
use crate::rca;
use crate::token::Token;
use crate::writer::{TransactionWriter, transaction_writer};

const CHANNEL_DEPTH: usize = 32;

/// RCA round count applied to every node this crate writes. Kept small
/// and fixed rather than exposed as a knob: each round re-derives a
/// fresh sub-seed chain (see [`crate::rca::encrypt`]), so the marginal
/// cost of an extra round is a full extra pass over the block.
const NODE_CRYPTO_LEVEL: u8 = 2;

/// A deterministic stream of per-node `(seed, level)` pairs.
///
/// The original source reseeds by hashing the current tree node's raw
/// pointer (`std::hash<black_node*>`) whenever its batch of draws runs
/// out — neither portable (pointer values are address-space dependent)
/// nor reproducible across runs. This stream is seeded once, from OS
/// entropy, when a build starts, and then simply keeps advancing; two
/// builds of the same input produce different ciphertexts (as intended
/// — nothing about object storage should be deterministic across
/// ingests), but a single build's own sequence never needs reseeding.
struct SeedStream {
    rng: Mt19937,
}

impl SeedStream {
    fn new() -> Self {
        SeedStream {
            rng: Mt19937::new(rand::random()),
        }
    }

    fn next_seed(&mut self) -> u16 {
        (self.rng.next_u32() & 0xffff) as u16
    }
}

/// Streaming ingest handle: write bytes to it, then [`Ingest::finish`]
/// to obtain the token for what was written.
pub struct Ingest {
    node_tx: Option<Sender<Vec<u8>>>,
    cache: Vec<u8>,
    max_payload: usize,
    build_handle: Option<JoinHandle<Result<Entry>>>,
    writer_handle: Option<JoinHandle<Result<()>>>,
}

impl Ingest {
    pub fn new(fs: Arc<FileSystem>) -> Self {
        let block_size = fs.block_size() as usize;
        let max_payload = node::max_payload(block_size);
        let (node_tx, node_rx) = bounded::<Vec<u8>>(CHANNEL_DEPTH);
        let (writer, worker) = transaction_writer(fs);

        let writer_handle = thread::spawn(move || worker.run());
        let build_handle = thread::spawn(move || build_tree(node_rx, writer, block_size, max_payload));

        Ingest {
            node_tx: Some(node_tx),
            cache: Vec::with_capacity(max_payload),
            max_payload,
            build_handle: Some(build_handle),
            writer_handle: Some(writer_handle),
        }
    }

    /// Buffer `data`, handing full-sized node chunks off to the build
    /// thread as the cache fills.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let space = self.max_payload - self.cache.len();
            let take = space.min(remaining.len());
            self.cache.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.cache.len() == self.max_payload {
                self.flush_cache()?;
            }
        }
        Ok(())
    }

    fn flush_cache(&mut self) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.cache, Vec::with_capacity(self.max_payload));
        self.node_tx
            .as_ref()
            .expect("Ingest::flush_cache called after finish")
            .send(chunk)
            .map_err(|_| Error::Conflict("tree build worker has stopped".into()))
    }

    /// Flush any partial chunk, close the intake channel, and wait for
    /// the build and writer threads to finish. Returns the token for
    /// the object just written.
    pub fn finish(mut self) -> Result<Token> {
        self.flush_cache()?;
        self.node_tx.take();

        let root = self
            .build_handle
            .take()
            .expect("finish called once")
            .join()
            .map_err(|_| Error::Conflict("tree build worker panicked".into()))??;
        self.writer_handle
            .take()
            .expect("finish called once")
            .join()
            .map_err(|_| Error::Conflict("writer worker panicked".into()))??;

        Ok(Token::new(root))
    }
}

impl std::io::Write for Ingest {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(buf).map_err(std::io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn build_tree(
    node_rx: Receiver<Vec<u8>>,
    writer: TransactionWriter,
    block_size: usize,
    max_payload: usize,
) -> Result<Entry> {
    let mut seeds = SeedStream::new();
    let mut current = EntryList::new();

    for payload in node_rx.iter() {
        // §4.8 step 1: the White node's framed `index` byte is its
        // ordinal position in the Black node it is about to join.
        let index = (current.len() % 256) as u8;
        let white_seed = seeds.next_seed();
        let entry = write_white_node(&writer, white_seed, index, &payload, block_size)?;
        current.push(entry);

        if !current.fits_one_more(max_payload) {
            let black_seed = seeds.next_seed();
            // This Black node becomes the sole (first) entry of the
            // fresh accumulator that replaces it, so its own ordinal is 0.
            let black_entry = write_black_node(&writer, black_seed, 0, &current, block_size)?;
            current = EntryList::new();
            current.push(black_entry);
        }
    }

    let root_seed = seeds.next_seed();
    let root = write_black_node(&writer, root_seed, 0, &current, block_size)?;
    debug!("tree build finished, root at block {}", root.bitmap);

    writer.finish_and_commit()?;
    Ok(root)
}

fn write_white_node(
    writer: &TransactionWriter,
    seed: u16,
    index: u8,
    payload: &[u8],
    block_size: usize,
) -> Result<Entry> {
    let framed = node::frame(index, payload, block_size, seed as u32)?;
    let ciphertext = ByteBuffer::from_bytes(framed.bytes);
    rca::encrypt(&ciphertext, seed as u32, NODE_CRYPTO_LEVEL);
    let idx = writer.stage(ciphertext.read_all())?;
    Ok(Entry {
        bitmap: idx,
        kind: Kind::White,
        start: framed.start,
        length: payload.len() as u16,
        seed,
        level: NODE_CRYPTO_LEVEL,
    })
}

fn write_black_node(
    writer: &TransactionWriter,
    seed: u16,
    index: u8,
    list: &EntryList,
    block_size: usize,
) -> Result<Entry> {
    let payload = list.serialize();
    let framed = node::frame(index, &payload, block_size, seed as u32)?;
    let ciphertext = ByteBuffer::from_bytes(framed.bytes);
    rca::encrypt(&ciphertext, seed as u32, NODE_CRYPTO_LEVEL);
    let idx = writer.stage(ciphertext.read_all())?;
    Ok(Entry {
        bitmap: idx,
        kind: Kind::Black,
        start: framed.start,
        length: payload.len() as u16,
        seed,
        level: NODE_CRYPTO_LEVEL,
    })
}

/// Read and decrypt the block an Entry points at, after checking that
/// the block is actually allocated. A clear free-bit means the Entry is
/// dangling — nothing committed ever pointed a live object at a free
/// block, so this only fires on corruption (or a deleted/garbage-
/// collected object whose token outlived its data).
fn read_node(fs: &FileSystem, entry: &Entry) -> Result<Vec<u8>> {
    if !fs.is_allocated(entry.bitmap)? {
        return Err(Error::Integrity(format!(
            "entry points at block {} whose free-bit is not set (dangling reference)",
            entry.bitmap
        )));
    }
    let raw = fs.read(entry.bitmap)?;
    let buf = ByteBuffer::from_bytes(raw);
    rca::decrypt(&buf, entry.seed as u32, entry.level);
    let block = buf.read_all();
    Ok(node::unframe(&block, entry.start, entry.length)?.to_vec())
}

/// Walk the whole tree rooted at `token.root` and concatenate every
/// White leaf's payload in logical (append) order.
pub fn retrieve(fs: &FileSystem, token: &Token) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    collect(fs, &token.root, &mut out)?;
    Ok(out)
}

fn collect(fs: &FileSystem, entry: &Entry, out: &mut Vec<u8>) -> Result<()> {
    let payload = read_node(fs, entry)?;
    match entry.kind {
        Kind::White => out.extend_from_slice(&payload),
        Kind::Black => {
            let list = EntryList::deserialize(&payload)?;
            for child in list.iter() {
                collect(fs, child, out)?;
            }
        }
    }
    Ok(())
}

/// Random-access read: skip `offset` logical bytes, then copy up to
/// `len` bytes. Returns fewer than `len` bytes (never an error) if the
/// object is shorter than `offset + len` — a short read at EOF.
pub fn read_at(fs: &FileSystem, token: &Token, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len.min(1 << 20));
    let mut skip = offset;
    collect_at(fs, &token.root, &mut skip, len, &mut out)?;
    Ok(out)
}

/// Returns `true` once `out` holds `want` bytes, so callers can stop
/// descending into further siblings.
fn collect_at(fs: &FileSystem, entry: &Entry, skip: &mut u64, want: usize, out: &mut Vec<u8>) -> Result<bool> {
    if out.len() >= want {
        return Ok(true);
    }
    let payload = read_node(fs, entry)?;
    match entry.kind {
        Kind::White => {
            let len_here = payload.len() as u64;
            if *skip >= len_here {
                *skip -= len_here;
                return Ok(false);
            }
            let start = *skip as usize;
            *skip = 0;
            let take = (want - out.len()).min(payload.len() - start);
            out.extend_from_slice(&payload[start..start + take]);
            Ok(out.len() >= want)
        }
        Kind::Black => {
            let list = EntryList::deserialize(&payload)?;
            for child in list.iter() {
                if collect_at(fs, child, skip, want, out)? {
                    return Ok(true);
                }
            }
            Ok(out.len() >= want)
        }
    }
}

/// Release every block the tree rooted at `token.root` occupies, child
/// blocks before their parent so a crash mid-delete never leaves a
/// dangling Black node pointing at already-freed children.
pub fn delete(fs: &FileSystem, token: &Token) -> Result<()> {
    delete_entry(fs, &token.root)
}

fn delete_entry(fs: &FileSystem, entry: &Entry) -> Result<()> {
    if entry.kind == Kind::Black {
        let payload = read_node(fs, entry)?;
        let list = EntryList::deserialize(&payload)?;
        for child in list.iter() {
            delete_entry(fs, child)?;
        }
    }
    fs.release(entry.bitmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("veilfs_tree_test_{name}_{}", std::process::id()))
    }

    fn test_config() -> Config {
        Config {
            block_size: 256,
            system_file_min_size: 256 * 64,
            ..Config::default()
        }
    }

    fn fresh_fs(name: &str) -> (PathBuf, Arc<FileSystem>) {
        let path = tmp_path(name);
        let _ = std::fs::remove_file(&path);
        let cfg = test_config();
        FileSystem::format(&path, 256 * 512, None, &cfg).unwrap();
        let fs = Arc::new(FileSystem::open(&path, &cfg).unwrap());
        (path, fs)
    }

    #[test]
    fn ingest_then_retrieve_round_trips_small_object() {
        let (path, fs) = fresh_fs("small");
        let mut ingest = Ingest::new(fs.clone());
        ingest.write_bytes(b"hello object store").unwrap();
        let token = ingest.finish().unwrap();

        let back = retrieve(&fs, &token).unwrap();
        assert_eq!(back, b"hello object store");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn ingest_then_retrieve_round_trips_multi_node_object() {
        let (path, fs) = fresh_fs("multi");
        let mut ingest = Ingest::new(fs.clone());
        let payload: Vec<u8> = (0u32..4000).map(|i| (i % 251) as u8).collect();
        ingest.write_all(&payload).unwrap();
        let token = ingest.finish().unwrap();

        let back = retrieve(&fs, &token).unwrap();
        assert_eq!(back, payload);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn ingest_then_retrieve_round_trips_every_boundary_size() {
        // Spec §8 property 4: must hold across every size that crosses a
        // White-node or Black-node boundary. Test config uses a 256-byte
        // block, so max_payload = 255 and a Black node's Entry capacity
        // is floor(255 / 16) = 15 children — the boundary size below is
        // exactly one full Black node's worth of White-node payloads.
        const B: usize = 256;
        let max_payload = B - 1;
        let black_node_capacity = (B - 1) / crate::entry::ENTRY_SIZE;
        let sizes = [
            0,
            1,
            max_payload - 1,
            max_payload,
            max_payload + 1,
            2 * max_payload,
            5 * max_payload,
            black_node_capacity * max_payload,
        ];

        for (i, &size) in sizes.iter().enumerate() {
            let (path, fs) = fresh_fs(&format!("boundary_{i}"));
            let mut ingest = Ingest::new(fs.clone());
            let payload: Vec<u8> = (0..size).map(|n| (n % 251) as u8).collect();
            ingest.write_all(&payload).unwrap();
            let token = ingest.finish().unwrap();

            let back = retrieve(&fs, &token).unwrap();
            assert_eq!(back, payload, "round-trip failed for size {size} (case {i})");
            std::fs::remove_file(&path).unwrap();
        }
    }

    #[test]
    fn read_at_supports_partial_and_short_reads() {
        let (path, fs) = fresh_fs("read_at");
        let mut ingest = Ingest::new(fs.clone());
        let payload: Vec<u8> = (0u32..3000).map(|i| (i % 256) as u8).collect();
        ingest.write_all(&payload).unwrap();
        let token = ingest.finish().unwrap();

        let middle = read_at(&fs, &token, 500, 100).unwrap();
        assert_eq!(middle, payload[500..600]);

        let short = read_at(&fs, &token, (payload.len() as u64) - 10, 100).unwrap();
        assert_eq!(short, payload[payload.len() - 10..]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn delete_releases_every_block_the_tree_used() {
        let (path, fs) = fresh_fs("delete");
        let mut ingest = Ingest::new(fs.clone());
        let payload: Vec<u8> = (0u32..3000).map(|i| (i % 256) as u8).collect();
        ingest.write_all(&payload).unwrap();
        let token = ingest.finish().unwrap();

        let used_before = fs.used_bytes();
        assert!(used_before > 0);
        delete(&fs, &token).unwrap();
        assert!(fs.used_bytes() < used_before);

        std::fs::remove_file(&path).unwrap();
    }
}
