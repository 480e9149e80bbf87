//! Transaction writer: decouples "ciphertext is durable on disk" from
//! "the bitmap says this block is allocated". A block a tree build
//! stages is invisible to the allocator until [`TransactionWriter::finish_and_commit`]
//! marks it — so a crash mid-ingest leaks blocks as garbage but never
//! exposes a partially-written object as readable.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;

use crate::error::{Error, Result};
use crate::fs::FileSystem;

const CHANNEL_DEPTH: usize = 32;

/// Handed to the tree builder: stage ciphertext blocks for a free index,
/// then later commit everything that made it to disk.
pub struct TransactionWriter {
    fs: Arc<FileSystem>,
    data_tx: Sender<(u64, Vec<u8>)>,
    commit_rx: Receiver<u64>,
}

/// The background half: drains staged writes and performs the actual
/// disk I/O, reporting each completed index back on the commit queue.
pub struct WriterWorker {
    fs: Arc<FileSystem>,
    data_rx: Receiver<(u64, Vec<u8>)>,
    commit_tx: Sender<u64>,
}

pub fn transaction_writer(fs: Arc<FileSystem>) -> (TransactionWriter, WriterWorker) {
    let (data_tx, data_rx) = bounded(CHANNEL_DEPTH);
    let (commit_tx, commit_rx) = bounded(CHANNEL_DEPTH);
    (
        TransactionWriter {
            fs: fs.clone(),
            data_tx,
            commit_rx,
        },
        WriterWorker { fs, data_rx, commit_tx },
    )
}

impl TransactionWriter {
    /// Reserve a free block and enqueue its ciphertext for a durable
    /// write. The bitmap bit for the returned index is NOT set until
    /// [`TransactionWriter::finish_and_commit`] runs.
    pub fn stage(&self, ciphertext: Vec<u8>) -> Result<u64> {
        let idx = self.fs.allocate()?;
        self.data_tx
            .send((idx, ciphertext))
            .map_err(|_| Error::Conflict("writer worker has stopped".into()))?;
        Ok(idx)
    }

    /// Signal that no more writes are coming, then drain the commit
    /// queue — blocking until the writer worker has flushed everything
    /// staged — marking each index used as it arrives.
    pub fn finish_and_commit(self) -> Result<()> {
        let TransactionWriter { fs, data_tx, commit_rx } = self;
        drop(data_tx);
        for idx in commit_rx.iter() {
            fs.commit(idx)?;
        }
        Ok(())
    }
}

impl WriterWorker {
    pub fn run(self) -> Result<()> {
        for (idx, buf) in self.data_rx.iter() {
            self.fs.write(idx, &buf)?;
            debug!("wrote block {idx} ({} bytes)", buf.len());
            // The build side may already be gone (e.g. it errored out
            // and dropped its commit_rx); a closed commit channel just
            // means nothing is left to notify.
            let _ = self.commit_tx.send(idx);
        }
        Ok(())
    }
}
