//! Dual bitmap allocator: a free-map and a parallel per-block wear-map,
//! fed through a shuffled, wear-sorted candidate list for next-fit
//! allocation.

use log::{debug, warn};
use rand::prelude::SliceRandom;

use crate::error::{Error, Result};

/// Wear value at which a block's own counter freezes and `set` stops
/// incrementing it further.
const SYSTEM_WEAR: u8 = 255;

/// Wear value at and above which a block's free-bit can never be
/// cleared, per spec invariant (a): both 254 and 255 are reserved, not
/// just the frozen-counter value — a block that climbs to 254 through
/// ordinary wear (not just one initialised as a system block at format
/// time) is just as permanently pinned.
const WEAR_PROTECTED: u8 = 254;

struct Candidate {
    index: u64,
    used: bool,
    wear: u8,
}

/// In-memory view of the allocator's two bitmaps. Owns no file handle —
/// callers (see [`crate::fs`]) persist `free_map_bytes`/`wear_map_bytes`
/// back to the host file after a mutating call.
pub struct Bitmap {
    free_map: Vec<u8>,
    wear_map: Vec<u8>,
    block_count: u64,
    bitmap_start: u64,
    wear_bitmap_start: u64,
    candidates: Vec<Candidate>,
    ptr: usize,
}

impl Bitmap {
    /// Build from raw bitmap bytes already read off disk.
    pub fn from_bytes(
        free_map: Vec<u8>,
        wear_map: Vec<u8>,
        block_count: u64,
        bitmap_start: u64,
        wear_bitmap_start: u64,
    ) -> Self {
        let mut bitmap = Bitmap {
            free_map,
            wear_map,
            block_count,
            bitmap_start,
            wear_bitmap_start,
            candidates: Vec::new(),
            ptr: 0,
        };
        bitmap.rebuild_candidates();
        bitmap
    }

    pub fn bitmap_start(&self) -> u64 {
        self.bitmap_start
    }

    pub fn wear_bitmap_start(&self) -> u64 {
        self.wear_bitmap_start
    }

    pub fn free_map_bytes(&self) -> &[u8] {
        &self.free_map
    }

    pub fn wear_map_bytes(&self) -> &[u8] {
        &self.wear_map
    }

    fn bit(&self, index: u64) -> bool {
        let byte = self.free_map[(index / 8) as usize];
        (byte >> (index % 8)) & 1 == 1
    }

    fn set_bit(&mut self, index: u64, value: bool) {
        let byte_index = (index / 8) as usize;
        let bit_index = index % 8;
        if value {
            self.free_map[byte_index] |= 1 << bit_index;
        } else {
            self.free_map[byte_index] &= !(1 << bit_index);
        }
    }

    pub fn get(&self, index: u64) -> Result<bool> {
        self.check_bound(index)?;
        Ok(self.bit(index))
    }

    pub fn get_wear(&self, index: u64) -> Result<u8> {
        self.check_bound(index)?;
        Ok(self.wear_map[index as usize])
    }

    fn check_bound(&self, index: u64) -> Result<()> {
        if index >= self.block_count {
            return Err(Error::out_of_range(index, self.block_count));
        }
        Ok(())
    }

    /// Mark `index` used and bump its wear, without any wear-balancing.
    /// Used only by `init` to mark reserved system regions.
    fn set_unmanaged(&mut self, index: u64) -> Result<()> {
        self.check_bound(index)?;
        self.set_bit(index, true);
        Ok(())
    }

    /// Mark `index` used, persisting wear and running wear-balance if the
    /// block is approaching saturation.
    pub fn set(&mut self, index: u64) -> Result<()> {
        self.check_bound(index)?;
        self.set_bit(index, true);
        let wear = self.wear_map[index as usize];
        if wear == SYSTEM_WEAR {
            warn!("attempt to increment wear on system block {index}, ignoring");
            return Ok(());
        }
        let wear = wear + 1;
        self.wear_map[index as usize] = wear;
        if (250..254).contains(&wear) {
            self.wear_balance();
        }
        Ok(())
    }

    /// Clear the used-bit for `index`. Refuses (with a warning) on
    /// protected system blocks.
    pub fn clear(&mut self, index: u64) -> Result<()> {
        self.check_bound(index)?;
        if self.wear_map[index as usize] >= WEAR_PROTECTED {
            warn!("attempt to clear system block {index}, ignoring");
            return Ok(());
        }
        self.set_bit(index, false);
        Ok(())
    }

    fn wear_balance(&mut self) {
        debug!("wear-balancing allocator");
        let min_wear = self
            .wear_map
            .iter()
            .take(self.block_count as usize)
            .copied()
            .min()
            .unwrap_or(0);
        if min_wear == 0 {
            return;
        }
        for w in self.wear_map.iter_mut().take(self.block_count as usize) {
            if *w < WEAR_PROTECTED {
                *w -= min_wear - 1;
            }
        }
    }

    /// Blocks whose free-bit is set, capped at `block_count`, times the
    /// block size (the caller multiplies).
    pub fn used_block_count(&self) -> u64 {
        (0..self.block_count).filter(|&i| self.bit(i)).count() as u64
    }

    fn rebuild_candidates(&mut self) {
        let mut candidates: Vec<Candidate> = (0..self.block_count)
            .map(|i| Candidate {
                index: i,
                used: self.bit(i),
                wear: self.wear_map[i as usize],
            })
            .collect();
        candidates.shuffle(&mut rand::rng());
        candidates.sort_by(|a, b| a.used.cmp(&b.used).then(a.wear.cmp(&b.wear)));
        self.candidates = candidates;
        self.ptr = 0;
    }

    /// Allocate a free block: next-fit over the shuffled, wear-sorted
    /// candidate list. Returns `0` (the superblock, never a valid
    /// allocation) if the store is full.
    pub fn get_free_block(&mut self) -> u64 {
        if self.ptr >= self.candidates.len() {
            self.rebuild_candidates();
            if self.ptr >= self.candidates.len() {
                return 0;
            }
        }
        let candidate = self.candidates[self.ptr].index;
        self.ptr += 1;
        if self.bit(candidate) {
            self.rebuild_candidates();
            if self.ptr >= self.candidates.len() {
                return 0;
            }
            let retry = self.candidates[self.ptr].index;
            self.ptr += 1;
            if self.bit(retry) {
                return 0;
            }
            return retry;
        }
        candidate
    }

    /// Reserve the permanent system blocks (superblock, trailer,
    /// reserved block, and the blocks covered by both bitmap regions),
    /// freezing each one's wear at 255.
    pub fn init_system_blocks(
        &mut self,
        free_map_span: u64,
        wear_map_span: u64,
        last_index: u64,
    ) -> Result<()> {
        for i in self.bitmap_start..self.bitmap_start + free_map_span {
            self.set_unmanaged(i)?;
            self.wear_map[i as usize] = 0;
        }
        for i in self.wear_bitmap_start..self.wear_bitmap_start + wear_map_span {
            self.set_unmanaged(i)?;
            self.wear_map[i as usize] = 0;
        }
        for &system_index in &[0, last_index, last_index - 1] {
            self.set_unmanaged(system_index)?;
            self.wear_map[system_index as usize] = SYSTEM_WEAR;
        }
        self.rebuild_candidates();
        Ok(())
    }
}
