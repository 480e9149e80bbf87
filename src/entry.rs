//! Entry: a fixed-size descriptor pointing at one child block, and
//! EntryList: a Black node's payload before it is framed.

use binrw::{BinRead, BinWrite};

use crate::error::{Error, Result};

pub const ENTRY_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, repr = u8)]
pub enum Kind {
    White = 0,
    Black = 1,
}

/// Fixed 16-byte little-endian record: which physical block a child
/// lives in, how to slice its payload out, and how to decrypt it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct Entry {
    pub bitmap: u64,
    pub kind: Kind,
    pub start: u16,
    pub length: u16,
    pub seed: u16,
    pub level: u8,
}

impl Entry {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_SIZE);
        let mut cursor = std::io::Cursor::new(&mut buf);
        self.write(&mut cursor).expect("Entry serialization is infallible");
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_SIZE {
            return Err(Error::Integrity(format!(
                "entry buffer too short: {} < {ENTRY_SIZE}",
                bytes.len()
            )));
        }
        let mut cursor = std::io::Cursor::new(bytes);
        Entry::read(&mut cursor).map_err(|e| Error::Integrity(format!("malformed entry: {e}")))
    }
}

/// A Black node's logical children, in read order. Serializing preserves
/// insertion order: a fixed-width Entry carries no separate ordinal
/// field, so permuting the on-disk order would make it impossible to
/// recover the order children were appended in without reading every
/// sibling's block up front — incompatible with both the ingest/retrieve
/// round-trip invariant and random-access reads that want to stop early.
#[derive(Debug, Clone, Default)]
pub struct EntryList {
    entries: Vec<Entry>,
}

impl EntryList {
    pub fn new() -> Self {
        EntryList { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn byte_len(&self) -> usize {
        self.entries.len() * ENTRY_SIZE
    }

    /// Would adding one more entry still fit within `max_bytes` (the
    /// Black node's `B - 1` Entry-body budget)?
    pub fn fits_one_more(&self, max_bytes: usize) -> bool {
        (self.entries.len() + 1) * ENTRY_SIZE <= max_bytes
    }

    /// Serialize in insertion order — the order [`EntryList::iter`]
    /// already walks, and the order a reader reconstructs the parent's
    /// children in.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_bytes());
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % ENTRY_SIZE != 0 {
            return Err(Error::Integrity(format!(
                "entry list length {} is not a multiple of {ENTRY_SIZE}",
                bytes.len()
            )));
        }
        let mut entries = Vec::with_capacity(bytes.len() / ENTRY_SIZE);
        for chunk in bytes.chunks(ENTRY_SIZE) {
            entries.push(Entry::from_bytes(chunk)?);
        }
        Ok(EntryList { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seed: u16) -> Entry {
        Entry {
            bitmap: 12345,
            kind: Kind::White,
            start: 10,
            length: 200,
            seed,
            level: 3,
        }
    }

    #[test]
    fn entry_round_trips_and_is_16_bytes() {
        let e = sample(9);
        let bytes = e.to_bytes();
        assert_eq!(bytes.len(), ENTRY_SIZE);
        let back = Entry::from_bytes(&bytes).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn entry_list_round_trips_in_insertion_order() {
        let mut list = EntryList::new();
        for i in 0..20u16 {
            list.push(sample(i));
        }
        let logical: Vec<Entry> = list.iter().copied().collect();
        let disk_bytes = list.serialize();
        let from_disk = EntryList::deserialize(&disk_bytes).unwrap();
        let disk_order: Vec<Entry> = from_disk.iter().copied().collect();
        assert_eq!(disk_order, logical, "disk order must match append order exactly");
    }

    #[test]
    fn capacity_check_matches_b_minus_one_budget() {
        let mut list = EntryList::new();
        let max_bytes = 4095usize;
        let capacity = max_bytes / ENTRY_SIZE;
        for i in 0..capacity {
            assert!(list.fits_one_more(max_bytes));
            list.push(sample(i as u16));
        }
        assert!(!list.fits_one_more(max_bytes) || list.byte_len() + ENTRY_SIZE <= max_bytes);
    }
}
