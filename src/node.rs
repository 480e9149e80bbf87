//! Block framing shared by White nodes (raw payload) and Black nodes
//! (a serialized EntryList): a one-byte ordinal index, random padding,
//! the payload, then random padding out to the full block size.

use crate::error::Result;
use crate::error::Error;
use crate::random::rand_bytes;

/// Maximum payload a node of block size `block_size` can hold: one byte
/// for the leading `index` leaves `block_size - 1`.
pub fn max_payload(block_size: usize) -> usize {
    block_size.saturating_sub(1)
}

pub struct Framed {
    pub bytes: Vec<u8>,
    pub start: u16,
}

/// Frame `payload` into a block-sized buffer with random padding before
/// and after it. `index` is the node's ordinal position (0-based,
/// modulo 256 per spec §3) in its parent Black node's child list — a
/// sanity-check value only; the parent's Entry order is authoritative.
/// `pad_seed` drives both the leading pad length and the random filler
/// bytes, so framing the same payload twice with different seeds
/// yields different ciphertext-independent layouts.
pub fn frame(index: u8, payload: &[u8], block_size: usize, pad_seed: u32) -> Result<Framed> {
    if payload.len() > max_payload(block_size) {
        return Err(Error::Integrity(format!(
            "payload of {} bytes exceeds node capacity of {} bytes",
            payload.len(),
            max_payload(block_size)
        )));
    }
    let max_pad = max_payload(block_size) - payload.len();
    let pad_len = if max_pad == 0 {
        0
    } else {
        *crate::random::rand_numbers(1, pad_seed, 0, max_pad as i64)
            .first()
            .expect("rand_numbers(1, ..) always yields one value") as usize
    };
    let start = 1 + pad_len;

    let mut bytes = rand_bytes(block_size, pad_seed.wrapping_add(1), 0, 255);
    bytes[0] = index;
    bytes[start..start + payload.len()].copy_from_slice(payload);

    Ok(Framed {
        bytes,
        start: start as u16,
    })
}

/// Slice the payload back out of a decrypted block.
pub fn unframe(block: &[u8], start: u16, length: u16) -> Result<&[u8]> {
    let start = start as usize;
    let length = length as usize;
    block
        .get(start..start + length)
        .ok_or_else(|| Error::Integrity("node payload slice out of bounds".into()))
}

/// Read back the ordinal index byte. Not authoritative — the parent
/// Black node's Entry order is — but available for the sanity checks
/// spec §3 describes.
pub fn read_index(block: &[u8]) -> Result<u8> {
    block
        .first()
        .copied()
        .ok_or_else(|| Error::Integrity("empty node block".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_unframe_round_trips_payload() {
        let payload = b"some object bytes";
        let framed = frame(3, payload, 4096, 123).unwrap();
        assert_eq!(framed.bytes.len(), 4096);
        let back = unframe(&framed.bytes, framed.start, payload.len() as u16).unwrap();
        assert_eq!(back, payload);
        assert_eq!(read_index(&framed.bytes).unwrap(), 3);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; 5000];
        assert!(frame(0, &payload, 4096, 1).is_err());
    }

    #[test]
    fn payload_at_exact_capacity_fits() {
        let payload = vec![7u8; max_payload(4096)];
        let framed = frame(0, &payload, 4096, 9).unwrap();
        assert_eq!(framed.start, 1);
        let back = unframe(&framed.bytes, framed.start, payload.len() as u16).unwrap();
        assert_eq!(back, payload.as_slice());
    }

    #[test]
    fn zero_length_payload_frames_cleanly() {
        let framed = frame(0, &[], 4096, 55).unwrap();
        let back = unframe(&framed.bytes, framed.start, 0).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn index_wraps_modulo_256_as_a_plain_byte() {
        let framed = frame(255, b"x", 4096, 7).unwrap();
        assert_eq!(read_index(&framed.bytes).unwrap(), 255);
    }
}
