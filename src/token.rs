//! Token codec: the access token is the only handle to a stored object.
//! It packs the root [`Entry`]'s fields, RCA-masks them with a
//! time-seeded nonce, and encodes the result with a custom 64-symbol,
//! 6-bit-per-character alphabet.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::buffer::ByteBuffer;
use crate::entry::{ENTRY_SIZE, Entry, Kind};
use crate::error::{Error, Result};
use crate::rca::Rca;

const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789*-";

const NONCE_PREFIX_LEN: usize = 12;
/// The token packs only the root Entry's *variable* fields — `bitmap`,
/// `start`, `length`, `seed`, `level` — 15 bytes. `kind` is not one of
/// them: the root of a tree is always a Black node, so it is implicit
/// and never carried in the token.
const ROOT_FIELDS_SIZE: usize = ENTRY_SIZE - 1;
/// 15 bytes packed at 6 bits/char is exactly 20 characters with no
/// padding (120 bits / 6). Total token length is fixed: `12 + 20 == 32`.
const ENTRY_CHARS_LEN: usize = (ROOT_FIELDS_SIZE * 8).div_ceil(6);
pub const TOKEN_LEN: usize = NONCE_PREFIX_LEN + ENTRY_CHARS_LEN;

/// An opaque handle to one stored object: the root Entry of its tree,
/// serialized and obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub root: Entry,
}

impl Token {
    pub fn new(root: Entry) -> Self {
        Token { root }
    }

    /// `nonce` is the encryption seed for this token only (the wall
    /// clock at generation, truncated to the 32-bit width the RCA takes
    /// — the original source narrows a `u64` `time(nullptr)` the same
    /// way; two tokens minted for distinct Entries within the same
    /// second do not collide because the Entries themselves differ).
    pub fn encode(&self, nonce: u64) -> String {
        let bytes = pack_root_fields(&self.root);
        debug_assert_eq!(bytes.len(), ROOT_FIELDS_SIZE);

        let masked = ByteBuffer::from_bytes(bytes);
        Rca::new(nonce as u32, masked.len()).forward(&masked);
        let entry_chars = encode_6bit(&masked.read_all());

        // '=' is not in the URL-adjacent token alphabet; substitute it
        // with '_' the way the rest of the token avoids '='/'+'.
        let nonce_b64 = BASE64.encode(nonce.to_le_bytes()).replace('=', "_");

        let mut token = nonce_b64;
        token.push_str(&entry_chars);
        token
    }

    pub fn to_string_token(&self) -> String {
        self.encode(unix_time_now())
    }

    pub fn parse(token: &str) -> Result<Self> {
        if token.len() != TOKEN_LEN {
            return Err(Error::MalformedToken(format!(
                "expected {TOKEN_LEN} characters, got {}",
                token.len()
            )));
        }
        if !token.is_ascii() {
            return Err(Error::MalformedToken("token is not ASCII".into()));
        }

        let (nonce_part, entry_part) = token.split_at(NONCE_PREFIX_LEN);

        // A literal '*' in the Entry portion is a historical sentinel
        // for failed token generation — reject outright, before
        // decoding or touching the filesystem at all.
        if entry_part.contains('*') {
            return Err(Error::MalformedToken(
                "entry portion contains the failed-generation sentinel '*'".into(),
            ));
        }

        let nonce_b64: String = nonce_part.chars().map(|c| if c == '_' { '=' } else { c }).collect();
        let nonce_bytes = BASE64
            .decode(&nonce_b64)
            .map_err(|e| Error::MalformedToken(format!("bad nonce prefix: {e}")))?;
        if nonce_bytes.len() != 8 {
            return Err(Error::MalformedToken("nonce did not decode to 8 bytes".into()));
        }
        let nonce = u64::from_le_bytes(nonce_bytes.try_into().unwrap());

        let masked_bytes = decode_6bit(entry_part, ROOT_FIELDS_SIZE)?;
        let masked = ByteBuffer::from_bytes(masked_bytes);
        Rca::new(nonce as u32, masked.len()).backward(&masked);
        let root = unpack_root_fields(&masked.read_all())?;
        Ok(Token { root })
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_token())
    }
}

/// Pack the root Entry's variable fields — everything but `kind`, which
/// is implicit (always Black) for a root — into 15 little-endian bytes.
fn pack_root_fields(entry: &Entry) -> Vec<u8> {
    let mut out = Vec::with_capacity(ROOT_FIELDS_SIZE);
    out.extend_from_slice(&entry.bitmap.to_le_bytes());
    out.extend_from_slice(&entry.start.to_le_bytes());
    out.extend_from_slice(&entry.length.to_le_bytes());
    out.extend_from_slice(&entry.seed.to_le_bytes());
    out.push(entry.level);
    out
}

fn unpack_root_fields(bytes: &[u8]) -> Result<Entry> {
    if bytes.len() != ROOT_FIELDS_SIZE {
        return Err(Error::MalformedToken(format!(
            "unpacked {} bytes, expected {ROOT_FIELDS_SIZE}",
            bytes.len()
        )));
    }
    let bitmap = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let start = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
    let length = u16::from_le_bytes(bytes[10..12].try_into().unwrap());
    let seed = u16::from_le_bytes(bytes[12..14].try_into().unwrap());
    let level = bytes[14];
    Ok(Entry {
        bitmap,
        kind: Kind::Black,
        start,
        length,
        seed,
        level,
    })
}

fn unix_time_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

fn alphabet_index(c: u8) -> Option<u8> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u8)
}

fn encode_6bit(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(6));
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        acc = (acc << 8) | byte as u32;
        bits += 8;
        while bits >= 6 {
            bits -= 6;
            let index = (acc >> bits) & 0x3F;
            out.push(ALPHABET[index as usize] as char);
        }
    }
    if bits > 0 {
        let index = (acc << (6 - bits)) & 0x3F;
        out.push(ALPHABET[index as usize] as char);
    }
    out
}

fn decode_6bit(s: &str, expected_bytes: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_bytes);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for c in s.bytes() {
        let index = alphabet_index(c)
            .ok_or_else(|| Error::MalformedToken(format!("character '{}' is not in the token alphabet", c as char)))?;
        acc = (acc << 6) | index as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xFF) as u8);
        }
    }
    if out.len() != expected_bytes {
        return Err(Error::MalformedToken(format!(
            "decoded {} bytes, expected {expected_bytes}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> Entry {
        Entry {
            bitmap: 0xdead_beef_0012_3456,
            kind: Kind::Black,
            start: 17,
            length: 4000,
            seed: 5555,
            level: 2,
        }
    }

    #[test]
    fn round_trips_through_a_fixed_nonce() {
        let token = Token::new(sample_entry());
        let encoded = token.encode(1_700_000_123);
        assert_eq!(encoded.len(), TOKEN_LEN);
        let decoded = Token::parse(&encoded).unwrap();
        assert_eq!(decoded.root, token.root);
    }

    #[test]
    fn token_length_is_exactly_32() {
        assert_eq!(TOKEN_LEN, 32);
    }

    #[test]
    fn out_of_alphabet_character_in_entry_portion_is_rejected() {
        let token = Token::new(sample_entry());
        let mut encoded = token.encode(42);
        let mut chars: Vec<char> = encoded.chars().collect();
        chars[15] = '!'; // not a member of the 64-symbol token alphabet
        encoded = chars.into_iter().collect();
        let err = Token::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)));
    }

    #[test]
    fn any_star_in_the_entry_portion_is_rejected_as_a_sentinel() {
        // §6: any token containing '*' in the Entry portion is malformed
        // — '*' is a legitimate alphabet symbol, so this must be an
        // explicit check, not an accidental decode failure.
        let token = Token::new(sample_entry());
        let mut encoded = token.encode(42);
        let mut chars: Vec<char> = encoded.chars().collect();
        let mid = NONCE_PREFIX_LEN + 3;
        chars[mid] = '*';
        encoded = chars.into_iter().collect();
        let err = Token::parse(&encoded).unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)));
    }

    #[test]
    fn star_in_the_nonce_portion_is_not_rejected_as_a_sentinel() {
        // '*' is not part of the base64 alphabet used for the nonce, so
        // it can only ever legitimately appear in the entry portion; a
        // nonce-portion '*' should fail base64 decoding, not the
        // sentinel check.
        let token = Token::new(sample_entry());
        let encoded = token.encode(42);
        let mut chars: Vec<char> = encoded.chars().collect();
        chars[0] = '*';
        let mutated: String = chars.into_iter().collect();
        assert!(Token::parse(&mutated).is_err());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Token::parse("short").unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)));
    }
}
