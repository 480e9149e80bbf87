//! Length-addressable, shared-ownership byte buffer.
//!
//! Mirrors the original implementation's `Binary` type: cloning a
//! [`ByteBuffer`] shares the same backing storage, and equality is
//! *identity* of that storage, not content. Callers that need an
//! independent copy call [`ByteBuffer::deep_clone`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Clone)]
pub struct ByteBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl ByteBuffer {
    pub fn zeroed(size: usize) -> Self {
        ByteBuffer {
            inner: Arc::new(Mutex::new(vec![0u8; size])),
        }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        ByteBuffer {
            inner: Arc::new(Mutex::new(data.into())),
        }
    }

    pub fn from_ascii(s: &str) -> Self {
        ByteBuffer::from_bytes(s.as_bytes().to_vec())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() % 2 != 0 {
            return Err(Error::Integrity("hex string has odd length".into()));
        }
        let mut out = Vec::with_capacity(s.len() / 2);
        let bytes = s.as_bytes();
        for chunk in bytes.chunks(2) {
            let hi = hex_val(chunk[0])?;
            let lo = hex_val(chunk[1])?;
            out.push((hi << 4) | lo);
        }
        Ok(ByteBuffer::from_bytes(out))
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(s)
            .map_err(|e| Error::Integrity(format!("invalid base64: {e}")))?;
        Ok(ByteBuffer::from_bytes(bytes))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.inner.lock().get(index).copied()
    }

    pub fn set(&self, index: usize, value: u8) -> bool {
        let mut guard = self.inner.lock();
        match guard.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copy out `[index, index + len)`, clamped to the buffer's length.
    /// Returns an empty vec if `index` is out of bounds.
    pub fn read_slice(&self, index: usize, len: usize) -> Vec<u8> {
        let guard = self.inner.lock();
        if index >= guard.len() {
            return Vec::new();
        }
        let end = (index + len).min(guard.len());
        guard[index..end].to_vec()
    }

    pub fn read_all(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Write `data` at `index`. Returns `false` (no-op) if it would run
    /// past the end of the buffer.
    pub fn write_slice(&self, index: usize, data: &[u8]) -> bool {
        let mut guard = self.inner.lock();
        if index + data.len() > guard.len() {
            return false;
        }
        guard[index..index + data.len()].copy_from_slice(data);
        true
    }

    pub fn append(&self, data: &[u8]) {
        self.inner.lock().extend_from_slice(data);
    }

    pub fn resize(&self, size: usize) {
        self.inner.lock().resize(size, 0);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Pointwise XOR against another buffer of the same length, in place.
    pub fn xor_with(&self, other: &ByteBuffer) -> Result<()> {
        let mut guard = self.inner.lock();
        let other_guard = other.inner.lock();
        if guard.len() != other_guard.len() {
            return Err(Error::Integrity(
                "xor_with requires equal-length buffers".into(),
            ));
        }
        for (a, b) in guard.iter_mut().zip(other_guard.iter()) {
            *a ^= b;
        }
        Ok(())
    }

    pub fn to_hex(&self) -> String {
        let guard = self.inner.lock();
        let mut s = String::with_capacity(guard.len() * 2);
        for b in guard.iter() {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    pub fn to_ascii_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&*self.inner.lock())
    }

    /// An independent copy that does not share storage with `self`.
    pub fn deep_clone(&self) -> Self {
        ByteBuffer::from_bytes(self.inner.lock().clone())
    }
}

impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for ByteBuffer {}

impl std::fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer").field("len", &self.len()).finish()
    }
}

fn hex_val(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Integrity(format!("invalid hex digit: {}", c as char))),
    }
}
