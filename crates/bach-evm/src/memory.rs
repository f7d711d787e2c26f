//! EVM memory implementation

use bach_crypto::U256;

/// Byte-addressable memory, grown in 32-byte words.
///
/// Callers charge expansion gas and call `resize` before any access, so
/// reads and writes never go out of bounds.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create new empty memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been allocated
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow to `size` bytes rounded up to a word; never shrinks
    pub fn resize(&mut self, size: usize) {
        let aligned = size.div_ceil(32) * 32;
        if aligned > self.data.len() {
            self.data.resize(aligned, 0);
        }
    }

    /// Load a 32-byte word
    pub fn load(&self, offset: usize) -> U256 {
        U256::from_big_endian(&self.data[offset..offset + 32])
    }

    /// Store a 32-byte word
    pub fn store(&mut self, offset: usize, value: U256) {
        value.to_big_endian(&mut self.data[offset..offset + 32]);
    }

    /// Store a single byte
    pub fn store8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Copy of `size` bytes starting at `offset`
    pub fn slice(&self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.data[offset..offset + size].to_vec()
    }

    /// Write `size` bytes at `offset` from `source[src_offset..]`, zero-padding past its end
    pub fn set_padded(&mut self, offset: usize, size: usize, source: &[u8], src_offset: U256) {
        if size == 0 {
            return;
        }
        let target = &mut self.data[offset..offset + size];
        target.fill(0);
        if src_offset >= U256::from(source.len()) {
            return;
        }
        let start = src_offset.low_u64() as usize;
        let available = (source.len() - start).min(size);
        target[..available].copy_from_slice(&source[start..start + available]);
    }

    /// Raw contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
