//! Fixed 2 KB circular buffer backing a socket's TX or RX memory.
//!
//! The ring stores bytes only. Producer and consumer offsets live in the
//! socket registers (plus the engine's private RX write index); every offset
//! is masked before use so out-of-range pointers can never index past the
//! buffer.

/// Ring capacity in bytes. Must stay a power of two.
pub const RING_SIZE: usize = 2048;
/// Offset mask for [`RING_SIZE`].
pub const RING_MASK: u16 = (RING_SIZE - 1) as u16;

/// Bytes between `from` and `to`, walking forward around the ring.
#[inline(always)]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from) & RING_MASK
}

pub struct Ring {
    buf: Vec<u8>,
}

impl Ring {
    pub fn new() -> Self {
        Ring { buf: vec![0u8; RING_SIZE] }
    }

    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    #[inline(always)]
    pub fn get(&self, offset: u16) -> u8 {
        self.buf[(offset & RING_MASK) as usize]
    }

    #[inline(always)]
    pub fn set(&mut self, offset: u16, value: u8) {
        self.buf[(offset & RING_MASK) as usize] = value;
    }

    /// Copy `len` bytes starting at `start`, wrapping at the end.
    pub fn copy_out(&self, start: u16, len: usize) -> Vec<u8> {
        let start = (start & RING_MASK) as usize;
        let len = len.min(RING_SIZE);
        let first = len.min(RING_SIZE - start);
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.buf[start..start + first]);
        out.extend_from_slice(&self.buf[..len - first]);
        out
    }

    /// Copy `data` in starting at `start`, wrapping at the end.
    /// Returns the offset just past the last byte written.
    pub fn copy_in(&mut self, start: u16, data: &[u8]) -> u16 {
        let start = (start & RING_MASK) as usize;
        let data = &data[..data.len().min(RING_SIZE)];
        let first = data.len().min(RING_SIZE - start);
        self.buf[start..start + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);
        ((start + data.len()) as u16) & RING_MASK
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Replace the contents from a save state; short input is zero-filled.
    pub fn load(&mut self, data: &[u8]) {
        self.clear();
        let n = data.len().min(RING_SIZE);
        self.buf[..n].copy_from_slice(&data[..n]);
    }
}

impl Default for Ring {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_wraps() {
        assert_eq!(distance(0, 3), 3);
        assert_eq!(distance(0x7FE, 0x001), 3);
        assert_eq!(distance(5, 5), 0);
    }

    #[test]
    fn test_copy_in_wraps() {
        let mut ring = Ring::new();
        let next = ring.copy_in(0x7FE, &[1, 2, 3, 4]);
        assert_eq!(next, 2);
        assert_eq!(ring.get(0x7FE), 1);
        assert_eq!(ring.get(0x7FF), 2);
        assert_eq!(ring.get(0), 3);
        assert_eq!(ring.get(1), 4);
        assert_eq!(ring.copy_out(0x7FE, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_offsets_are_masked() {
        let mut ring = Ring::new();
        ring.set(0x0805, 0xAA);
        assert_eq!(ring.get(5), 0xAA);
        assert_eq!(ring.get(0xF805), 0xAA);
    }

    #[test]
    fn test_full_ring_copy() {
        let mut ring = Ring::new();
        let data: Vec<u8> = (0..RING_SIZE).map(|i| i as u8).collect();
        assert_eq!(ring.copy_in(100, &data), 100);
        assert_eq!(ring.copy_out(100, RING_SIZE), data);
    }
}
