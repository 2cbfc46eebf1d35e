//! W5500 framing: `addr_hi, addr_lo, control, data...`.
//!
//! Control byte layout:
//!
//! ```text
//!   7..3  block select (index into REGION_BASE)
//!   2     1 = write, 0 = read
//!   1..0  operating mode (variable length only)
//! ```
//!
//! Reads stream from `base + addr`: the value for the first data byte is
//! requested when the control byte arrives, and each data byte then
//! requests the following address. Writes are buffered and reach memory
//! only when SS goes high, so a burst aborted before its first data byte
//! has no effect.
//!
//! Inside a TX or RX block the offset wraps at the ring size, so a burst
//! that runs past 0x7FF continues at offset 0 of the same socket's ring.

use log::trace;

use super::RouterOp;
use crate::socket::ring::RING_MASK;

pub const CTRL_WRITE: u8 = 0x04;
/// Longest write burst kept; extra bytes are discarded.
pub const MAX_BURST: usize = 2048;

/// Reserved block selects map here, outside every routed region.
const RESERVED: u32 = 0x9000;

const fn socket_reg(n: u32) -> u32 { 0x0400 + n * 0x100 }
const fn socket_tx(n: u32) -> u32 { 0x4000 + n * 0x800 }
const fn socket_rx(n: u32) -> u32 { 0x6000 + n * 0x800 }

/// Block select → flat base address.
pub const REGION_BASE: [u32; 32] = [
    0x0000,       socket_reg(0), socket_tx(0), socket_rx(0),
    RESERVED,     socket_reg(1), socket_tx(1), socket_rx(1),
    RESERVED,     socket_reg(2), socket_tx(2), socket_rx(2),
    RESERVED,     socket_reg(3), socket_tx(3), socket_rx(3),
    RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED,
    RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED, RESERVED,
];

/// True for the TX and RX blocks of sockets 0-3.
fn is_ring_block(block: u8) -> bool {
    block < 16 && block & 0x02 != 0
}

/// Flat address of `addr` inside a block.
pub fn block_addr(block: u8, addr: u16) -> u32 {
    let base = REGION_BASE[(block & 0x1F) as usize];
    if is_ring_block(block) {
        base + (addr & RING_MASK) as u32
    } else {
        base + addr as u32
    }
}

/// Control byte for a block select and direction.
pub fn control_byte(block: u8, write: bool) -> u8 {
    ((block & 0x1F) << 3) | if write { CTRL_WRITE } else { 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum W5500State {
    AddrHi,
    AddrLo { hi: u8 },
    Control { addr: u16 },
    /// `addr` is the offset of the next byte to request.
    Reading { block: u8, addr: u16 },
    Writing { block: u8, addr: u16 },
}

pub struct W5500Decoder {
    state: W5500State,
    buffer: Vec<u8>,
}

impl W5500Decoder {
    pub fn new() -> Self {
        W5500Decoder { state: W5500State::AddrHi, buffer: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.state = W5500State::AddrHi;
        self.buffer.clear();
    }

    pub fn state(&self) -> W5500State {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == W5500State::AddrHi
    }

    pub fn decode(&mut self, byte: u8) -> Option<RouterOp> {
        match self.state {
            W5500State::AddrHi => {
                self.state = W5500State::AddrLo { hi: byte };
                None
            }
            W5500State::AddrLo { hi } => {
                self.state = W5500State::Control { addr: u16::from_be_bytes([hi, byte]) };
                None
            }
            W5500State::Control { addr } => {
                let block = (byte >> 3) & 0x1F;
                if byte & CTRL_WRITE != 0 {
                    self.buffer.clear();
                    self.state = W5500State::Writing { block, addr };
                    None
                } else {
                    self.state = W5500State::Reading { block, addr: addr.wrapping_add(1) };
                    Some(RouterOp::Read { addr: block_addr(block, addr) })
                }
            }
            W5500State::Reading { block, addr } => {
                self.state = W5500State::Reading { block, addr: addr.wrapping_add(1) };
                Some(RouterOp::Read { addr: block_addr(block, addr) })
            }
            W5500State::Writing { block, addr } => {
                if self.buffer.len() < MAX_BURST {
                    self.buffer.push(byte);
                } else {
                    trace!("w5500: burst to block {} at 0x{:04X} over {} bytes, byte dropped",
                        block, addr, MAX_BURST);
                }
                None
            }
        }
    }

    /// End of transaction. A write burst with data is flushed as one op.
    pub fn deselect(&mut self) -> Option<RouterOp> {
        let op = match self.state {
            W5500State::Writing { block, addr } if !self.buffer.is_empty() => Some(RouterOp::Burst {
                addr: block_addr(block, addr),
                data: std::mem::take(&mut self.buffer),
            }),
            W5500State::AddrHi => None,
            other => {
                trace!("w5500: transaction ended in {:?}", other);
                None
            }
        };
        self.reset();
        op
    }
}

impl Default for W5500Decoder {
    fn default() -> Self { Self::new() }
}
