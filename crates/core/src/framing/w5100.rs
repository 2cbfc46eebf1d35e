//! W5100 framing: `opcode, addr_hi, addr_lo, data`.
//!
//! Opcode 0xF0 writes the data byte, 0x0F reads. On a read the addressed
//! value is requested as soon as the address is complete, so it is already
//! primed when the master clocks the data byte. Any other opcode is
//! ignored and the decoder keeps waiting for an opcode.

use log::trace;

use super::RouterOp;

pub const OP_WRITE: u8 = 0xF0;
pub const OP_READ: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum W5100State {
    Idle,
    AddrHi { write: bool },
    AddrLo { write: bool, hi: u8 },
    Data { write: bool, addr: u16 },
}

pub struct W5100Decoder {
    state: W5100State,
}

impl W5100Decoder {
    pub fn new() -> Self {
        W5100Decoder { state: W5100State::Idle }
    }

    pub fn reset(&mut self) {
        self.state = W5100State::Idle;
    }

    pub fn state(&self) -> W5100State {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == W5100State::Idle
    }

    pub fn decode(&mut self, byte: u8) -> Option<RouterOp> {
        match self.state {
            W5100State::Idle => {
                self.state = match byte {
                    OP_WRITE => W5100State::AddrHi { write: true },
                    OP_READ => W5100State::AddrHi { write: false },
                    _ => {
                        trace!("w5100: ignored opcode 0x{:02X}", byte);
                        W5100State::Idle
                    }
                };
                None
            }
            W5100State::AddrHi { write } => {
                self.state = W5100State::AddrLo { write, hi: byte };
                None
            }
            W5100State::AddrLo { write, hi } => {
                let addr = u16::from_be_bytes([hi, byte]);
                self.state = W5100State::Data { write, addr };
                if write {
                    None
                } else {
                    Some(RouterOp::Read { addr: addr as u32 })
                }
            }
            W5100State::Data { write, addr } => {
                self.state = W5100State::Idle;
                if write {
                    Some(RouterOp::Write { addr: addr as u32, value: byte })
                } else {
                    None
                }
            }
        }
    }

    /// A transaction cut short by SS going high is dropped.
    pub fn deselect(&mut self) -> Option<RouterOp> {
        if self.state != W5100State::Idle {
            trace!("w5100: transaction aborted in {:?}", self.state);
        }
        self.state = W5100State::Idle;
        None
    }
}

impl Default for W5100Decoder {
    fn default() -> Self { Self::new() }
}
