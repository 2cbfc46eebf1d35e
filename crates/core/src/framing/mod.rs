//! Transaction framing.
//!
//! The bus sampler hands over whole bytes; a decoder turns them into
//! router operations according to the chip model's framing. The model is
//! fixed when the chip is created.
//!
//! - [`w5100`]: one data byte per transaction, opcode first
//! - [`w5500`]: address, control byte, then an unbounded burst

pub mod w5100;
pub mod w5500;

use crate::ChipModel;
use w5100::W5100Decoder;
use w5500::W5500Decoder;

/// Memory access requested by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterOp {
    /// Read one byte; the value becomes the next byte shifted out.
    Read { addr: u32 },
    Write { addr: u32, value: u8 },
    /// Consecutive writes starting at `addr`. A burst that starts in a ring
    /// stays in that ring and wraps at its end.
    Burst { addr: u32, data: Vec<u8> },
}

pub enum Decoder {
    W5100(W5100Decoder),
    W5500(W5500Decoder),
}

impl Decoder {
    pub fn new(model: ChipModel) -> Self {
        match model {
            ChipModel::W5100 => Decoder::W5100(W5100Decoder::new()),
            ChipModel::W5500 => Decoder::W5500(W5500Decoder::new()),
        }
    }

    /// Feed one received byte.
    pub fn decode(&mut self, byte: u8) -> Option<RouterOp> {
        match self {
            Decoder::W5100(d) => d.decode(byte),
            Decoder::W5500(d) => d.decode(byte),
        }
    }

    /// SS went high. Returns a buffered write that completes on deselect.
    pub fn deselect(&mut self) -> Option<RouterOp> {
        match self {
            Decoder::W5100(d) => d.deselect(),
            Decoder::W5500(d) => d.deselect(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Decoder::W5100(d) => d.reset(),
            Decoder::W5500(d) => d.reset(),
        }
    }

    /// True between transactions.
    pub fn is_idle(&self) -> bool {
        match self {
            Decoder::W5100(d) => d.is_idle(),
            Decoder::W5500(d) => d.is_idle(),
        }
    }
}
