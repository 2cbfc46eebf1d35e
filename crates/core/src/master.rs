//! Bit-banging bus master.
//!
//! Drives a [`WiznetChip`] through its four lines exactly as a
//! microcontroller would: mode 0, MSB first, one chip step per clock
//! level. MISO is sampled while SCK is low, before the rising edge.

use crate::framing::w5100::{OP_READ, OP_WRITE};
use crate::framing::w5500::control_byte;
use crate::{ChipModel, WiznetChip};

pub struct SpiMaster<'a> {
    chip: &'a mut WiznetChip,
}

impl<'a> SpiMaster<'a> {
    pub fn new(chip: &'a mut WiznetChip) -> Self {
        SpiMaster { chip }
    }

    /// Pull SS low.
    pub fn select(&mut self) {
        let pins = self.chip.pins_mut();
        pins.ss = false;
        pins.sck = false;
        self.chip.step();
    }

    /// Release SS.
    pub fn deselect(&mut self) {
        let pins = self.chip.pins_mut();
        pins.ss = true;
        pins.sck = false;
        self.chip.step();
    }

    /// Exchange one byte.
    pub fn transfer(&mut self, out: u8) -> u8 {
        let mut miso = 0u8;
        for bit in (0..8).rev() {
            let pins = self.chip.pins_mut();
            pins.sck = false;
            pins.mosi = (out >> bit) & 1 != 0;
            self.chip.step();
            miso = (miso << 1) | self.chip.pins().miso as u8;
            self.chip.pins_mut().sck = true;
            self.chip.step();
        }
        self.chip.pins_mut().sck = false;
        miso
    }

    pub fn write_5100(&mut self, addr: u16, value: u8) {
        let [hi, lo] = addr.to_be_bytes();
        self.select();
        for b in [OP_WRITE, hi, lo, value] {
            self.transfer(b);
        }
        self.deselect();
    }

    pub fn read_5100(&mut self, addr: u16) -> u8 {
        let [hi, lo] = addr.to_be_bytes();
        self.select();
        for b in [OP_READ, hi, lo] {
            self.transfer(b);
        }
        let value = self.transfer(0);
        self.deselect();
        value
    }

    /// One variable-length write burst to `block`.
    pub fn write_5500(&mut self, addr: u16, block: u8, data: &[u8]) {
        let [hi, lo] = addr.to_be_bytes();
        self.select();
        for b in [hi, lo, control_byte(block, true)] {
            self.transfer(b);
        }
        for &b in data {
            self.transfer(b);
        }
        self.deselect();
    }

    /// One variable-length read burst from `block`.
    pub fn read_5500(&mut self, addr: u16, block: u8, len: usize) -> Vec<u8> {
        let [hi, lo] = addr.to_be_bytes();
        self.select();
        for b in [hi, lo, control_byte(block, false)] {
            self.transfer(b);
        }
        let data = (0..len).map(|_| self.transfer(0)).collect();
        self.deselect();
        data
    }

    /// Write bytes at a flat address using the chip's own framing.
    ///
    /// On the W5500 this is block 0, whose base of zero makes every flat
    /// address reachable.
    pub fn write(&mut self, addr: u16, data: &[u8]) {
        match self.chip.model() {
            ChipModel::W5100 => {
                for (i, &b) in data.iter().enumerate() {
                    self.write_5100(addr.wrapping_add(i as u16), b);
                }
            }
            ChipModel::W5500 => self.write_5500(addr, 0, data),
        }
    }

    /// Read bytes at a flat address using the chip's own framing.
    pub fn read(&mut self, addr: u16, len: usize) -> Vec<u8> {
        match self.chip.model() {
            ChipModel::W5100 => (0..len)
                .map(|i| self.read_5100(addr.wrapping_add(i as u16)))
                .collect(),
            ChipModel::W5500 => self.read_5500(addr, 0, len),
        }
    }

    pub fn write_u8(&mut self, addr: u16, value: u8) {
        self.write(addr, &[value]);
    }

    pub fn read_u8(&mut self, addr: u16) -> u8 {
        self.read(addr, 1).first().copied().unwrap_or(0)
    }

    /// Big-endian 16-bit register write.
    pub fn write_u16(&mut self, addr: u16, value: u16) {
        self.write(addr, &value.to_be_bytes());
    }

    pub fn read_u16(&mut self, addr: u16) -> u16 {
        let b = self.read(addr, 2);
        u16::from_be_bytes([b[0], b[1]])
    }

    /// Run the chip with SS high, letting sockets poll their host resources.
    pub fn idle(&mut self, steps: usize) {
        self.chip.pins_mut().ss = true;
        for _ in 0..steps {
            self.chip.step();
        }
    }
}
