//! SPI slave bit sampler.
//!
//! Samples SS/SCK/MOSI once per step and shifts bits MSB first. On every
//! rising SCK edge the MOSI level is shifted into the receive accumulator and
//! the transmit shift register moves one bit left. MISO is only updated while
//! SCK is low, so the level is stable at the master's sampling edge.
//!
//! The sampler knows nothing about chip semantics: after eight edges it
//! publishes a byte and the transaction layer picks it up with
//! [`SpiSlave::get_byte`].

use crate::bus::BusPins;

pub struct SpiSlave {
    /// Bits shifted in so far for the current byte
    bits_in: u8,
    /// Transmit shift register (top bit drives MISO)
    shift_out: u8,
    /// Rising edges seen for the current byte (0-7)
    bit_count: u8,
    /// SCK level at the previous step
    last_sck: bool,
    /// Byte primed by the transaction layer for the next transfer
    data_out: u8,
    /// Last fully received byte
    data: u8,
    data_ready: bool,
    selected: bool,
}

impl SpiSlave {
    pub fn new() -> Self {
        SpiSlave {
            bits_in: 0,
            shift_out: 0,
            bit_count: 0,
            last_sck: false,
            data_out: 0,
            data: 0,
            data_ready: false,
            selected: false,
        }
    }

    pub fn reset(&mut self) {
        *self = SpiSlave::new();
    }

    /// Advance one step using the current line levels. Drives `pins.miso`.
    pub fn step(&mut self, pins: &mut BusPins) {
        self.selected = pins.is_selected();
        if !self.selected {
            self.bits_in = 0;
            self.bit_count = 0;
            self.shift_out = self.data_out;
            self.last_sck = false;
            return;
        }

        let sck = pins.sck;
        if sck && !self.last_sck {
            // Rising edge: sample MOSI, advance the transmit register
            self.bits_in = (self.bits_in << 1) | pins.mosi as u8;
            self.shift_out <<= 1;
            self.bit_count += 1;
        } else if !sck {
            if self.bit_count == 0 {
                self.shift_out = self.data_out;
            }
            pins.miso = self.shift_out & 0x80 != 0;
        }
        self.last_sck = sck;

        if self.bit_count == 8 {
            self.data = self.bits_in;
            self.bits_in = 0;
            self.bit_count = 0;
            self.data_ready = true;
        }
    }

    /// SS state seen at the last step.
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_data_ready(&self) -> bool {
        self.data_ready
    }

    /// Consume the received byte and clear the ready flag.
    pub fn get_byte(&mut self) -> u8 {
        self.data_ready = false;
        self.data
    }

    /// Prime the byte shifted out during the next transfer.
    pub fn set_output_byte(&mut self, value: u8) {
        self.data_out = value;
    }
}

impl Default for SpiSlave {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clock one byte in, returning the MISO bits sampled while SCK was low.
    fn clock_byte(spi: &mut SpiSlave, pins: &mut BusPins, byte: u8) -> u8 {
        let mut miso = 0u8;
        for bit in (0..8).rev() {
            pins.sck = false;
            pins.mosi = (byte >> bit) & 1 != 0;
            spi.step(pins);
            miso = (miso << 1) | pins.miso as u8;
            pins.sck = true;
            spi.step(pins);
        }
        pins.sck = false;
        miso
    }

    #[test]
    fn test_assembles_msb_first() {
        let mut spi = SpiSlave::new();
        let mut pins = BusPins::new();
        pins.ss = false;
        for &byte in &[0xA5u8, 0x01, 0x80, 0xFF, 0x00] {
            clock_byte(&mut spi, &mut pins, byte);
            assert!(spi.is_data_ready());
            assert_eq!(spi.get_byte(), byte);
            assert!(!spi.is_data_ready());
        }
    }

    #[test]
    fn test_ready_once_per_eight_edges() {
        let mut spi = SpiSlave::new();
        let mut pins = BusPins::new();
        pins.ss = false;
        let mut ready_count = 0;
        for edge in 0..24 {
            pins.sck = false;
            pins.mosi = edge % 3 == 0;
            spi.step(&mut pins);
            pins.sck = true;
            spi.step(&mut pins);
            if spi.is_data_ready() {
                spi.get_byte();
                ready_count += 1;
                assert_eq!(edge % 8, 7);
            }
        }
        assert_eq!(ready_count, 3);
    }

    #[test]
    fn test_level_without_edge_is_ignored() {
        let mut spi = SpiSlave::new();
        let mut pins = BusPins::new();
        pins.ss = false;
        pins.sck = true;
        for _ in 0..16 {
            spi.step(&mut pins);
        }
        // Only the first high sample counts as an edge
        assert!(!spi.is_data_ready());
        assert_eq!(spi.bit_count, 1);
    }

    #[test]
    fn test_shifts_out_primed_byte() {
        let mut spi = SpiSlave::new();
        let mut pins = BusPins::new();
        spi.set_output_byte(0xC3);
        pins.ss = false;
        assert_eq!(clock_byte(&mut spi, &mut pins, 0x00), 0xC3);
    }

    #[test]
    fn test_deselect_discards_partial_byte() {
        let mut spi = SpiSlave::new();
        let mut pins = BusPins::new();
        pins.ss = false;
        for _ in 0..5 {
            pins.sck = false;
            pins.mosi = true;
            spi.step(&mut pins);
            pins.sck = true;
            spi.step(&mut pins);
        }
        pins.ss = true;
        pins.sck = false;
        spi.step(&mut pins);
        assert!(!spi.is_selected());
        pins.ss = false;
        clock_byte(&mut spi, &mut pins, 0x12);
        assert_eq!(spi.get_byte(), 0x12);
    }
}
