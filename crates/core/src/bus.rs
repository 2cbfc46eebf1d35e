//! Serial bus line levels.
//!
//! The chip has four bus lines: SS (slave select, active low), SCK, MOSI
//! and MISO. The environment writes the three input levels before calling
//! [`WiznetChip::step`](crate::WiznetChip::step) and reads MISO back
//! afterwards. No callbacks: everything is polled once per step.

/// One of the four serial bus lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Slave select (input, active low)
    Ss,
    /// Serial clock (input)
    Sck,
    /// Master out, slave in (input)
    Mosi,
    /// Master in, slave out (output)
    Miso,
}

/// Current logic level of each bus line (`true` = high).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusPins {
    pub ss: bool,
    pub sck: bool,
    pub mosi: bool,
    pub miso: bool,
}

impl BusPins {
    /// Power-on levels: SS pulled high (deselected), clock idle low.
    pub fn new() -> Self {
        BusPins { ss: true, sck: false, mosi: false, miso: false }
    }

    /// True while the master holds SS low.
    #[inline(always)]
    pub fn is_selected(&self) -> bool {
        !self.ss
    }

    pub fn level(&self, line: Line) -> bool {
        match line {
            Line::Ss => self.ss,
            Line::Sck => self.sck,
            Line::Mosi => self.mosi,
            Line::Miso => self.miso,
        }
    }

    /// Drive a line. Driving MISO from outside is allowed but the chip
    /// overwrites it on the next step while selected.
    pub fn set_level(&mut self, line: Line, high: bool) {
        match line {
            Line::Ss => self.ss = high,
            Line::Sck => self.sck = high,
            Line::Mosi => self.mosi = high,
            Line::Miso => self.miso = high,
        }
    }
}

impl Default for BusPins {
    fn default() -> Self { Self::new() }
}
