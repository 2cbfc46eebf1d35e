//! Socket register bank layout.
//!
//! | Offset | Register | Notes |
//! |--------|----------|-------|
//! | 0x00 | Sn_MR     | protocol in low nibble, bit 7 = multicast |
//! | 0x01 | Sn_CR     | command, reads back 0 |
//! | 0x02 | Sn_IR     | write 1 to clear |
//! | 0x03 | Sn_SR     | status, read only |
//! | 0x04 | Sn_PORT   | source port |
//! | 0x06 | Sn_DHAR   | destination MAC |
//! | 0x0C | Sn_DIPR   | destination IP |
//! | 0x10 | Sn_DPORT  | destination port |
//! | 0x12 | Sn_MSSR   | |
//! | 0x15 | Sn_TOS    | |
//! | 0x16 | Sn_TTL    | |
//! | 0x20 | Sn_TX_FSR | read only |
//! | 0x22 | Sn_TX_RD  | read only |
//! | 0x24 | Sn_TX_WR  | |
//! | 0x26 | Sn_RX_RSR | read only |
//! | 0x28 | Sn_RX_RD  | |
//!
//! 16-bit fields are big-endian (high byte at the lower offset).

use std::net::Ipv4Addr;

/// Populated cells per socket bank. Cells past this read as 0.
pub const REG_SPACE_SIZE: usize = 0x30;

pub const MR: usize = 0x00;
pub const CR: usize = 0x01;
pub const IR: usize = 0x02;
pub const SR: usize = 0x03;
pub const PORT: usize = 0x04;
pub const DHAR: usize = 0x06;
pub const DIPR: usize = 0x0C;
pub const DPORT: usize = 0x10;
pub const MSSR: usize = 0x12;
pub const TOS: usize = 0x15;
pub const TTL: usize = 0x16;
pub const TX_FSR: usize = 0x20;
pub const TX_RD: usize = 0x22;
pub const TX_WR: usize = 0x24;
pub const RX_RSR: usize = 0x26;
pub const RX_RD: usize = 0x28;

// Sn_MR
pub const MR_PROTO_MASK: u8 = 0x0F;
pub const MR_TCP: u8 = 0x01;
pub const MR_UDP: u8 = 0x02;
pub const MR_MULTICAST: u8 = 0x80;

// Sn_CR
pub const CMD_OPEN: u8 = 0x01;
pub const CMD_LISTEN: u8 = 0x02;
pub const CMD_CONNECT: u8 = 0x04;
pub const CMD_DISCON: u8 = 0x08;
pub const CMD_CLOSE: u8 = 0x10;
pub const CMD_SEND: u8 = 0x20;
pub const CMD_RECV: u8 = 0x40;

// Sn_IR
pub const IR_RECV: u8 = 0x04;
pub const IR_SEND_OK: u8 = 0x10;
/// Bits a write-1-to-clear can never touch.
pub const IR_RESERVED: u8 = 0xE0;

// Sn_SR
pub const SR_CLOSED: u8 = 0x00;
pub const SR_INIT: u8 = 0x13;
pub const SR_LISTEN: u8 = 0x14;
pub const SR_ESTABLISHED: u8 = 0x17;
pub const SR_UDP: u8 = 0x22;

/// Power-on values for one socket bank.
const POR_VALUES: [u8; REG_SPACE_SIZE] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02,
    0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xFF, 0x40, 0x00, 0x00,
];

/// Raw storage for one socket bank.
#[derive(Clone)]
pub struct SocketRegs {
    cells: [u8; REG_SPACE_SIZE],
}

impl SocketRegs {
    pub fn new() -> Self {
        SocketRegs { cells: POR_VALUES }
    }

    pub fn reset(&mut self) {
        self.cells = POR_VALUES;
    }

    #[inline(always)]
    pub fn get(&self, cell: usize) -> u8 {
        self.cells.get(cell).copied().unwrap_or(0)
    }

    #[inline(always)]
    pub fn set(&mut self, cell: usize, value: u8) {
        if let Some(c) = self.cells.get_mut(cell) {
            *c = value;
        }
    }

    pub fn read16(&self, cell: usize) -> u16 {
        u16::from_be_bytes([self.get(cell), self.get(cell + 1)])
    }

    pub fn write16(&mut self, cell: usize, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.set(cell, hi);
        self.set(cell + 1, lo);
    }

    pub fn dest_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.get(DIPR), self.get(DIPR + 1), self.get(DIPR + 2), self.get(DIPR + 3))
    }

    pub fn set_dest_ip(&mut self, ip: Ipv4Addr) {
        for (i, b) in ip.octets().iter().enumerate() {
            self.set(DIPR + i, *b);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    /// Replace the contents from a save state; short input keeps power-on values.
    pub fn load(&mut self, data: &[u8]) {
        self.reset();
        let n = data.len().min(REG_SPACE_SIZE);
        self.cells[..n].copy_from_slice(&data[..n]);
    }
}

impl Default for SocketRegs {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_values() {
        let regs = SocketRegs::new();
        assert_eq!(regs.read16(TX_FSR), 0x0800);
        assert_eq!(regs.get(TTL), 0x80);
        assert_eq!(regs.get(DHAR), 0xFF);
        assert_eq!(regs.get(SR), SR_CLOSED);
    }

    #[test]
    fn test_big_endian_fields() {
        let mut regs = SocketRegs::new();
        regs.write16(PORT, 0x1388);
        assert_eq!(regs.get(PORT), 0x13);
        assert_eq!(regs.get(PORT + 1), 0x88);
        assert_eq!(regs.read16(PORT), 5000);
    }

    #[test]
    fn test_out_of_bank_cells() {
        let mut regs = SocketRegs::new();
        regs.set(0x80, 0x55);
        assert_eq!(regs.get(0x80), 0);
    }

    #[test]
    fn test_dest_ip() {
        let mut regs = SocketRegs::new();
        regs.set_dest_ip(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(&regs.as_slice()[DIPR..DIPR + 4], &[10, 1, 2, 3]);
        assert_eq!(regs.dest_ip(), Ipv4Addr::new(10, 1, 2, 3));
    }
}
