//! Inspection helpers behind the chip's `dump_*` methods.
//!
//! - **Ring viewer**: hex + ASCII dump of a TX or RX ring, following the
//!   ring across its end
//! - **Register viewer**: named register tables for the W5100 / W5500
//!   common block and the socket banks

use crate::socket::ring::{Ring, RING_MASK, RING_SIZE};
use crate::ChipModel;

const BYTES_PER_LINE: usize = 16;

// ─── Ring Viewer ────────────────────────────────────────────────────────────

/// Format `length` bytes of a ring starting at `start`.
///
/// Each line is labelled with the masked ring offset of its first byte, so a
/// dump that crosses the end of the ring continues at `0000:`.
pub fn dump_ring(ring: &Ring, start: u16, length: usize) -> String {
    let bytes = ring.copy_out(start, length.min(RING_SIZE));
    let mut s = String::new();
    for (n, line) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let offset = start.wrapping_add((n * BYTES_PER_LINE) as u16) & RING_MASK;
        let hex: Vec<String> = line.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = line
            .iter()
            .map(|&c| if (0x20..0x7F).contains(&c) { c as char } else { '.' })
            .collect();
        s.push_str(&format!("{:04X}: {:<47}  {}\n", offset, hex.join(" "), ascii));
    }
    s
}

// ─── Register Viewer ────────────────────────────────────────────────────────

/// A named register: offset, width in bytes, name.
pub type RegName = (usize, usize, &'static str);

/// Common block registers for a chip model.
pub fn common_reg_names(model: ChipModel) -> &'static [RegName] {
    match model {
        ChipModel::W5100 => &[
            (0x00, 1, "MR"), (0x01, 4, "GAR"), (0x05, 4, "SUBR"),
            (0x09, 6, "SHAR"), (0x0F, 4, "SIPR"),
            (0x15, 1, "IR"), (0x16, 1, "IMR"),
            (0x17, 2, "RTR"), (0x19, 1, "RCR"),
            (0x1A, 1, "RMSR"), (0x1B, 1, "TMSR"),
            (0x1C, 2, "PATR"), (0x28, 1, "PTIMER"), (0x29, 1, "PMAGIC"),
            (0x2A, 4, "UIPR"), (0x2E, 2, "UPORT"),
        ],
        ChipModel::W5500 => &[
            (0x00, 1, "MR"), (0x01, 4, "GAR"), (0x05, 4, "SUBR"),
            (0x09, 6, "SHAR"), (0x0F, 4, "SIPR"),
            (0x13, 2, "INTLEVEL"), (0x15, 1, "IR"), (0x16, 1, "IMR"),
            (0x17, 1, "SIR"), (0x18, 1, "SIMR"),
            (0x19, 2, "RTR"), (0x1B, 1, "RCR"),
            (0x1C, 1, "PTIMER"), (0x1D, 1, "PMAGIC"),
            (0x1E, 6, "PHAR"), (0x24, 2, "PSID"), (0x26, 2, "PMRU"),
            (0x28, 4, "UIPR"), (0x2C, 2, "UPORTR"),
            (0x2E, 1, "PHYCFGR"), (0x39, 1, "VERSIONR"),
        ],
    }
}

/// Socket bank registers (same layout on both models).
pub fn socket_reg_names() -> &'static [RegName] {
    &[
        (0x00, 1, "MR"), (0x01, 1, "CR"), (0x02, 1, "IR"), (0x03, 1, "SR"),
        (0x04, 2, "PORT"), (0x06, 6, "DHAR"), (0x0C, 4, "DIPR"),
        (0x10, 2, "DPORT"), (0x12, 2, "MSSR"), (0x15, 1, "TOS"), (0x16, 1, "TTL"),
        (0x1E, 1, "RXBUF_SIZE"), (0x1F, 1, "TXBUF_SIZE"),
        (0x20, 2, "TX_FSR"), (0x22, 2, "TX_RD"), (0x24, 2, "TX_WR"),
        (0x26, 2, "RX_RSR"), (0x28, 2, "RX_RD"),
        (0x2C, 1, "IMR"), (0x2D, 2, "FRAG"),
    ]
}

/// Format a register block, one register per line.
pub fn dump_regs(read: impl Fn(usize) -> u8, names: &[RegName]) -> String {
    let mut s = String::new();
    for &(off, width, name) in names {
        let bytes: Vec<String> = (off..off + width).map(|a| format!("{:02X}", read(a))).collect();
        s.push_str(&format!("  {:>10} (0x{:02X}) = {}\n", name, off, bytes.join(" ")));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_ring() {
        let mut ring = Ring::new();
        ring.copy_in(0x10, b"AB");
        ring.set(0x1F, 0xFF);
        let dump = dump_ring(&ring, 0x10, 16);
        assert_eq!(dump.lines().count(), 1);
        assert!(dump.starts_with("0010: 41 42 00"));
        assert!(dump.trim_end().ends_with("AB.............."));
    }

    #[test]
    fn test_dump_ring_follows_wrap() {
        let mut ring = Ring::new();
        ring.copy_in(0x7F8, b"0123456789abcdef");
        let dump = dump_ring(&ring, 0x7F8, 24);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("07F8: 30 31"));
        assert!(lines[0].ends_with("0123456789abcdef"));
        assert!(lines[1].starts_with("0008: 00"));
    }

    #[test]
    fn test_register_names() {
        let has = |m, name| common_reg_names(m).iter().any(|&(_, _, n)| n == name);
        assert!(has(ChipModel::W5100, "RMSR"));
        assert!(has(ChipModel::W5500, "VERSIONR"));
        assert!(!has(ChipModel::W5100, "VERSIONR"));
        let dump = dump_regs(|a| a as u8, &socket_reg_names()[..2]);
        assert!(dump.contains("MR (0x00) = 00"));
        assert!(dump.contains("CR (0x01) = 01"));
    }
}
