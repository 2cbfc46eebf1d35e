//! Chip address space and router.
//!
//! Both framings address one flat map:
//!
//! | Address Range | Content |
//! |---------------|---------|
//! | 0x0000–0x00FF | Common registers |
//! | 0x0400–0x07FF | Socket 0–3 register banks (0x100 each) |
//! | 0x4000–0x5FFF | Socket 0–3 TX rings (0x800 each) |
//! | 0x6000–0x7FFF | Socket 0–3 RX rings (0x800 each) |
//!
//! Anything else is unmapped: reads return 0 and writes are dropped.
//! Addresses are `u32` because W5500 region bases plus a 16-bit offset can
//! exceed 0xFFFF.

use log::{info, trace};

use crate::config::NetConfig;
use crate::savestate::{SaveState, SocketState};
use crate::socket::ring::RING_MASK;
use crate::socket::{SocketEngine, NUM_SOCKETS};
use crate::ChipModel;

/// Common register block size.
pub const COMMON_SIZE: usize = 0x100;
pub const SOCKET_REG_BASE: u32 = 0x0400;
pub const SOCKET_REG_STRIDE: u32 = 0x100;
pub const TX_BASE: u32 = 0x4000;
pub const RX_BASE: u32 = 0x6000;
pub const RING_STRIDE: u32 = 0x800;
const MAP_END: u32 = 0x8000;

/// Common mode register.
pub const MR: usize = 0x00;
/// MR bit 7 triggers a software reset and self-clears.
pub const MR_RST: u8 = 0x80;

/// Where a flat address lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Common(usize),
    SocketReg { socket: usize, cell: usize },
    Tx { socket: usize, offset: u16 },
    Rx { socket: usize, offset: u16 },
    Unmapped,
}

pub fn route(addr: u32) -> Target {
    if addr < COMMON_SIZE as u32 {
        Target::Common(addr as usize)
    } else if addr < TX_BASE {
        match addr.checked_sub(SOCKET_REG_BASE).map(|a| (a / SOCKET_REG_STRIDE) as usize) {
            Some(socket) if socket < NUM_SOCKETS => {
                Target::SocketReg { socket, cell: (addr & 0xFF) as usize }
            }
            _ => Target::Unmapped,
        }
    } else if addr < RX_BASE {
        Target::Tx {
            socket: ((addr - TX_BASE) / RING_STRIDE) as usize,
            offset: addr as u16 & RING_MASK,
        }
    } else if addr < MAP_END {
        Target::Rx {
            socket: ((addr - RX_BASE) / RING_STRIDE) as usize,
            offset: addr as u16 & RING_MASK,
        }
    } else {
        Target::Unmapped
    }
}

/// Address of byte `i` of a burst that starts at `start`.
///
/// A burst that starts in a TX or RX ring wraps inside that socket's ring.
/// Anywhere else addresses simply increment.
pub fn burst_addr(start: u32, i: u32) -> u32 {
    let wrap = |base: u32, socket: usize, offset: u16| {
        base + socket as u32 * RING_STRIDE + ((offset as u32 + i) & RING_MASK as u32)
    };
    match route(start) {
        Target::Tx { socket, offset } => wrap(TX_BASE, socket, offset),
        Target::Rx { socket, offset } => wrap(RX_BASE, socket, offset),
        _ => start + i,
    }
}

/// Power-on values of the common block for a model.
fn common_por(model: ChipModel) -> Vec<u8> {
    let mut common = vec![0u8; COMMON_SIZE];
    let (rtr, rcr) = match model {
        ChipModel::W5100 => (0x17, 0x19),
        ChipModel::W5500 => (0x19, 0x1B),
    };
    // Retry time 200 ms (0x07D0 x 100 us), retry count 8
    common[rtr] = 0x07;
    common[rtr + 1] = 0xD0;
    common[rcr] = 0x08;
    match model {
        ChipModel::W5100 => {
            common[0x1A] = 0x55; // RMSR: 2 KB per socket
            common[0x1B] = 0x55; // TMSR
        }
        ChipModel::W5500 => {
            common[0x2E] = 0xBF; // PHYCFGR: link up, 100 Mbit full duplex
            common[0x39] = 0x04; // VERSIONR
        }
    }
    common
}

pub struct AddressSpace {
    model: ChipModel,
    config: NetConfig,
    common: Vec<u8>,
    sockets: Vec<SocketEngine>,
}

impl AddressSpace {
    pub fn new(model: ChipModel, config: NetConfig) -> Self {
        AddressSpace {
            model,
            config,
            common: common_por(model),
            sockets: (0..NUM_SOCKETS).map(SocketEngine::new).collect(),
        }
    }

    /// Close every socket and restore power-on values.
    pub fn reset(&mut self) {
        info!("{}: software reset", self.model);
        self.common = common_por(self.model);
        for sock in &mut self.sockets {
            sock.reset();
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn common(&self) -> &[u8] {
        &self.common
    }

    pub fn socket(&self, n: usize) -> Option<&SocketEngine> {
        self.sockets.get(n)
    }

    pub fn sockets(&self) -> &[SocketEngine] {
        &self.sockets
    }

    pub fn read(&self, addr: u32) -> u8 {
        match route(addr) {
            Target::Common(i) => self.common[i],
            Target::SocketReg { socket, cell } => self.sockets[socket].read_reg(cell),
            Target::Tx { socket, offset } => self.sockets[socket].read_tx(offset),
            Target::Rx { socket, offset } => self.sockets[socket].read_rx(offset),
            Target::Unmapped => {
                trace!("read from unmapped 0x{:04X}", addr);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u32, value: u8) {
        match route(addr) {
            Target::Common(MR) if value & MR_RST != 0 => {
                self.reset();
                self.common[MR] = value & !MR_RST;
            }
            Target::Common(i) => self.common[i] = value,
            Target::SocketReg { socket, cell } => {
                self.sockets[socket].write_reg(cell, value, &self.config)
            }
            Target::Tx { socket, offset } => self.sockets[socket].write_tx(offset, value),
            Target::Rx { socket, offset } => self.sockets[socket].write_rx(offset, value),
            Target::Unmapped => trace!("write 0x{:02X} to unmapped 0x{:04X} dropped", value, addr),
        }
    }

    /// Write a burst; see [`burst_addr`] for where each byte lands.
    pub fn write_burst(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write(burst_addr(addr, i as u32), b);
        }
    }

    /// Poll every socket's host resource once.
    pub fn step_sockets(&mut self) {
        for sock in &mut self.sockets {
            sock.poll();
        }
    }

    pub fn save_state(&self) -> SaveState {
        SaveState {
            common: self.common.clone(),
            sockets: self.sockets.iter().map(|s| s.save_state()).collect(),
        }
    }

    pub fn load_state(&mut self, state: &SaveState) {
        self.common = common_por(self.model);
        let n = state.common.len().min(COMMON_SIZE);
        self.common[..n].copy_from_slice(&state.common[..n]);
        let empty = SocketState { regs: Vec::new(), tx: Vec::new(), rx: Vec::new(), rx_write_idx: 0 };
        for (i, sock) in self.sockets.iter_mut().enumerate() {
            sock.load_state(state.sockets.get(i).unwrap_or(&empty));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::registers::{self, CMD_OPEN, MR_UDP, SR_UDP};
    use crate::socket::SocketStatus;
    use std::net::Ipv4Addr;

    fn space(model: ChipModel) -> AddressSpace {
        let cfg = NetConfig { bind_addr: Ipv4Addr::LOCALHOST, ..NetConfig::default() };
        AddressSpace::new(model, cfg)
    }

    #[test]
    fn test_route() {
        assert_eq!(route(0x0000), Target::Common(0));
        assert_eq!(route(0x00FF), Target::Common(0xFF));
        assert_eq!(route(0x0100), Target::Unmapped);
        assert_eq!(route(0x03FF), Target::Unmapped);
        assert_eq!(route(0x0403), Target::SocketReg { socket: 0, cell: 3 });
        assert_eq!(route(0x0726), Target::SocketReg { socket: 3, cell: 0x26 });
        assert_eq!(route(0x0800), Target::Unmapped);
        assert_eq!(route(0x4000), Target::Tx { socket: 0, offset: 0 });
        assert_eq!(route(0x4FFF), Target::Tx { socket: 1, offset: 0x7FF });
        assert_eq!(route(0x6801), Target::Rx { socket: 1, offset: 1 });
        assert_eq!(route(0x7FFF), Target::Rx { socket: 3, offset: 0x7FF });
        assert_eq!(route(0x8000), Target::Unmapped);
        assert_eq!(route(0x9000), Target::Unmapped);
    }

    #[test]
    fn test_common_por_per_model() {
        let a = space(ChipModel::W5100);
        assert_eq!(&a.common()[0x17..0x1C], &[0x07, 0xD0, 0x08, 0x55, 0x55]);
        let b = space(ChipModel::W5500);
        assert_eq!(&b.common()[0x19..0x1C], &[0x07, 0xD0, 0x08]);
        assert_eq!(b.read(0x2E), 0xBF);
        assert_eq!(b.read(0x39), 0x04);
    }

    #[test]
    fn test_unmapped_access() {
        let mut mem = space(ChipModel::W5100);
        mem.write(0x0200, 0x12);
        mem.write(0x8123, 0x34);
        assert_eq!(mem.read(0x0200), 0);
        assert_eq!(mem.read(0x8123), 0);
    }

    #[test]
    fn test_burst_wraps_inside_ring() {
        let mut mem = space(ChipModel::W5500);
        mem.write_burst(0x47FE, &[1, 2, 3]);
        assert_eq!(mem.socket(0).unwrap().read_tx(0x7FE), 1);
        assert_eq!(mem.socket(0).unwrap().read_tx(0x7FF), 2);
        assert_eq!(mem.socket(0).unwrap().read_tx(0), 3);
        assert_eq!(mem.socket(1).unwrap().read_tx(0), 0);

        // Socket 3 TX must not spill into socket 0 RX
        mem.write_burst(0x5FFF, &[0xAA, 0xBB]);
        assert_eq!(mem.socket(3).unwrap().read_tx(0x7FF), 0xAA);
        assert_eq!(mem.socket(3).unwrap().read_tx(0), 0xBB);
        assert_eq!(mem.socket(0).unwrap().read_rx(0), 0);

        // Non-ring bursts walk the flat map
        mem.write_burst(0x0001, &[192, 168, 1, 1]);
        assert_eq!(&mem.common()[1..5], &[192, 168, 1, 1]);
        assert_eq!(burst_addr(0x7FFF, 1), 0x7800);
        assert_eq!(burst_addr(0x04FF, 1), 0x0500);
    }

    #[test]
    fn test_rings_are_per_socket() {
        let mut mem = space(ChipModel::W5500);
        mem.write(0x47FF, 2);
        mem.write(0x4800, 3);
        assert_eq!(mem.socket(0).unwrap().read_tx(0x7FF), 2);
        assert_eq!(mem.socket(1).unwrap().read_tx(0), 3);
        mem.write(0x6000 + 3 * 0x800 + 5, 0x99);
        assert_eq!(mem.read(0x7805), 0x99);
        assert_eq!(mem.socket(3).unwrap().read_rx(5), 0x99);
    }

    #[test]
    fn test_soft_reset() {
        let mut mem = space(ChipModel::W5100);
        let s1 = SOCKET_REG_BASE + SOCKET_REG_STRIDE;
        mem.write(0x0001, 0xC0); // gateway
        mem.write(s1 + registers::MR as u32, MR_UDP);
        mem.write(s1 + registers::CR as u32, CMD_OPEN);
        assert_eq!(mem.read(s1 + registers::SR as u32), SR_UDP);
        mem.write(0x4800, 0x77);

        mem.write(MR as u32, MR_RST | 0x03);
        assert_eq!(mem.read(MR as u32), 0x03);
        assert_eq!(mem.read(0x0001), 0);
        assert_eq!(mem.read(0x0017), 0x07);
        assert_eq!(mem.socket(1).unwrap().status(), SocketStatus::Closed);
        assert_eq!(mem.read(s1 + registers::MR as u32), 0);
        assert_eq!(mem.read(0x4800), 0);
    }

    #[test]
    fn test_state_restore() {
        let mut mem = space(ChipModel::W5500);
        mem.write(0x000F, 0xC0);
        mem.write(0x0404, 0x13);
        mem.write(0x6010, 0x42);
        let state = mem.save_state();

        let mut other = space(ChipModel::W5500);
        other.load_state(&state);
        assert_eq!(other.read(0x000F), 0xC0);
        assert_eq!(other.read(0x0404), 0x13);
        assert_eq!(other.read(0x6010), 0x42);
    }
}
