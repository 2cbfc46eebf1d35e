//! # wiznet-core
//!
//! Bit-level emulation of the Wiznet W5100 and W5500 SPI Ethernet
//! controllers, for use as a peripheral inside an instruction-level
//! microcontroller simulator.
//!
//! The host simulator drives four bus lines and calls [`WiznetChip::step`]
//! once per tick. The chip decodes the bit stream into register and buffer
//! accesses, and its four sockets are backed by real host OS sockets bound
//! to a private loopback address. DHCP and SNTP requests are answered
//! locally so firmware can bring up networking without any host setup.
//!
//! ## Architecture
//!
//! - [`WiznetChip`]: Top-level chip that wires together bus, decoder and address space
//! - [`ChipModel`]: W5100 or W5500 (framing and common register layout)
//! - [`bus`]: Line levels shared with the environment
//! - [`spi`]: SPI slave bit sampler (mode 0, MSB first)
//! - [`framing`]: Per-model transaction decoders producing router operations
//! - [`memory`]: Flat address map: common block, socket banks, TX/RX rings
//! - [`socket`]: Socket state machine, rings, and host OS sockets
//! - [`loopback`]: Local DHCP and SNTP responders
//! - [`master`]: Bit-banging bus master for tests and benches
//! - [`inspect`]: Register and ring viewers
//! - [`savestate`]: Compressed save states
//!
//! Nothing the chip does at run time is fatal. A host socket that cannot be
//! bound or connected leaves the emulated socket in its previous state and
//! logs a warning; the firmware sees the same thing a real chip would show
//! for an unreachable peer.

pub mod bus;
pub mod config;
pub mod error;
pub mod framing;
pub mod inspect;
pub mod loopback;
pub mod master;
pub mod memory;
pub mod savestate;
pub mod socket;
pub mod spi;

pub use bus::{BusPins, Line};
pub use config::NetConfig;
pub use error::{ChipError, Result};
pub use master::SpiMaster;
pub use memory::AddressSpace;
pub use socket::{SocketEngine, SocketStatus};

use log::{info, trace};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use framing::{Decoder, RouterOp};
use spi::SpiSlave;

/// Emulated chip model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipModel {
    /// W5100: fixed 4-byte frames, one data byte per transaction
    W5100,
    /// W5500: address + control byte, variable-length bursts
    W5500,
}

impl ChipModel {
    /// Save-state model byte.
    pub fn to_byte(self) -> u8 {
        match self {
            ChipModel::W5100 => 0,
            ChipModel::W5500 => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChipModel::W5100),
            1 => Some(ChipModel::W5500),
            _ => None,
        }
    }
}

impl fmt::Display for ChipModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipModel::W5100 => write!(f, "W5100"),
            ChipModel::W5500 => write!(f, "W5500"),
        }
    }
}

impl FromStr for ChipModel {
    type Err = ChipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().trim_start_matches('w') {
            "5100" => Ok(ChipModel::W5100),
            "5500" => Ok(ChipModel::W5500),
            _ => Err(ChipError::UnknownModel(s.to_string())),
        }
    }
}

/// Which ring of a socket to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Tx,
    Rx,
}

/// Top-level chip emulator.
pub struct WiznetChip {
    model: ChipModel,
    pins: BusPins,
    spi: SpiSlave,
    decoder: Decoder,
    mem: AddressSpace,
    /// SS state seen at the previous step
    was_selected: bool,
    /// Steps executed since creation or reset
    steps: u64,
}

impl WiznetChip {
    /// Create a chip with the default loopback configuration.
    pub fn new(model: ChipModel) -> Self {
        Self::with_config(model, NetConfig::default())
    }

    pub fn with_config(model: ChipModel, config: NetConfig) -> Self {
        WiznetChip {
            model,
            pins: BusPins::new(),
            spi: SpiSlave::new(),
            decoder: Decoder::new(model),
            mem: AddressSpace::new(model, config),
            was_selected: false,
            steps: 0,
        }
    }

    pub fn model(&self) -> ChipModel { self.model }
    pub fn config(&self) -> &NetConfig { self.mem.config() }
    pub fn steps(&self) -> u64 { self.steps }
    pub fn pins(&self) -> &BusPins { &self.pins }
    pub fn pins_mut(&mut self) -> &mut BusPins { &mut self.pins }

    pub fn socket(&self, n: usize) -> Option<&SocketEngine> {
        self.mem.socket(n)
    }

    /// Hardware reset: closes all sockets and clears bus state.
    pub fn reset(&mut self) {
        info!("{}: reset", self.model);
        self.mem.reset();
        self.spi.reset();
        self.decoder.reset();
        self.was_selected = false;
        self.pins.miso = false;
        self.steps = 0;
    }

    /// Advance one tick: sample the bus, run any completed transaction,
    /// then poll the host sockets. Returns the suggested delay in
    /// nanoseconds until the next call.
    pub fn step(&mut self) -> u64 {
        self.spi.step(&mut self.pins);
        self.process_transaction();
        self.mem.step_sockets();
        self.steps += 1;
        self.mem.config().step_interval_ns
    }

    fn process_transaction(&mut self) {
        if self.spi.is_selected() {
            self.was_selected = true;
            if self.spi.is_data_ready() {
                let byte = self.spi.get_byte();
                let out = match self.decoder.decode(byte) {
                    Some(op) => self.execute(op),
                    None => 0,
                };
                self.spi.set_output_byte(out);
            }
        } else if self.was_selected {
            self.was_selected = false;
            if self.spi.is_data_ready() {
                self.spi.get_byte();
            }
            if let Some(op) = self.decoder.deselect() {
                self.execute(op);
            }
            self.spi.set_output_byte(0);
        }
    }

    /// Run a decoded operation. Returns the byte to shift out next.
    fn execute(&mut self, op: RouterOp) -> u8 {
        match op {
            RouterOp::Read { addr } => {
                let v = self.read_mem(addr);
                trace!("read  0x{:04X} -> 0x{:02X}", addr, v);
                v
            }
            RouterOp::Write { addr, value } => {
                trace!("write 0x{:04X} <- 0x{:02X}", addr, value);
                self.write_mem(addr, value);
                0
            }
            RouterOp::Burst { addr, data } => {
                trace!("burst 0x{:04X} <- {} bytes", addr, data.len());
                self.mem.write_burst(addr, &data);
                0
            }
        }
    }

    /// Read through the address router, as a bus read would.
    pub fn read_mem(&self, addr: u32) -> u8 {
        self.mem.read(addr)
    }

    /// Write through the address router; command writes dispatch.
    pub fn write_mem(&mut self, addr: u32, value: u8) {
        self.mem.write(addr, value);
    }

    // ─── Inspection ─────────────────────────────────────────────────────────

    /// Named dump of the common register block.
    pub fn dump_common(&self) -> String {
        let common = self.mem.common();
        let mut s = format!("{} common registers\n", self.model);
        s.push_str(&inspect::dump_regs(|a| common[a], inspect::common_reg_names(self.model)));
        s
    }

    /// Named dump of one socket bank, with its state machine status.
    pub fn dump_socket(&self, n: usize) -> Option<String> {
        let sock = self.mem.socket(n)?;
        let mut s = format!(
            "Socket {}: {:?} protocol={:?} rx_write_idx=0x{:03X}{}\n",
            n, sock.status(), sock.protocol(), sock.rx_write_index(),
            if sock.is_connecting() { " (connecting)" } else { "" }
        );
        s.push_str(&inspect::dump_regs(|a| sock.read_reg(a), inspect::socket_reg_names()));
        Some(s)
    }

    /// Hex + ASCII dump of part of a socket's TX or RX ring.
    pub fn dump_ring(&self, n: usize, kind: RingKind, start: u16, length: usize) -> Option<String> {
        let sock = self.mem.socket(n)?;
        let ring = match kind {
            RingKind::Tx => sock.tx_ring(),
            RingKind::Rx => sock.rx_ring(),
        };
        Some(inspect::dump_ring(ring, start, length))
    }

    // ─── Save state ─────────────────────────────────────────────────────────

    pub fn save_state(&self) -> savestate::SaveState {
        self.mem.save_state()
    }

    /// Restore registers and rings. Every socket comes back CLOSED.
    pub fn load_state(&mut self, state: &savestate::SaveState) {
        self.spi.reset();
        self.decoder.reset();
        self.was_selected = false;
        self.mem.load_state(state);
    }

    pub fn save_state_to_file(&self, path: &Path) -> Result<()> {
        savestate::save_to_file(&self.save_state(), self.model, path)
    }

    pub fn load_state_from_file(&mut self, path: &Path) -> Result<()> {
        let state = savestate::load_from_file(path, self.model)?;
        self.load_state(&state);
        info!("{}: state loaded from {}", self.model, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::w5500::control_byte;
    use crate::socket::registers::{self as sreg, CMD_OPEN, MR_TCP, MR_UDP, SR_INIT};
    use std::net::{Ipv4Addr, TcpListener};

    fn test_config() -> NetConfig {
        NetConfig { bind_addr: Ipv4Addr::LOCALHOST, ..NetConfig::default() }
    }

    fn chip(model: ChipModel) -> WiznetChip {
        WiznetChip::with_config(model, test_config())
    }

    const S0: u16 = 0x0400;

    #[test]
    fn test_model_parse() {
        assert_eq!("5100".parse::<ChipModel>().unwrap(), ChipModel::W5100);
        assert_eq!("W5500".parse::<ChipModel>().unwrap(), ChipModel::W5500);
        assert_eq!(" w5500 ".parse::<ChipModel>().unwrap(), ChipModel::W5500);
        assert!(matches!("5200".parse::<ChipModel>(), Err(ChipError::UnknownModel(_))));
        assert_eq!(ChipModel::from_byte(ChipModel::W5500.to_byte()), Some(ChipModel::W5500));
        assert_eq!(ChipModel::W5100.to_string(), "W5100");
    }

    #[test]
    fn test_step_returns_interval() {
        let mut c = chip(ChipModel::W5100);
        assert_eq!(c.step(), 1000);
        assert_eq!(c.steps(), 1);
    }

    #[test]
    fn test_w5100_single_read() {
        let mut c = chip(ChipModel::W5100);
        c.write_mem(0x0010, 0x5A);
        let mut m = SpiMaster::new(&mut c);
        m.select();
        assert_eq!(m.transfer(0x0F), 0);
        assert_eq!(m.transfer(0x00), 0);
        assert_eq!(m.transfer(0x10), 0);
        assert_eq!(m.transfer(0x00), 0x5A);
        // Back to waiting: the next byte is an opcode again
        assert_eq!(m.transfer(0x00), 0);
        m.deselect();
        assert!(c.decoder.is_idle());
    }

    #[test]
    fn test_w5100_register_round_trip() {
        let mut c = chip(ChipModel::W5100);
        let mut m = SpiMaster::new(&mut c);
        for (addr, v) in [(0x0001u16, 0xC0u8), (0x000F, 0x0A), (0x0016, 0x5F), (S0 + 4, 0x13), (S0 + 0x10, 0x50)] {
            m.write_5100(addr, v);
            assert_eq!(m.read_5100(addr), v);
        }
        m.write_5100(0x4000 + 7, 0xAB);
        assert_eq!(m.read_5100(0x4007), 0xAB);
    }

    #[test]
    fn test_w5100_bad_opcode_then_valid() {
        let mut c = chip(ChipModel::W5100);
        let mut m = SpiMaster::new(&mut c);
        m.select();
        m.transfer(0x55);
        for b in [0xF0, 0x00, 0x01, 0xC0] {
            m.transfer(b);
        }
        m.deselect();
        assert_eq!(m.read_5100(0x0001), 0xC0);
    }

    #[test]
    fn test_w5100_abort_mid_transaction() {
        let mut c = chip(ChipModel::W5100);
        let mut m = SpiMaster::new(&mut c);
        m.select();
        for b in [0xF0, 0x00, 0x01] {
            m.transfer(b);
        }
        // Half a data byte, then SS high
        for _ in 0..4 {
            c.pins_mut().mosi = true;
            c.pins_mut().sck = false;
            c.step();
            c.pins_mut().sck = true;
            c.step();
        }
        let mut m = SpiMaster::new(&mut c);
        m.deselect();
        assert_eq!(m.read_5100(0x0001), 0);
        assert!(c.decoder.is_idle());
    }

    #[test]
    fn test_w5500_burst_write_to_tx_ring() {
        let mut c = chip(ChipModel::W5500);
        let mut m = SpiMaster::new(&mut c);
        m.write_5500(0x0000, 2, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let tx = c.socket(0).unwrap().tx_ring();
        assert_eq!(tx.copy_out(0, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_w5500_burst_lands_only_on_deselect() {
        let mut c = chip(ChipModel::W5500);
        let mut m = SpiMaster::new(&mut c);
        m.select();
        for b in [0x00, 0x00, control_byte(2, true), 0x11, 0x22] {
            m.transfer(b);
        }
        assert_eq!(c.socket(0).unwrap().read_tx(0), 0);
        SpiMaster::new(&mut c).deselect();
        assert_eq!(c.socket(0).unwrap().read_tx(0), 0x11);
        assert_eq!(c.socket(0).unwrap().read_tx(1), 0x22);
    }

    #[test]
    fn test_w5500_abort_before_data() {
        let mut c = chip(ChipModel::W5500);
        c.write_mem(0x4000, 0x99);
        let mut m = SpiMaster::new(&mut c);
        m.select();
        for b in [0x00, 0x00, control_byte(2, true)] {
            m.transfer(b);
        }
        m.deselect();
        assert_eq!(c.read_mem(0x4000), 0x99);
    }

    #[test]
    fn test_w5500_read_burst() {
        let mut c = chip(ChipModel::W5500);
        for (i, b) in b"wiznet".iter().enumerate() {
            c.write_mem(0x6800 + i as u32, *b);
        }
        let mut m = SpiMaster::new(&mut c);
        // Socket 1 RX block
        assert_eq!(m.read_5500(0x0000, 7, 6), b"wiznet".to_vec());
        // Same bytes through block 0 at the flat address
        assert_eq!(m.read(0x6800, 6), b"wiznet".to_vec());
    }

    #[test]
    fn test_w5500_tx_burst_wraps_at_ring_end() {
        let mut c = chip(ChipModel::W5500);
        let mut m = SpiMaster::new(&mut c);
        m.write_5500(0x07FE, 2, &[1, 2, 3, 4]);
        // Socket 3 TX is the last block before the RX rings
        m.write_5500(0x07FF, 14, &[0xAA, 0xBB]);
        let s0 = c.socket(0).unwrap();
        assert_eq!(s0.tx_ring().copy_out(0x7FE, 4), vec![1, 2, 3, 4]);
        assert_eq!(s0.read_rx(0), 0);
        assert_eq!(c.socket(1).unwrap().read_tx(0), 0);
        assert_eq!(c.socket(3).unwrap().tx_ring().copy_out(0x7FF, 2), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_w5500_rx_read_wraps_at_ring_end() {
        let mut c = chip(ChipModel::W5500);
        c.write_mem(0x67FF, 11);
        c.write_mem(0x6000, 22);
        c.write_mem(0x6800, 99);
        let mut m = SpiMaster::new(&mut c);
        assert_eq!(m.read_5500(0x07FF, 3, 2), vec![11, 22]);
    }

    #[test]
    fn test_w5500_register_round_trip() {
        let mut c = chip(ChipModel::W5500);
        let mut m = SpiMaster::new(&mut c);
        m.write_5500(0x0001, 0, &[192, 168, 1, 1]);
        assert_eq!(m.read_5500(0x0001, 0, 4), vec![192, 168, 1, 1]);
        // Socket 3 register block: PORT
        m.write_5500(0x0004, 13, &[0x1F, 0x90]);
        assert_eq!(m.read_5500(0x0004, 13, 2), vec![0x1F, 0x90]);
        assert_eq!(c.read_mem(0x0704), 0x1F);
        // Reserved block reads as zero
        let mut m = SpiMaster::new(&mut c);
        assert_eq!(m.read_5500(0x0000, 4, 2), vec![0, 0]);
    }

    #[test]
    fn test_soft_reset_over_bus() {
        let mut c = chip(ChipModel::W5500);
        let mut m = SpiMaster::new(&mut c);
        m.write_u8(S0 + sreg::MR as u16, MR_UDP);
        m.write_u8(S0 + sreg::CR as u16, CMD_OPEN);
        assert_eq!(m.read_u8(S0 + sreg::SR as u16), sreg::SR_UDP);
        m.write_u8(0x0000, 0x80);
        assert_eq!(m.read_u8(0x0000), 0x00);
        assert_eq!(m.read_u8(S0 + sreg::SR as u16), sreg::SR_CLOSED);
        assert_eq!(m.read_u16(0x0019), 0x07D0);
    }

    #[test]
    fn test_tcp_connect_failure_over_bus() {
        let port = {
            let l = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            l.local_addr().unwrap().port()
        };
        let mut c = chip(ChipModel::W5100);
        let mut m = SpiMaster::new(&mut c);
        m.write_u8(S0 + sreg::MR as u16, MR_TCP);
        m.write_u8(S0 + sreg::CR as u16, CMD_OPEN);
        assert_eq!(m.read_u8(S0 + sreg::SR as u16), SR_INIT);
        m.write(S0 + sreg::DIPR as u16, &[127, 0, 0, 1]);
        m.write_u16(S0 + sreg::DPORT as u16, port);
        m.write_u8(S0 + sreg::CR as u16, sreg::CMD_CONNECT);
        assert_eq!(m.read_u8(S0 + sreg::SR as u16), SR_INIT);
        assert_eq!(m.read_u8(S0 + sreg::CR as u16), 0);
    }

    #[test]
    fn test_dumps() {
        let mut c = chip(ChipModel::W5500);
        c.write_mem(0x4000, b'h');
        assert!(c.dump_common().contains("VERSIONR"));
        let s0 = c.dump_socket(0).unwrap();
        assert!(s0.contains("Closed"));
        assert!(s0.contains("TX_FSR"));
        assert!(c.dump_socket(4).is_none());
        let ring = c.dump_ring(0, RingKind::Tx, 0, 16).unwrap();
        assert!(ring.starts_with("0000: 68"));
    }

    #[test]
    fn test_state_file_round_trip() {
        let mut c = chip(ChipModel::W5100);
        c.write_mem(0x0009, 0x02);
        c.write_mem(0x4123, 0x77);
        let path = std::env::temp_dir().join(format!("wiznet-chip-{}.state", std::process::id()));
        c.save_state_to_file(&path).unwrap();

        let mut other = chip(ChipModel::W5100);
        other.load_state_from_file(&path).unwrap();
        assert_eq!(other.read_mem(0x0009), 0x02);
        assert_eq!(other.read_mem(0x4123), 0x77);

        let mut wrong = chip(ChipModel::W5500);
        assert!(matches!(
            wrong.load_state_from_file(&path),
            Err(ChipError::ModelMismatch { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }
}
