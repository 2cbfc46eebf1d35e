//! Socket engine: one of the chip's four protocol endpoints.
//!
//! Each engine owns its register bank, a TX and an RX ring, and at most one
//! host OS socket. Register writes arrive from the address router; commands
//! written to Sn_CR run the state machine below. [`SocketEngine::poll`] is
//! called once per chip step and never blocks.
//!
//! ```text
//! TCP:  CLOSED --OPEN--> INIT --CONNECT, poll--> ESTABLISHED
//!                         |                     ^
//!                         +--LISTEN--> LISTEN --+ (accept)
//!       INIT/LISTEN --CLOSE--> CLOSED
//!       ESTABLISHED --CLOSE/DISCON/peer close--> CLOSED
//!
//! UDP:  CLOSED --OPEN--> UDP_READY --CLOSE/DISCON--> CLOSED
//! ```
//!
//! A command that does not apply to the current state is ignored.
//!
//! CONNECT only starts the OS connect; the socket stays INIT until a later
//! poll sees it complete, and falls back to a fresh INIT socket if it fails.
//! A TCP SEND raises SEND_OK once the OS has taken every byte up to the
//! write pointer seen at SEND; until then TX_RD trails the bytes still queued.

pub mod host;
pub mod registers;
pub mod ring;

use log::{debug, info, trace, warn};
use std::net::SocketAddrV4;

use crate::config::NetConfig;
use crate::loopback::{self, dhcp, sntp, DHCP_SERVER_PORT, NTP_PORT};
use crate::savestate::SocketState;
use host::{DatagramEvent, HostSocket, StreamEvent, MAX_DATAGRAM};
use registers::*;
use ring::{distance, Ring, RING_MASK, RING_SIZE};

/// Socket engines per chip.
pub const NUM_SOCKETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    Closed,
    Init,
    Listen,
    Established,
    UdpReady,
}

impl SocketStatus {
    /// Value seen in Sn_SR.
    pub fn code(self) -> u8 {
        match self {
            SocketStatus::Closed => SR_CLOSED,
            SocketStatus::Init => SR_INIT,
            SocketStatus::Listen => SR_LISTEN,
            SocketStatus::Established => SR_ESTABLISHED,
            SocketStatus::UdpReady => SR_UDP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Protocol selected by the low nibble of Sn_MR.
    pub fn from_mode(mode: u8) -> Option<Self> {
        match mode & MR_PROTO_MASK {
            MR_TCP => Some(Protocol::Tcp),
            MR_UDP => Some(Protocol::Udp),
            _ => None,
        }
    }
}

pub struct SocketEngine {
    index: usize,
    regs: SocketRegs,
    tx: Ring,
    rx: Ring,
    /// Where the next received byte lands. Not visible to the firmware.
    rx_write_idx: u16,
    status: SocketStatus,
    protocol: Option<Protocol>,
    host: HostSocket,
    /// TX write pointer a TCP SEND still has to reach.
    send_end: Option<u16>,
    /// Datagram receive buffer, reused every poll.
    scratch: Vec<u8>,
}

impl SocketEngine {
    pub fn new(index: usize) -> Self {
        SocketEngine {
            index,
            regs: SocketRegs::new(),
            tx: Ring::new(),
            rx: Ring::new(),
            rx_write_idx: 0,
            status: SocketStatus::Closed,
            protocol: None,
            host: HostSocket::None,
            send_end: None,
            scratch: vec![0u8; MAX_DATAGRAM + 1],
        }
    }

    /// Release the host socket and return to power-on values.
    pub fn reset(&mut self) {
        self.host = HostSocket::None;
        self.regs.reset();
        self.tx.clear();
        self.rx.clear();
        self.rx_write_idx = 0;
        self.status = SocketStatus::Closed;
        self.protocol = None;
        self.send_end = None;
    }

    pub fn index(&self) -> usize { self.index }
    pub fn status(&self) -> SocketStatus { self.status }
    pub fn protocol(&self) -> Option<Protocol> { self.protocol }
    pub fn rx_write_index(&self) -> u16 { self.rx_write_idx }
    pub fn tx_ring(&self) -> &Ring { &self.tx }
    pub fn rx_ring(&self) -> &Ring { &self.rx }

    /// True while an outbound connect is in flight.
    pub fn is_connecting(&self) -> bool {
        self.host.is_connecting()
    }

    /// Host-side address of the OS socket, if one is open.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.host.local_addr()
    }

    // ─── Register access ────────────────────────────────────────────────────

    pub fn read_reg(&self, cell: usize) -> u8 {
        match cell {
            CR => 0,
            SR => self.status.code(),
            _ => self.regs.get(cell),
        }
    }

    pub fn read16(&self, cell: usize) -> u16 {
        u16::from_be_bytes([self.read_reg(cell), self.read_reg(cell + 1)])
    }

    pub fn write_reg(&mut self, cell: usize, value: u8, cfg: &NetConfig) {
        match cell {
            CR => self.command(value, cfg),
            IR => {
                let cur = self.regs.get(IR);
                self.regs.set(IR, cur & (!value | IR_RESERVED));
            }
            SR | 0x20..=0x23 | 0x26..=0x27 => {}
            TX_WR => {
                self.regs.set(TX_WR, value & (RING_MASK >> 8) as u8);
                self.update_free_size();
            }
            c if c == TX_WR + 1 => {
                self.regs.set(c, value);
                self.update_free_size();
            }
            RX_RD => self.regs.set(RX_RD, value & (RING_MASK >> 8) as u8),
            _ => self.regs.set(cell, value),
        }
    }

    pub fn read_tx(&self, offset: u16) -> u8 { self.tx.get(offset) }
    pub fn write_tx(&mut self, offset: u16, value: u8) { self.tx.set(offset, value) }
    pub fn read_rx(&self, offset: u16) -> u8 { self.rx.get(offset) }
    pub fn write_rx(&mut self, offset: u16, value: u8) { self.rx.set(offset, value) }

    fn tx_read_ptr(&self) -> u16 { self.regs.read16(TX_RD) & RING_MASK }
    fn tx_write_ptr(&self) -> u16 { self.regs.read16(TX_WR) & RING_MASK }
    fn rx_read_ptr(&self) -> u16 { self.regs.read16(RX_RD) & RING_MASK }

    fn update_free_size(&mut self) {
        let used = distance(self.tx_read_ptr(), self.tx_write_ptr());
        self.regs.write16(TX_FSR, RING_SIZE as u16 - used);
    }

    fn update_received_size(&mut self) {
        let rsr = distance(self.rx_read_ptr(), self.rx_write_idx);
        self.regs.write16(RX_RSR, rsr);
    }

    /// Bytes the RX ring can take without overwriting unread data.
    pub fn rx_free(&self) -> usize {
        RING_SIZE - 1 - distance(self.rx_read_ptr(), self.rx_write_idx) as usize
    }

    fn set_status(&mut self, status: SocketStatus) {
        if self.status != status {
            info!("socket {}: {:?} -> {:?}", self.index, self.status, status);
        }
        self.status = status;
        self.regs.set(SR, status.code());
    }

    fn release(&mut self) {
        self.host = HostSocket::None;
        self.protocol = None;
        self.send_end = None;
        self.set_status(SocketStatus::Closed);
    }

    // ─── Commands ───────────────────────────────────────────────────────────

    pub fn command(&mut self, cmd: u8, cfg: &NetConfig) {
        use SocketStatus::*;
        trace!("socket {}: command 0x{:02X} in {:?}", self.index, cmd, self.status);
        match (self.status, cmd) {
            (Closed, CMD_OPEN) => self.open(cfg),
            (Init, CMD_CONNECT) => self.connect(cfg),
            (Init, CMD_LISTEN) => self.listen(cfg),
            (Init | Listen, CMD_CLOSE)
            | (Established | UdpReady, CMD_CLOSE | CMD_DISCON) => self.release(),
            (Established | UdpReady, CMD_SEND) => self.send(cfg),
            (Established | UdpReady, CMD_RECV) => self.update_received_size(),
            _ => trace!("socket {}: command ignored", self.index),
        }
    }

    fn reset_pointers(&mut self) {
        self.regs.write16(RX_RSR, 0);
        self.regs.write16(RX_RD, 0);
        self.rx_write_idx = 0;
        self.regs.write16(TX_RD, 0);
        self.regs.write16(TX_WR, 0);
        self.regs.write16(TX_FSR, RING_SIZE as u16);
        self.send_end = None;
    }

    fn open(&mut self, cfg: &NetConfig) {
        let Some(protocol) = Protocol::from_mode(self.regs.get(MR)) else {
            warn!("socket {}: OPEN with unsupported mode 0x{:02X}", self.index, self.regs.get(MR));
            return;
        };
        self.host = HostSocket::None;
        self.reset_pointers();

        match protocol {
            Protocol::Tcp => match HostSocket::tcp() {
                Ok(host) => {
                    self.host = host;
                    self.protocol = Some(protocol);
                    self.set_status(SocketStatus::Init);
                }
                Err(e) => warn!("socket {}: TCP socket creation failed: {}", self.index, e),
            },
            Protocol::Udp => {
                let local = SocketAddrV4::new(cfg.bind_addr, cfg.remap_port(self.regs.read16(PORT)));
                let host = match HostSocket::bind_udp(local) {
                    Ok(h) => h,
                    Err(e) => {
                        warn!("socket {}: UDP bind {} failed: {}", self.index, local, e);
                        return;
                    }
                };
                if self.regs.get(MR) & MR_MULTICAST != 0 {
                    let group = self.regs.dest_ip();
                    if let Err(e) = host.join_multicast(group, cfg.bind_addr) {
                        warn!("socket {}: multicast join {} failed: {}", self.index, group, e);
                    }
                }
                self.host = host;
                self.protocol = Some(protocol);
                self.set_status(SocketStatus::UdpReady);
            }
        }
    }

    fn connect(&mut self, cfg: &NetConfig) {
        if self.host.is_connecting() {
            trace!("socket {}: CONNECT while connecting ignored", self.index);
            return;
        }
        let dest = SocketAddrV4::new(self.regs.dest_ip(), cfg.remap_port(self.regs.read16(DPORT)));
        match self.host.connect(dest) {
            Ok(()) => debug!("socket {}: connecting to {}", self.index, dest),
            Err(e) => warn!("socket {}: connect {} failed: {}", self.index, dest, e),
        }
    }

    /// Finish an outbound connect, or start over with a fresh socket.
    fn poll_connect(&mut self) {
        match self.host.poll_connect() {
            Ok(Some(peer)) => {
                info!("socket {}: connected to {}", self.index, peer);
                self.set_status(SocketStatus::Established);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("socket {}: connect failed: {}", self.index, e);
                match HostSocket::tcp() {
                    Ok(host) => self.host = host,
                    Err(e) => {
                        warn!("socket {}: TCP socket creation failed: {}", self.index, e);
                        self.release();
                    }
                }
            }
        }
    }

    fn listen(&mut self, cfg: &NetConfig) {
        let local = SocketAddrV4::new(cfg.bind_addr, cfg.remap_port(self.regs.read16(PORT)));
        match self.host.listen(local) {
            Ok(()) => self.set_status(SocketStatus::Listen),
            Err(e) => warn!("socket {}: listen {} failed: {}", self.index, local, e),
        }
    }

    fn send(&mut self, cfg: &NetConfig) {
        match self.status {
            SocketStatus::Established => {
                self.send_end = Some(self.tx_write_ptr());
                self.flush_stream();
            }
            SocketStatus::UdpReady => {
                let rr = self.tx_read_ptr();
                let len = distance(rr, self.tx_write_ptr());
                if len > 0 {
                    let data = self.tx.copy_out(rr, len as usize);
                    debug!("socket {}: send {} bytes", self.index, len);
                    self.send_datagram(&data, cfg);
                }
                self.complete_send(rr.wrapping_add(len));
            }
            _ => {}
        }
    }

    fn complete_send(&mut self, tx_rd: u16) {
        self.regs.write16(TX_RD, tx_rd & RING_MASK);
        self.update_free_size();
        self.regs.set(IR, self.regs.get(IR) | IR_SEND_OK);
    }

    /// Hand queued TCP bytes to the OS. TX_RD only moves past bytes the OS
    /// accepted; SEND_OK waits until the whole SEND has gone out.
    fn flush_stream(&mut self) {
        let Some(end) = self.send_end else {
            return;
        };
        let rr = self.tx_read_ptr();
        let len = distance(rr, end) as usize;
        let sent = if len == 0 {
            0
        } else {
            let data = self.tx.copy_out(rr, len);
            match self.host.send_stream(&data) {
                Ok(n) => n,
                Err(e) => {
                    warn!("socket {}: send failed: {}", self.index, e);
                    self.release();
                    return;
                }
            }
        };
        if sent < len {
            if sent > 0 {
                debug!("socket {}: sent {} of {} bytes", self.index, sent, len);
                self.regs.write16(TX_RD, rr.wrapping_add(sent as u16) & RING_MASK);
                self.update_free_size();
            }
            return;
        }
        if len > 0 {
            debug!("socket {}: send {} bytes", self.index, len);
        }
        self.send_end = None;
        self.complete_send(end);
    }

    fn send_datagram(&mut self, data: &[u8], cfg: &NetConfig) {
        let dport = self.regs.read16(DPORT);
        match dport {
            DHCP_SERVER_PORT => {
                debug!("socket {}: DHCP request answered on loopback", self.index);
                let reply = dhcp::respond(data, cfg.bind_addr, cfg.server_addr);
                self.deliver(&reply);
            }
            NTP_PORT => match sntp::respond(data, cfg.server_addr, sntp::unix_now()) {
                Some(reply) => {
                    debug!("socket {}: NTP request answered on loopback", self.index);
                    self.deliver(&reply);
                }
                None => warn!("socket {}: dropped {}-byte NTP request", self.index, data.len()),
            },
            _ => {
                let dest = SocketAddrV4::new(self.regs.dest_ip(), cfg.remap_port(dport));
                if let Err(e) = self.host.send_to(data, dest) {
                    warn!("socket {}: send_to {} failed: {}", self.index, dest, e);
                }
            }
        }
    }

    /// Append bytes to the RX ring and raise RECV.
    ///
    /// Data that does not fit is dropped whole so unread bytes are never
    /// overwritten.
    pub fn deliver(&mut self, data: &[u8]) -> bool {
        if data.len() > self.rx_free() {
            warn!("socket {}: RX ring full, dropped {} bytes", self.index, data.len());
            return false;
        }
        self.rx_write_idx = self.rx.copy_in(self.rx_write_idx, data);
        self.update_received_size();
        self.regs.set(IR, self.regs.get(IR) | IR_RECV);
        true
    }

    // ─── Per-step polling ───────────────────────────────────────────────────

    pub fn poll(&mut self) {
        let free = self.rx_free();
        match self.status {
            SocketStatus::Listen => match self.host.poll_accept() {
                Ok(Some(peer)) => {
                    info!("socket {}: accepted {}", self.index, peer);
                    self.regs.set_dest_ip(*peer.ip());
                    self.regs.write16(DPORT, peer.port());
                    self.set_status(SocketStatus::Established);
                }
                Ok(None) => {}
                Err(e) => warn!("socket {}: accept failed: {}", self.index, e),
            },
            SocketStatus::Init => self.poll_connect(),
            SocketStatus::Established => {
                self.flush_stream();
                self.poll_received(free);
            }
            SocketStatus::UdpReady => self.poll_datagram(free),
            SocketStatus::Closed => {}
        }
    }

    fn poll_received(&mut self, free: usize) {
        match self.host.poll_stream(free) {
            StreamEvent::Idle => {}
            StreamEvent::Data(data) => {
                debug!("socket {}: received {} bytes", self.index, data.len());
                self.deliver(&data);
            }
            StreamEvent::Closed => {
                info!("socket {}: peer disconnected", self.index);
                self.release();
            }
        }
    }

    fn poll_datagram(&mut self, free: usize) {
        match self.host.poll_datagram(free, &mut self.scratch) {
            Ok(DatagramEvent::Received { from, len }) => {
                debug!("socket {}: datagram of {} bytes from {}", self.index, len, from);
                let mut buf = Vec::with_capacity(loopback::UDP_HEADER_LEN + len);
                buf.extend_from_slice(&loopback::udp_header(*from.ip(), from.port(), len));
                buf.extend_from_slice(&self.scratch[..len]);
                self.deliver(&buf);
            }
            Ok(DatagramEvent::Dropped(n)) => {
                warn!("socket {}: dropped oversized datagram ({} bytes)", self.index, n);
            }
            Ok(DatagramEvent::Idle | DatagramEvent::Pending(_)) => {}
            Err(e) => warn!("socket {}: recv failed: {}", self.index, e),
        }
    }

    // ─── Save state ─────────────────────────────────────────────────────────

    pub fn save_state(&self) -> SocketState {
        SocketState {
            regs: self.regs.as_slice().to_vec(),
            tx: self.tx.as_slice().to_vec(),
            rx: self.rx.as_slice().to_vec(),
            rx_write_idx: self.rx_write_idx,
        }
    }

    /// Restore registers and rings. The socket is always left CLOSED.
    pub fn load_state(&mut self, state: &SocketState) {
        self.host = HostSocket::None;
        self.protocol = None;
        self.send_end = None;
        self.regs.load(&state.regs);
        self.tx.load(&state.tx);
        self.rx.load(&state.rx);
        self.rx_write_idx = state.rx_write_idx & RING_MASK;
        self.status = SocketStatus::Closed;
        self.regs.set(SR, SR_CLOSED);
    }
}
