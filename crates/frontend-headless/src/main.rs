//! Headless bench for the emulated Wiznet chip.
//!
//! Plays the part of the microcontroller: every register and buffer access
//! goes over the four SPI lines through [`SpiMaster`], exactly as firmware
//! would drive a real chip.
//!
//! Demos:
//!
//! - **regs**: Dump the common block and all socket banks
//! - **dhcp**: Open socket 0 as UDP/68, send DISCOVER, print the offered lease
//! - **ntp**: Open socket 0 as UDP, query port 123, print the returned time
//!
//! Set `RUST_LOG=debug` (or `trace` for every bus transaction) to watch
//! the chip work.

use clap::{Parser, ValueEnum};
use log::{error, info};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;

use wiznet_core::loopback::{dhcp, sntp, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, NTP_PORT, UDP_HEADER_LEN};
use wiznet_core::socket::registers as sreg;
use wiznet_core::{ChipModel, NetConfig, SpiMaster, WiznetChip};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Demo {
    Regs,
    Dhcp,
    Ntp,
}

#[derive(Debug, Parser)]
#[command(name = "wiznet-emu", version, about = "Wiznet W5100/W5500 SPI Ethernet emulator bench")]
struct Args {
    /// Chip model: 5100 or 5500
    #[arg(long, default_value = "5500")]
    model: ChipModel,

    /// Demo to run
    #[arg(long, value_enum, default_value = "regs")]
    demo: Demo,

    /// Loopback address the chip's sockets bind to
    #[arg(long)]
    bind: Option<Ipv4Addr>,

    /// Restore chip state before running the demo
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Save chip state after the demo
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Maximum chip steps to wait for a reply
    #[arg(long, default_value_t = 200_000)]
    max_steps: usize,
}

/// Flat address of a socket register.
fn sock_reg(n: u16, cell: usize) -> u16 {
    0x0400 + n * 0x100 + cell as u16
}

fn tx_base(n: u16) -> u16 {
    0x4000 + n * 0x800
}

fn rx_base(n: u16) -> u16 {
    0x6000 + n * 0x800
}

const RING_MASK: u16 = 0x07FF;

/// Issue a socket command and wait for CR to read back 0.
fn command(m: &mut SpiMaster, n: u16, cmd: u8) {
    m.write_u8(sock_reg(n, sreg::CR), cmd);
    while m.read_u8(sock_reg(n, sreg::CR)) != 0 {}
}

fn open_udp(m: &mut SpiMaster, n: u16, port: u16) -> Result<(), String> {
    m.write_u8(sock_reg(n, sreg::MR), sreg::MR_UDP);
    m.write_u16(sock_reg(n, sreg::PORT), port);
    command(m, n, sreg::CMD_OPEN);
    match m.read_u8(sock_reg(n, sreg::SR)) {
        sreg::SR_UDP => Ok(()),
        sr => Err(format!("socket {} failed to open (SR=0x{:02X})", n, sr)),
    }
}

/// Queue `data` in the TX ring and SEND it to `dest:port`.
fn send_to(m: &mut SpiMaster, n: u16, dest: Ipv4Addr, port: u16, data: &[u8]) {
    m.write(sock_reg(n, sreg::DIPR), &dest.octets());
    m.write_u16(sock_reg(n, sreg::DPORT), port);
    let wr = m.read_u16(sock_reg(n, sreg::TX_WR));
    for (i, &b) in data.iter().enumerate() {
        let off = wr.wrapping_add(i as u16) & RING_MASK;
        m.write_u8(tx_base(n) + off, b);
    }
    m.write_u16(sock_reg(n, sreg::TX_WR), wr.wrapping_add(data.len() as u16));
    command(m, n, sreg::CMD_SEND);
}

/// Wait for a received datagram and consume it from the RX ring.
fn recv(m: &mut SpiMaster, n: u16, max_steps: usize) -> Option<Vec<u8>> {
    let mut waited = 0;
    let size = loop {
        let size = m.read_u16(sock_reg(n, sreg::RX_RSR));
        if size > 0 {
            break size;
        }
        if waited >= max_steps {
            return None;
        }
        m.idle(1000);
        waited += 1000;
    };
    let rd = m.read_u16(sock_reg(n, sreg::RX_RD));
    let data = (0..size)
        .map(|i| m.read_u8(rx_base(n) + (rd.wrapping_add(i) & RING_MASK)))
        .collect();
    m.write_u16(sock_reg(n, sreg::RX_RD), rd.wrapping_add(size));
    command(m, n, sreg::CMD_RECV);
    Some(data)
}

fn discover_packet(mac: &[u8]) -> Vec<u8> {
    let mut p = vec![0u8; dhcp::REPLY_LEN];
    p[0] = 1; // BOOTREQUEST
    p[1] = 1; // ethernet
    p[2] = 6;
    p[4..8].copy_from_slice(&[0x39, 0x03, 0xF3, 0x26]);
    p[28..28 + mac.len()].copy_from_slice(mac);
    p[236..240].copy_from_slice(&[99, 130, 83, 99]);
    p[240..244].copy_from_slice(&[53, 1, dhcp::DHCP_DISCOVER, 255]);
    p
}

fn run_regs(chip: &WiznetChip) {
    print!("{}", chip.dump_common());
    for n in 0..4 {
        if let Some(dump) = chip.dump_socket(n) {
            print!("{}", dump);
        }
    }
}

fn run_dhcp(chip: &mut WiznetChip, max_steps: usize) -> Result<(), String> {
    let mut m = SpiMaster::new(chip);
    let mac = [0x02, 0x00, 0x00, 0x57, 0x49, 0x5A];
    m.write(0x0009, &mac);
    open_udp(&mut m, 0, DHCP_CLIENT_PORT)?;
    send_to(&mut m, 0, Ipv4Addr::BROADCAST, DHCP_SERVER_PORT, &discover_packet(&mac));
    let reply = recv(&mut m, 0, max_steps).ok_or("no DHCP reply")?;
    command(&mut m, 0, sreg::CMD_CLOSE);

    let msg = reply.get(UDP_HEADER_LEN..).ok_or("short DHCP reply")?;
    if msg.len() < 24 {
        return Err("short DHCP reply".into());
    }
    let lease = Ipv4Addr::new(msg[16], msg[17], msg[18], msg[19]);
    let server = Ipv4Addr::new(msg[20], msg[21], msg[22], msg[23]);
    let kind = match dhcp::message_type(msg) {
        Some(dhcp::DHCP_OFFER) => "OFFER",
        Some(dhcp::DHCP_ACK) => "ACK",
        _ => "?",
    };
    println!("DHCP {}: lease {} from {}", kind, lease, server);
    Ok(())
}

fn run_ntp(chip: &mut WiznetChip, max_steps: usize) -> Result<(), String> {
    let server = chip.config().server_addr;
    let mut m = SpiMaster::new(chip);
    open_udp(&mut m, 0, 8888)?;
    let mut req = [0u8; sntp::PACKET_LEN];
    req[0] = 0x1B; // LI=0, VN=3, Mode=3 (client)
    send_to(&mut m, 0, server, NTP_PORT, &req);
    let reply = recv(&mut m, 0, max_steps).ok_or("no NTP reply")?;
    command(&mut m, 0, sreg::CMD_CLOSE);

    let ts = UDP_HEADER_LEN + 40;
    let secs = reply
        .get(ts..ts + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64)
        .ok_or("short NTP reply")?;
    println!(
        "NTP transmit time: {} (unix {})",
        secs,
        secs.saturating_sub(sntp::NTP_EPOCH_OFFSET)
    );
    Ok(())
}

fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut config = NetConfig::default();
    if let Some(addr) = args.bind {
        config.bind_addr = addr;
    }
    let mut chip = WiznetChip::with_config(args.model, config);
    info!("{} ready, bind address {}", chip.model(), chip.config().bind_addr);

    if let Some(path) = &args.load_state {
        if let Err(e) = chip.load_state_from_file(path) {
            error!("load state {}: {}", path.display(), e);
            process::exit(1);
        }
    }

    let result = match args.demo {
        Demo::Regs => {
            run_regs(&chip);
            Ok(())
        }
        Demo::Dhcp => run_dhcp(&mut chip, args.max_steps),
        Demo::Ntp => run_ntp(&mut chip, args.max_steps),
    };
    if let Err(e) = result {
        error!("{:?} demo failed: {}", args.demo, e);
        process::exit(1);
    }

    if let Some(path) = &args.save_state {
        match chip.save_state_to_file(path) {
            Ok(()) => info!("state saved to {}", path.display()),
            Err(e) => {
                error!("save state {}: {}", path.display(), e);
                process::exit(1);
            }
        }
    }
    info!("{} steps", chip.steps());
}
