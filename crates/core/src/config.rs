//! Host-side network configuration.
//!
//! The emulated chip never touches the host's real interface addresses.
//! Every socket binds to a dedicated loopback address, and privileged
//! service ports are moved above 1024 so no elevated rights are needed.
//! Remapping only affects the OS side: registers keep the values the
//! firmware wrote.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::loopback::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT, NTP_PORT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    /// Address all sockets bind and listen on; also the leased address
    /// handed out by the loopback DHCP server.
    pub bind_addr: Ipv4Addr,
    /// Address the loopback DHCP/NTP servers claim as their own.
    pub server_addr: Ipv4Addr,
    /// (register port, OS port) pairs.
    pub port_remap: Vec<(u16, u16)>,
    /// Suggested interval between steps, in nanoseconds.
    pub step_interval_ns: u64,
}

impl NetConfig {
    /// OS-side port for a port number written by the firmware.
    pub fn remap_port(&self, port: u16) -> u16 {
        self.port_remap
            .iter()
            .find(|(from, _)| *from == port)
            .map(|(_, to)| *to)
            .unwrap_or(port)
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            bind_addr: Ipv4Addr::new(127, 0, 0, 100),
            server_addr: Ipv4Addr::new(127, 0, 0, 1),
            port_remap: vec![
                (DHCP_SERVER_PORT, 6967),
                (DHCP_CLIENT_PORT, 6968),
                (NTP_PORT, 10123),
            ],
            step_interval_ns: 1000,
        }
    }
}
