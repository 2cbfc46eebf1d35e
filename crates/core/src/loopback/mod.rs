//! Loopback service responders.
//!
//! UDP datagrams sent to the DHCP server port or the NTP port never reach
//! the real network. The socket engine hands the transmit window to one of
//! these responders and feeds the reply straight into its receive ring,
//! which gives firmware a working DHCP lease and clock without any host
//! setup.
//!
//! - [`dhcp`] - answers DISCOVER with OFFER and anything else with ACK
//! - [`sntp`] - stamps the transmit timestamp with the host wall clock

pub mod dhcp;
pub mod sntp;

use std::net::Ipv4Addr;

/// DHCP server port (client → server)
pub const DHCP_SERVER_PORT: u16 = 67;
/// DHCP client port (server → client)
pub const DHCP_CLIENT_PORT: u16 = 68;
/// NTP / SNTP port
pub const NTP_PORT: u16 = 123;

/// Size of the UDP receive pseudo-header the chip prepends to each datagram.
pub const UDP_HEADER_LEN: usize = 8;

/// Build the 8-byte UDP receive header: source IP, source port, payload length.
pub fn udp_header(src: Ipv4Addr, port: u16, len: usize) -> [u8; UDP_HEADER_LEN] {
    let ip = src.octets();
    let port = port.to_be_bytes();
    let len = (len as u16).to_be_bytes();
    [ip[0], ip[1], ip[2], ip[3], port[0], port[1], len[0], len[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_header_layout() {
        let hdr = udp_header(Ipv4Addr::new(127, 0, 0, 1), 123, 48);
        assert_eq!(hdr, [127, 0, 0, 1, 0x00, 0x7B, 0x00, 0x30]);
    }
}
