//! Loopback DHCP server.
//!
//! Replies are a fixed 300-byte BOOTP message preceded by the UDP receive
//! header. The client's transaction id and hardware address are echoed, the
//! leased address is the chip's loopback bind address, and the server,
//! router and server-identifier fields all name the loopback server.
//!
//! ```text
//!   0  op=2  htype hlen hops   (copied except op)
//!   4  xid                     (copied)
//!   8  secs flags ciaddr       (copied)
//!  16  yiaddr = leased address
//!  20  siaddr = server address
//!  24  giaddr chaddr sname file (copied)
//! 236  magic cookie 63 82 53 63
//! 240  53,1,type  1,4,mask  3,4,router  54,4,server  255  (zero pad)
//! ```

use std::net::Ipv4Addr;

use super::{udp_header, DHCP_SERVER_PORT, UDP_HEADER_LEN};

/// BOOTP message length produced by the responder.
pub const REPLY_LEN: usize = 300;
/// Offset of the magic cookie in a BOOTP message.
const COOKIE_OFFSET: usize = 236;
/// Offset of the first option.
const OPTIONS_OFFSET: usize = 240;
const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const OP_BOOTREPLY: u8 = 2;

const OPT_PAD: u8 = 0;
const OPT_SUBNET_MASK: u8 = 1;
const OPT_ROUTER: u8 = 3;
const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_SERVER_ID: u8 = 54;
const OPT_END: u8 = 255;

pub const DHCP_DISCOVER: u8 = 1;
pub const DHCP_OFFER: u8 = 2;
pub const DHCP_REQUEST: u8 = 3;
pub const DHCP_ACK: u8 = 5;

/// Find the message-type option in a client request.
///
/// Walks the option list after the magic cookie; returns `None` for a
/// truncated request or one without option 53.
pub fn message_type(request: &[u8]) -> Option<u8> {
    let mut i = OPTIONS_OFFSET;
    while i < request.len() {
        match request[i] {
            OPT_PAD => i += 1,
            OPT_END => return None,
            code => {
                let len = *request.get(i + 1)? as usize;
                if code == OPT_MESSAGE_TYPE && len >= 1 {
                    return request.get(i + 2).copied();
                }
                i += 2 + len;
            }
        }
    }
    None
}

/// Build the reply (UDP header included) for a client request.
pub fn respond(request: &[u8], leased: Ipv4Addr, server: Ipv4Addr) -> Vec<u8> {
    let mut msg = vec![0u8; REPLY_LEN];
    let copy_len = request.len().min(COOKIE_OFFSET);
    msg[..copy_len].copy_from_slice(&request[..copy_len]);

    msg[0] = OP_BOOTREPLY;
    msg[16..20].copy_from_slice(&leased.octets());
    msg[20..24].copy_from_slice(&server.octets());
    msg[COOKIE_OFFSET..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);

    let reply_type = if message_type(request) == Some(DHCP_DISCOVER) {
        DHCP_OFFER
    } else {
        DHCP_ACK
    };
    let s = server.octets();
    let options = [
        OPT_MESSAGE_TYPE, 1, reply_type,
        OPT_SUBNET_MASK, 4, 255, 255, 255, 0,
        OPT_ROUTER, 4, s[0], s[1], s[2], s[3],
        OPT_SERVER_ID, 4, s[0], s[1], s[2], s[3],
        OPT_END,
    ];
    msg[OPTIONS_OFFSET..OPTIONS_OFFSET + options.len()].copy_from_slice(&options);

    let mut out = Vec::with_capacity(UDP_HEADER_LEN + REPLY_LEN);
    out.extend_from_slice(&udp_header(server, DHCP_SERVER_PORT, REPLY_LEN));
    out.extend_from_slice(&msg);
    out
}
