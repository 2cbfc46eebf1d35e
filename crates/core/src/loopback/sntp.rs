//! Loopback SNTP server.
//!
//! The request is echoed with only the transmit timestamp replaced, which
//! is the one field SNTP clients read. Requests that are not exactly one
//! NTP packet long are dropped.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{udp_header, NTP_PORT, UDP_HEADER_LEN};

/// NTP packet size without extension fields.
pub const PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
pub const NTP_EPOCH_OFFSET: u64 = 2_208_988_800;
/// Offset of the transmit timestamp (seconds, then fraction).
const TX_TIMESTAMP: usize = 40;

/// Build the reply (UDP header included), or `None` for a malformed request.
pub fn respond(request: &[u8], server: Ipv4Addr, unix_secs: u64) -> Option<Vec<u8>> {
    if request.len() != PACKET_LEN {
        return None;
    }
    let mut out = Vec::with_capacity(UDP_HEADER_LEN + PACKET_LEN);
    out.extend_from_slice(&udp_header(server, NTP_PORT, PACKET_LEN));
    out.extend_from_slice(request);

    let ntp_secs = unix_secs.wrapping_add(NTP_EPOCH_OFFSET) as u32;
    let ts = UDP_HEADER_LEN + TX_TIMESTAMP;
    out[ts..ts + 4].copy_from_slice(&ntp_secs.to_be_bytes());
    out[ts + 4..ts + 8].copy_from_slice(&[0; 4]);
    Some(out)
}

/// Host wall clock in seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
