//! Host OS resource behind an emulated socket.
//!
//! Each socket owns at most one OS object. Replacing the value with
//! [`HostSocket::None`] drops it, which closes the descriptor; there is no
//! separate close path to forget. All objects are switched to non-blocking
//! mode as soon as they exist so that polling from `step` never stalls the
//! emulation.
//!
//! A TCP socket starts as a bare [`socket2::Socket`] created by OPEN. LISTEN
//! binds and listens on it; CONNECT starts a non-blocking connect whose
//! outcome is picked up by [`HostSocket::poll_connect`].

use socket2::{Domain, Protocol as IpProtocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};

use super::ring::RING_SIZE;
use crate::loopback::UDP_HEADER_LEN;

/// Largest datagram payload that can ever fit in an empty RX ring.
pub const MAX_DATAGRAM: usize = RING_SIZE - 1 - UDP_HEADER_LEN;

/// Pending connections queued by the OS for a listening socket.
const LISTEN_BACKLOG: i32 = 5;

/// `recv` on Windows reports a datagram larger than the buffer as an error.
#[cfg(windows)]
const WSAEMSGSIZE: i32 = 10040;

#[derive(Debug, Default)]
pub enum HostSocket {
    #[default]
    None,
    /// Created by OPEN; not yet bound, listening or connecting.
    Tcp(Socket),
    Connecting { socket: Socket, dest: SocketAddrV4 },
    Listener(TcpListener),
    Stream(TcpStream),
    Datagram(UdpSocket),
}

/// Result of polling a connected stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Idle,
    Data(Vec<u8>),
    Closed,
}

/// Result of polling a datagram socket.
#[derive(Debug, PartialEq, Eq)]
pub enum DatagramEvent {
    Idle,
    /// A datagram is queued but does not fit yet; it stays in the OS queue.
    Pending(usize),
    /// The payload is in the first `len` bytes of the caller's buffer.
    Received { from: SocketAddrV4, len: usize },
    /// A datagram too large for the ring was consumed and thrown away.
    Dropped(usize),
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock
}

/// A non-blocking connect that has started but not finished.
#[cfg(unix)]
fn connect_in_progress(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EINPROGRESS) || would_block(e)
}

#[cfg(not(unix))]
fn connect_in_progress(e: &io::Error) -> bool {
    would_block(e)
}

/// Datagram larger than the receive buffer.
#[cfg(windows)]
fn truncated(e: &io::Error) -> bool {
    e.raw_os_error() == Some(WSAEMSGSIZE)
}

#[cfg(not(windows))]
fn truncated(_: &io::Error) -> bool {
    false
}

fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(a) => a,
        SocketAddr::V6(a) => SocketAddrV4::new(
            a.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
            a.port(),
        ),
    }
}

fn not_in_state(what: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, format!("host socket is not {}", what))
}

impl HostSocket {
    /// Unbound non-blocking TCP socket.
    pub fn tcp() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(IpProtocol::TCP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        Ok(HostSocket::Tcp(socket))
    }

    /// Bind the OPEN socket to `local` and listen on it.
    pub fn listen(&mut self, local: SocketAddrV4) -> io::Result<()> {
        let HostSocket::Tcp(socket) = self else {
            return Err(not_in_state("open"));
        };
        socket.bind(&SockAddr::from(local))?;
        socket.listen(LISTEN_BACKLOG)?;
        if let HostSocket::Tcp(socket) = std::mem::take(self) {
            *self = HostSocket::Listener(socket.into());
        }
        Ok(())
    }

    /// Start connecting the OPEN socket to `dest`. Returns at once; the
    /// result arrives through [`poll_connect`](Self::poll_connect).
    pub fn connect(&mut self, dest: SocketAddrV4) -> io::Result<()> {
        let HostSocket::Tcp(socket) = self else {
            return Err(not_in_state("open"));
        };
        match socket.connect(&SockAddr::from(dest)) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(e),
        }
        if let HostSocket::Tcp(socket) = std::mem::take(self) {
            *self = HostSocket::Connecting { socket, dest };
        }
        Ok(())
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, HostSocket::Connecting { .. })
    }

    /// Check an outbound connect without waiting. Returns the peer once the
    /// stream is up; a refused or failed connect comes back as the error.
    pub fn poll_connect(&mut self) -> io::Result<Option<SocketAddrV4>> {
        let HostSocket::Connecting { socket, dest } = self else {
            return Ok(None);
        };
        let dest = *dest;
        if let Some(e) = socket.take_error()? {
            return Err(e);
        }
        match socket.peer_addr() {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected || would_block(&e) => return Ok(None),
            Err(e) => return Err(e),
        }
        if let HostSocket::Connecting { socket, .. } = std::mem::take(self) {
            let stream: TcpStream = socket.into();
            stream.set_nodelay(true)?;
            *self = HostSocket::Stream(stream);
        }
        Ok(Some(dest))
    }

    pub fn bind_udp(local: SocketAddrV4) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(HostSocket::Datagram(socket))
    }

    /// Join `group` on the interface owning `iface`. Only valid for datagram sockets.
    pub fn join_multicast(&self, group: Ipv4Addr, iface: Ipv4Addr) -> io::Result<()> {
        match self {
            HostSocket::Datagram(s) => s.join_multicast_v4(&group, &iface),
            _ => Err(not_in_state("a datagram socket")),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HostSocket::None)
    }

    /// Local OS address, if bound.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        let addr = match self {
            HostSocket::None => return None,
            HostSocket::Tcp(s) | HostSocket::Connecting { socket: s, .. } => {
                return s.local_addr().ok().and_then(|a| a.as_socket_ipv4());
            }
            HostSocket::Listener(l) => l.local_addr(),
            HostSocket::Stream(s) => s.local_addr(),
            HostSocket::Datagram(s) => s.local_addr(),
        };
        addr.ok().map(v4)
    }

    /// Accept one pending connection. On success the listener is dropped and
    /// the accepted stream takes its place.
    pub fn poll_accept(&mut self) -> io::Result<Option<SocketAddrV4>> {
        let HostSocket::Listener(listener) = self else {
            return Ok(None);
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                *self = HostSocket::Stream(stream);
                Ok(Some(v4(peer)))
            }
            Err(e) if would_block(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read at most `max` bytes from a connected stream.
    ///
    /// An orderly shutdown by the peer or a hard socket error both report
    /// [`StreamEvent::Closed`].
    pub fn poll_stream(&mut self, max: usize) -> StreamEvent {
        let HostSocket::Stream(stream) = self else {
            return StreamEvent::Idle;
        };
        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => return StreamEvent::Closed,
            Ok(_) => {}
            Err(e) if would_block(&e) => return StreamEvent::Idle,
            Err(_) => return StreamEvent::Closed,
        }
        if max == 0 {
            return StreamEvent::Idle;
        }
        let mut buf = vec![0u8; max];
        match stream.read(&mut buf) {
            Ok(0) => StreamEvent::Closed,
            Ok(n) => {
                buf.truncate(n);
                StreamEvent::Data(buf)
            }
            Err(e) if would_block(&e) => StreamEvent::Idle,
            Err(_) => StreamEvent::Closed,
        }
    }

    /// Receive one datagram into `buf` if it fits in `free` bytes together
    /// with the receive header. `buf` must hold at least `MAX_DATAGRAM + 1`
    /// bytes so an oversized datagram can be told apart.
    pub fn poll_datagram(&mut self, free: usize, buf: &mut [u8]) -> io::Result<DatagramEvent> {
        let HostSocket::Datagram(socket) = self else {
            return Ok(DatagramEvent::Idle);
        };
        let len = match socket.peek_from(buf) {
            Ok((n, _)) => n,
            Err(e) if would_block(&e) => return Ok(DatagramEvent::Idle),
            Err(e) if truncated(&e) => buf.len(),
            Err(e) => return Err(e),
        };
        if len > MAX_DATAGRAM {
            match socket.recv_from(buf) {
                Ok(_) => {}
                Err(e) if truncated(&e) => {}
                Err(e) => return Err(e),
            }
            return Ok(DatagramEvent::Dropped(len));
        }
        if len + UDP_HEADER_LEN > free {
            return Ok(DatagramEvent::Pending(len));
        }
        let (n, from) = socket.recv_from(buf)?;
        Ok(DatagramEvent::Received { from: v4(from), len: n })
    }

    /// Write as much of `data` as the OS accepts right now. Returns the
    /// number of bytes taken, which is short once the send buffer is full.
    pub fn send_stream(&mut self, data: &[u8]) -> io::Result<usize> {
        let HostSocket::Stream(stream) = self else {
            return Err(io::Error::new(ErrorKind::NotConnected, "no connected stream"));
        };
        let mut sent = 0;
        while sent < data.len() {
            match stream.write(&data[sent..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => sent += n,
                Err(e) if would_block(&e) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    pub fn send_to(&self, data: &[u8], dest: SocketAddrV4) -> io::Result<()> {
        match self {
            HostSocket::Datagram(socket) => socket.send_to(data, dest).map(|_| ()),
            _ => Err(io::Error::new(ErrorKind::NotConnected, "no datagram socket")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    const LOCALHOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

    fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> Option<T> {
        for _ in 0..1000 {
            if let Some(v) = f() {
                return Some(v);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_listen_accept_and_read() {
        let mut sock = HostSocket::tcp().unwrap();
        sock.listen(SocketAddrV4::new(LOCALHOST, 0)).unwrap();
        let addr = sock.local_addr().unwrap();
        assert_eq!(sock.poll_accept().unwrap(), None);

        let mut client = TcpStream::connect(addr).unwrap();
        let peer = wait_for(|| sock.poll_accept().unwrap());
        assert_eq!(peer.unwrap(), v4(client.local_addr().unwrap()));
        assert!(matches!(sock, HostSocket::Stream(_)));

        client.write_all(b"ping").unwrap();
        let got = wait_for(|| match sock.poll_stream(16) {
            StreamEvent::Idle => None,
            ev => Some(ev),
        });
        assert_eq!(got, Some(StreamEvent::Data(b"ping".to_vec())));

        drop(client);
        assert!(wait_for(|| (sock.poll_stream(16) == StreamEvent::Closed).then_some(())).is_some());
    }

    #[test]
    fn test_connect_completes_in_poll() {
        let server = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let dest = v4(server.local_addr().unwrap());
        let mut sock = HostSocket::tcp().unwrap();
        sock.connect(dest).unwrap();
        assert!(sock.is_connecting());

        let peer = wait_for(|| sock.poll_connect().unwrap());
        assert_eq!(peer, Some(dest));
        assert!(matches!(sock, HostSocket::Stream(_)));
        let (_, from) = server.accept().unwrap();
        assert_eq!(sock.local_addr(), Some(v4(from)));
    }

    #[test]
    fn test_refused_connect_reports_error() {
        let dest = {
            let l = TcpListener::bind((LOCALHOST, 0)).unwrap();
            v4(l.local_addr().unwrap())
        };
        let mut sock = HostSocket::tcp().unwrap();
        let outcome = match sock.connect(dest) {
            Err(e) => Some(e.kind()),
            Ok(()) => wait_for(|| match sock.poll_connect() {
                Ok(None) => None,
                Ok(Some(_)) => panic!("connected to a closed port"),
                Err(e) => Some(e.kind()),
            }),
        };
        assert_eq!(outcome, Some(ErrorKind::ConnectionRefused));
    }

    #[test]
    fn test_commands_need_an_open_socket() {
        let mut sock = HostSocket::None;
        assert!(sock.listen(SocketAddrV4::new(LOCALHOST, 0)).is_err());
        assert!(sock.connect(SocketAddrV4::new(LOCALHOST, 1)).is_err());
        assert_eq!(sock.poll_connect().unwrap(), None);
    }

    #[test]
    fn test_stream_send_stops_when_buffer_full() {
        let server = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        client.set_nonblocking(true).unwrap();
        let (_peer, _) = server.accept().unwrap();
        let mut sock = HostSocket::Stream(client);

        // The peer never reads, so the OS eventually stops taking bytes
        let chunk = vec![0x5A; 64 * 1024];
        let mut short = false;
        for _ in 0..4096 {
            if sock.send_stream(&chunk).unwrap() < chunk.len() {
                short = true;
                break;
            }
        }
        assert!(short);
    }

    #[test]
    fn test_datagram_waits_for_room() {
        let mut sock = HostSocket::bind_udp(SocketAddrV4::new(LOCALHOST, 0)).unwrap();
        let addr = sock.local_addr().unwrap();
        let sender = UdpSocket::bind((LOCALHOST, 0)).unwrap();
        sender.send_to(&[7u8; 20], addr).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let ev = wait_for(|| match sock.poll_datagram(10, &mut buf).unwrap() {
            DatagramEvent::Idle => None,
            ev => Some(ev),
        });
        assert_eq!(ev, Some(DatagramEvent::Pending(20)));

        match sock.poll_datagram(RING_SIZE, &mut buf).unwrap() {
            DatagramEvent::Received { from, len } => {
                assert_eq!(from, v4(sender.local_addr().unwrap()));
                assert_eq!(&buf[..len], &[7u8; 20]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_datagram_dropped_once() {
        let mut sock = HostSocket::bind_udp(SocketAddrV4::new(LOCALHOST, 0)).unwrap();
        let addr = sock.local_addr().unwrap();
        let sender = UdpSocket::bind((LOCALHOST, 0)).unwrap();
        sender.send_to(&[1u8; MAX_DATAGRAM + 100], addr).unwrap();
        sender.send_to(b"ok", addr).unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let ev = wait_for(|| match sock.poll_datagram(RING_SIZE, &mut buf).unwrap() {
            DatagramEvent::Idle => None,
            ev => Some(ev),
        });
        assert!(matches!(ev, Some(DatagramEvent::Dropped(_))));
        let ev = wait_for(|| match sock.poll_datagram(RING_SIZE, &mut buf).unwrap() {
            DatagramEvent::Idle => None,
            ev => Some(ev),
        });
        match ev {
            Some(DatagramEvent::Received { len, .. }) => assert_eq!(&buf[..len], b"ok"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_release_by_drop() {
        let mut sock = HostSocket::bind_udp(SocketAddrV4::new(LOCALHOST, 0)).unwrap();
        let addr = sock.local_addr().unwrap();
        sock = HostSocket::None;
        assert!(sock.is_none());
        // Port is free again
        assert!(UdpSocket::bind(addr).is_ok());
    }
}
