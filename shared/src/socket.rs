//! Non-blocking TCP transport with packet framing.
//!
//! [`TcpSocket`] wraps one non-blocking stream plus a buffered send queue and
//! a receive reassembly buffer. All operations are polled: `do_connect`,
//! `do_send` and `do_recv` never block, returning [`SocketResult::NotDone`]
//! when the kernel has no more progress to offer. Callers retry next tick.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use log::{info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::packet::{Packet, HEADER_SIZE, MAX_PACKET_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    None,
    Connecting,
    Connected,
    Error,
}

/// Outcome of one polled transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketResult {
    NotDone,
    Done,
    Error,
}

/// Byte and packet counters, kept per socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketStats {
    pub bytes_sent: usize,
    pub packets_sent: usize,
    pub bytes_received: usize,
    pub packets_received: usize,
    pub num_connections: usize,
}

#[cfg(target_os = "macos")]
const EINPROGRESS: i32 = 36;
#[cfg(all(unix, not(target_os = "macos")))]
const EINPROGRESS: i32 = 115;
#[cfg(windows)]
const EINPROGRESS: i32 = 10035; // WSAEWOULDBLOCK

fn connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(EINPROGRESS)
}

/// A non-blocking TCP connection carrying framed packets.
///
/// Only one packet is partially sent or received at a time per direction;
/// completed inbound frames queue up in receipt order.
#[derive(Debug, Default)]
pub struct TcpSocket {
    stream: Option<TcpStream>,
    state: SocketState,
    send_queue: VecDeque<Vec<u8>>,
    send_current: Vec<u8>,
    send_pos: usize,
    recv_queue: VecDeque<Vec<u8>>,
    recv_current: Vec<u8>,
    recv_pos: usize,
    pub stats: SocketStats,
}

impl Default for SocketState {
    fn default() -> Self {
        SocketState::None
    }
}

impl TcpSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Tears the connection down. `error` selects the terminal state.
    pub fn close(&mut self, error: bool) {
        self.stream = None;
        self.state = if error {
            SocketState::Error
        } else {
            SocketState::None
        };
        self.send_queue.clear();
        self.send_current.clear();
        self.send_pos = 0;
        self.recv_queue.clear();
        self.recv_current.clear();
        self.recv_pos = 0;
    }

    /// Starts a non-blocking connect. Leaves the socket in `Connecting`
    /// unless the kernel reports an immediate failure.
    pub fn connect(&mut self, addr: SocketAddr) {
        self.close(false);

        let domain = if addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };

        let socket = match Socket::new(domain, Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => socket,
            Err(err) => {
                info!("Cannot create socket: {}", err);
                self.state = SocketState::Error;
                return;
            }
        };

        if let Err(err) = socket.set_nonblocking(true) {
            info!("Cannot make socket non-blocking: {}", err);
            self.state = SocketState::Error;
            return;
        }

        self.state = SocketState::Connecting;

        match socket.connect(&addr.into()) {
            Ok(()) => {
                self.stream = Some(socket.into());
                self.state = SocketState::Connected;
                self.stats.num_connections += 1;
            }
            Err(err) if connect_in_progress(&err) => {
                self.stream = Some(socket.into());
            }
            Err(err) => {
                warn!("connect() error: {}", err);
                self.close(true);
            }
        }
    }

    /// Adopts an already-connected stream (server accept path).
    pub fn set_connected(&mut self, stream: TcpStream) {
        self.close(false);

        if let Err(err) = stream.set_nonblocking(true) {
            warn!("Cannot make accepted socket non-blocking: {}", err);
            self.state = SocketState::Error;
            return;
        }

        self.stream = Some(stream);
        self.state = SocketState::Connected;
        self.stats.num_connections += 1;
    }

    /// Polls an in-flight connect once. Callers retry while `NotDone`.
    pub fn do_connect(&mut self) -> SocketResult {
        match self.state {
            SocketState::Connected => return SocketResult::Done,
            SocketState::Connecting => {}
            SocketState::None | SocketState::Error => return SocketResult::Error,
        }

        let stream = match self.stream.as_ref() {
            Some(stream) => stream,
            None => {
                self.close(true);
                return SocketResult::Error;
            }
        };

        // A pending SO_ERROR means the connect failed.
        if let Ok(Some(err)) = stream.take_error() {
            warn!("Connect error: {}", err);
            self.close(true);
            return SocketResult::Error;
        }

        match stream.peer_addr() {
            Ok(_) => {
                self.state = SocketState::Connected;
                self.stats.num_connections += 1;
                SocketResult::Done
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => SocketResult::NotDone,
            Err(err) => {
                warn!("Connect error: {}", err);
                self.close(true);
                SocketResult::Error
            }
        }
    }

    /// Queues a framed packet for transmission. The header must already have
    /// been written.
    pub fn push(&mut self, packet: Packet) {
        debug_assert!(packet.len() > HEADER_SIZE);
        self.send_queue.push_back(packet.into_bytes());
    }

    /// Dequeues the next complete inbound packet, if any.
    pub fn pop(&mut self) -> Option<Packet> {
        self.recv_queue.pop_front().map(Packet::from_frame)
    }

    /// True while queued or partially sent outbound bytes remain.
    pub fn has_pending_send(&self) -> bool {
        !self.send_queue.is_empty() || !self.send_current.is_empty()
    }

    /// Drains the send queue until the kernel pushes back. The current
    /// packet is always finished before the next one is started.
    pub fn do_send(&mut self) -> SocketResult {
        loop {
            if self.state != SocketState::Connected {
                return SocketResult::Done;
            }

            if self.send_current.is_empty() {
                match self.send_queue.pop_front() {
                    Some(next) => {
                        self.send_current = next;
                        self.send_pos = 0;
                    }
                    None => return SocketResult::Done,
                }
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    self.close(true);
                    return SocketResult::Error;
                }
            };

            match stream.write(&self.send_current[self.send_pos..]) {
                Ok(0) => {
                    self.close(true);
                    return SocketResult::Error;
                }
                Ok(sent) => {
                    self.send_pos += sent;
                    self.stats.bytes_sent += sent;

                    if self.send_pos != self.send_current.len() {
                        return SocketResult::NotDone;
                    }

                    self.send_current.clear();
                    self.send_pos = 0;
                    self.stats.packets_sent += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return SocketResult::NotDone;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("send error: {}", err);
                    self.close(true);
                    return SocketResult::Error;
                }
            }
        }
    }

    /// Reads as much as the kernel offers, reassembling framed packets.
    ///
    /// Each packet is received in two phases: first the fixed-size header,
    /// whose total-size field is bounds-checked, then the remaining bytes.
    /// A zero-byte read means the peer closed the connection.
    pub fn do_recv(&mut self) -> SocketResult {
        loop {
            if self.state != SocketState::Connected {
                return SocketResult::Done;
            }

            if self.recv_current.len() < HEADER_SIZE {
                self.recv_current.resize(HEADER_SIZE, 0);
                self.recv_pos = 0;
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => {
                    self.close(true);
                    return SocketResult::Error;
                }
            };

            match stream.read(&mut self.recv_current[self.recv_pos..]) {
                Ok(0) => {
                    self.close(true);
                    return SocketResult::Error;
                }
                Ok(received) => {
                    self.recv_pos += received;
                    self.stats.bytes_received += received;

                    if self.recv_pos != self.recv_current.len() {
                        return SocketResult::NotDone;
                    }

                    if self.recv_current.len() == HEADER_SIZE {
                        let mut header = [0u8; HEADER_SIZE];
                        header.copy_from_slice(&self.recv_current);
                        let total = u32::from_ne_bytes(header) as usize;

                        if total <= HEADER_SIZE || total > MAX_PACKET_SIZE {
                            warn!("Invalid packet size {}, closing connection", total);
                            self.close(true);
                            return SocketResult::Error;
                        }

                        self.recv_current.resize(total, 0);
                    } else {
                        let frame = std::mem::take(&mut self.recv_current);
                        self.recv_queue.push_back(frame);
                        self.recv_pos = 0;
                        self.stats.packets_received += 1;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return SocketResult::NotDone;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("recv error: {}", err);
                    self.close(true);
                    return SocketResult::Error;
                }
            }
        }
    }
}

/// Creates a non-blocking listener with SO_REUSEADDR set.
pub fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if !cfg!(target_os = "windows") {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn connect_pair() -> (TcpSocket, TcpSocket) {
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpSocket::new();
        client.connect(addr);

        let mut accepted = None;
        for _ in 0..500 {
            match client.do_connect() {
                SocketResult::Done => {}
                SocketResult::NotDone => {}
                SocketResult::Error => panic!("connect failed"),
            }

            if accepted.is_none() {
                match listener.accept() {
                    Ok((stream, _)) => accepted = Some(stream),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                    Err(err) => panic!("accept failed: {}", err),
                }
            }

            if accepted.is_some() && client.state() == SocketState::Connected {
                break;
            }

            sleep(Duration::from_millis(1));
        }

        let mut server = TcpSocket::new();
        server.set_connected(accepted.expect("no connection accepted"));
        assert_eq!(client.state(), SocketState::Connected);

        (client, server)
    }

    fn pump_until_packet(socket: &mut TcpSocket) -> Packet {
        for _ in 0..500 {
            socket.do_recv();
            if let Some(packet) = socket.pop() {
                return packet;
            }
            sleep(Duration::from_millis(1));
        }
        panic!("no packet received");
    }

    #[test]
    fn test_connect_send_receive() {
        let (mut client, mut server) = connect_pair();

        let mut packet = Packet::new();
        packet.write_u32(1234);
        packet.write_str("hello");
        packet.write_header();
        client.push(packet);

        for _ in 0..500 {
            if client.do_send() == SocketResult::Done && !client.has_pending_send() {
                break;
            }
            sleep(Duration::from_millis(1));
        }

        let mut received = pump_until_packet(&mut server);
        assert_eq!(received.read_u32(), Some(1234));
        assert_eq!(received.read_string().as_deref(), Some("hello"));
        assert!(received.is_valid_and_finished());
    }

    #[test]
    fn test_packets_arrive_in_order() {
        let (mut client, mut server) = connect_pair();

        for value in 0..3u32 {
            let mut packet = Packet::new();
            packet.write_u32(value);
            packet.write_header();
            client.push(packet);
        }

        while client.has_pending_send() {
            client.do_send();
            sleep(Duration::from_millis(1));
        }

        for expected in 0..3u32 {
            let mut packet = pump_until_packet(&mut server);
            assert_eq!(packet.read_u32(), Some(expected));
        }
    }

    #[test]
    fn test_peer_close_is_an_error() {
        let (client, mut server) = connect_pair();
        drop(client);

        let mut result = SocketResult::NotDone;
        for _ in 0..500 {
            result = server.do_recv();
            if result == SocketResult::Error {
                break;
            }
            sleep(Duration::from_millis(1));
        }

        assert_eq!(result, SocketResult::Error);
        assert_eq!(server.state(), SocketState::Error);
    }

    #[test]
    fn test_oversized_frame_closes_connection() {
        let (mut client, mut server) = connect_pair();

        // Hand-craft a frame whose header claims more than the allowed max.
        let bogus = ((MAX_PACKET_SIZE + 1) as u32).to_ne_bytes();
        let stream = client.stream.as_mut().unwrap();
        stream.write_all(&bogus).unwrap();

        let mut result = SocketResult::NotDone;
        for _ in 0..500 {
            result = server.do_recv();
            if result == SocketResult::Error {
                break;
            }
            sleep(Duration::from_millis(1));
        }

        assert_eq!(result, SocketResult::Error);
    }

    #[test]
    fn test_connect_to_dead_port_fails() {
        // Bind a listener to grab a port, then drop it so nothing listens.
        let listener = create_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut socket = TcpSocket::new();
        socket.connect(addr);

        let mut result = SocketResult::NotDone;
        for _ in 0..500 {
            result = socket.do_connect();
            if result != SocketResult::NotDone {
                break;
            }
            sleep(Duration::from_millis(1));
        }

        assert_eq!(result, SocketResult::Error);
        assert_eq!(socket.state(), SocketState::Error);
    }
}
