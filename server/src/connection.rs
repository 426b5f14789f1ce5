//! Server-side record of one connected client.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use log::{info, warn};
use shared::messages::{DisconnectMessage, DisconnectReason, NetMessage, NetMessageType};
use shared::packet::Packet;
use shared::socket::{SocketState, TcpSocket};

use crate::server::ServerCtx;
use crate::states::{self, ConnectionState, DispatchResult};

/// How long a gracefully closed connection may keep draining its send queue.
const LAST_PACKET_TIMEOUT: Duration = Duration::from_secs(2);

const RING_SIZE: usize = 32;

/// Rolling average over a fixed-size sample window.
#[derive(Debug)]
pub struct RingAverage {
    samples: [f32; RING_SIZE],
    pos: usize,
}

impl Default for RingAverage {
    fn default() -> Self {
        RingAverage {
            samples: [0.0; RING_SIZE],
            pos: 0,
        }
    }
}

impl RingAverage {
    pub fn push(&mut self, sample: f32) {
        self.samples[self.pos] = sample;
        self.pos = (self.pos + 1) % self.samples.len();
    }

    pub fn average(&self) -> f32 {
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }
}

/// One client's socket, protocol state and session membership.
///
/// Connections are identified by their slot index in the server's connection
/// array; the index is stable for the lifetime of the connection.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: usize,
    pub socket: TcpSocket,
    pub session_id: Option<usize>,
    pub player_id: Option<usize>,
    state: ConnectionState,
    pending_state: Option<ConnectionState>,
    pub garbage: bool,
    pub closed: bool,
    closed_at: Option<Instant>,
    pub rtt: RingAverage,
    pub time_diff: RingAverage,
    pub time_last_speed_change: f32,
}

impl ClientConnection {
    pub fn new(id: usize, socket: TcpSocket) -> Self {
        ClientConnection {
            id,
            socket,
            session_id: None,
            player_id: None,
            state: ConnectionState::Handshake,
            pending_state: None,
            garbage: false,
            closed: false,
            closed_at: None,
            rtt: RingAverage::default(),
            time_diff: RingAverage::default(),
            time_last_speed_change: 0.0,
        }
    }

    pub fn from_stream(id: usize, stream: TcpStream) -> Self {
        let mut socket = TcpSocket::new();
        socket.set_connected(stream);
        Self::new(id, socket)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serializes and queues one message for this client.
    pub fn send<M: NetMessage>(&mut self, message: &M) {
        if self.closed {
            return;
        }

        let mut packet = Packet::new();
        message.serialize(&mut packet);
        packet.write_header();
        self.socket.push(packet);
    }

    /// Queues an already framed packet (broadcast path).
    pub fn send_packet(&mut self, packet: Packet) {
        if self.closed {
            return;
        }

        self.socket.push(packet);
    }

    /// Queues a deferred protocol state transition from within a handler.
    /// A second transition while one is pending is a caller bug on our side
    /// or a pipelining violation on the client's; either way the connection
    /// is closed rather than left in an ambiguous state.
    pub fn request_state(&mut self, ctx: &mut ServerCtx, state: ConnectionState) {
        if self.pending_state.is_some() {
            self.close(
                ctx,
                false,
                DisconnectReason::ProtoErr,
                "Conflicting state transition",
            );
            return;
        }

        self.pending_state = Some(state);
    }

    /// Force-queues a transition from outside a handler (game start path).
    pub fn queue_state(&mut self, state: ConnectionState) {
        if self.pending_state.is_some() {
            warn!(
                "Connection {}: overwriting pending state transition",
                self.id
            );
        }

        self.pending_state = Some(state);
    }

    pub fn apply_pending_state(&mut self) {
        if let Some(next) = self.pending_state.take() {
            info!(
                "Connection {}: state change [{:?}] -> [{:?}]",
                self.id, self.state, next
            );
            self.state = next;
        }
    }

    /// Closes the connection.
    ///
    /// A forced close tears the socket down immediately; a graceful close
    /// queues a DISCONNECT message and keeps the socket alive until the
    /// queue drains or the timeout expires.
    pub fn close(
        &mut self,
        ctx: &mut ServerCtx,
        force: bool,
        reason: DisconnectReason,
        message: &str,
    ) {
        if self.garbage {
            return;
        }

        info!(
            "Connection {}: closing; reason: {}, message: '{}'",
            self.id, reason, message
        );

        if let Some(session_id) = self.session_id {
            ctx.remove_from_session(session_id, self);
        }

        if force {
            self.socket.close(false);
            self.garbage = true;
        } else if !self.closed {
            self.send(&DisconnectMessage {
                reason,
                message: message.to_string(),
            });
            self.closed = true;
            self.closed_at = Some(Instant::now());
        }
    }

    /// One connection tick: socket I/O, state tick, packet dispatch and the
    /// deferred state switch.
    pub fn tick(&mut self, ctx: &mut ServerCtx, dt: f32) {
        self.socket.do_recv();

        if self.socket.has_pending_send() {
            self.socket.do_send();
        }

        if self.closed {
            let send_done = !self.socket.has_pending_send();
            let timed_out = self
                .closed_at
                .map_or(true, |at| at.elapsed() > LAST_PACKET_TIMEOUT);

            if send_done || timed_out {
                self.socket.close(false);
                self.garbage = true;
            }
        }

        if self.socket.state() == SocketState::Error {
            self.close(ctx, false, DisconnectReason::Error, "Socket error");
        }

        states::state_tick(self, ctx, dt);

        while let Some(packet) = self.socket.pop() {
            self.dispatch(ctx, packet);
            // Deferred transitions resolve between messages, so a client may
            // pipeline a request for the next state behind the one that
            // causes the transition.
            self.apply_pending_state();

            if self.garbage {
                break;
            }
        }

        self.apply_pending_state();
    }

    fn dispatch(&mut self, ctx: &mut ServerCtx, mut packet: Packet) {
        let msg_type = match packet.read_u8().and_then(NetMessageType::from_u8) {
            Some(msg_type) => msg_type,
            None => {
                self.close(ctx, false, DisconnectReason::ProtoErr, "Bad message type");
                return;
            }
        };

        match states::handle_message(self, ctx, msg_type, &mut packet) {
            DispatchResult::Handled => {
                if !packet.is_valid_and_finished() && !self.closed && !self.garbage {
                    self.close(
                        ctx,
                        false,
                        DisconnectReason::ProtoErr,
                        "Message not fully consumed",
                    );
                }
            }
            DispatchResult::Malformed => {
                self.close(ctx, false, DisconnectReason::ProtoErr, "Malformed message");
            }
            DispatchResult::NoHandler => {
                self.close(
                    ctx,
                    false,
                    DisconnectReason::Error,
                    "Could not find packet handler in current state",
                );
            }
        }
    }

    pub fn is_admin(&self) -> bool {
        true // TODO: real authorization before release
    }
}
