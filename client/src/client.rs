//! The client core: socket, state machine driver and send helpers.
//!
//! The embedding frontend owns the main loop; it pumps the network once per
//! frame, feeds input intents in and runs the fixed-tick loop. Everything
//! here is presentation-free.

use std::net::{SocketAddr, ToSocketAddrs};

use log::{debug, info, warn};

use shared::commands::GameCommand;
use shared::messages::{
    DisconnectMessage, GameCommandMessage, NetMessage, NetMessageType, DEFAULT_PORT,
};
use shared::packet::Packet;
use shared::socket::{SocketState, TcpSocket};
use shared::timer::FrameTimer;

use crate::input::ClientInput;
use crate::states::{self, ClientState, DispatchResult, SessionBrowserState};

/// Externally-sourced configuration, provided at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub player_name: String,
    /// Server to connect to. None falls back to localhost.
    pub server_address: Option<SocketAddr>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            player_name: "player".to_string(),
            server_address: None,
        }
    }
}

impl ClientConfig {
    /// Parses "host:port" or "host" (default port) into an address.
    pub fn parse_server_address(address: &str) -> Option<SocketAddr> {
        let with_port = if address.contains(':') {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_PORT)
        };

        with_port.to_socket_addrs().ok()?.next()
    }
}

pub struct Client {
    pub socket: TcpSocket,
    state: Option<ClientState>,
    next_state: Option<ClientState>,
    in_dispatch: bool,
    pub error_message: Option<String>,
    pub quit_flag: bool,
    finish_outbound_packets: bool,
    pub timer: FrameTimer,
    pub config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            socket: TcpSocket::new(),
            state: Some(ClientState::Menu),
            next_state: None,
            in_dispatch: false,
            error_message: None,
            quit_flag: false,
            finish_outbound_packets: false,
            timer: FrameTimer::new(),
            config,
        }
    }

    pub fn state(&self) -> Option<&ClientState> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut ClientState> {
        self.state.as_mut()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.as_ref().map(states::name).unwrap_or("<none>")
    }

    /// The address to connect to and whether it was explicitly configured.
    pub fn connect_target(&self) -> (SocketAddr, bool) {
        match self.config.server_address {
            Some(address) => (address, true),
            None => (SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)), false),
        }
    }

    /// Serializes and queues one message for the server.
    pub fn send<M: NetMessage>(&mut self, message: &M) {
        let mut packet = Packet::new();
        message.serialize(&mut packet);
        packet.write_header();
        self.socket.push(packet);
    }

    /// Wraps a command in a GAME_COMMAND envelope and queues it.
    pub fn send_game_command(&mut self, command: &GameCommand) {
        let mut packet = Packet::new();
        GameCommandMessage.serialize(&mut packet);
        command.serialize(&mut packet);
        packet.write_header();
        self.socket.push(packet);
    }

    /// Drains socket I/O once per frame. Any transport error lands the
    /// client back in the menu with an error message.
    pub fn pump_network(&mut self) {
        self.socket.do_send();
        if self.check_socket_error() {
            return;
        }

        self.socket.do_recv();
        self.check_socket_error();
    }

    fn check_socket_error(&mut self) -> bool {
        if self.socket.state() != SocketState::Error {
            return false;
        }

        self.socket.close(false);
        info!("Network error");

        if self.error_message.is_none() {
            self.error_message = Some("Network error".to_string());
        }

        self.set_next_state(ClientState::Menu);
        true
    }

    /// One client tick: dispatch inbound packets, then tick the state.
    pub fn tick(&mut self, dt: f32) {
        while let Some(packet) = self.socket.pop() {
            self.dispatch_packet(packet);
        }

        self.with_dispatch(|client, state| states::tick(client, state, dt));
    }

    /// Feeds one frontend input intent into the current state.
    pub fn input(&mut self, input: ClientInput) {
        self.with_dispatch(|client, state| states::input(client, state, input));
    }

    fn dispatch_packet(&mut self, mut packet: Packet) {
        let msg_type = match packet.read_u8().and_then(NetMessageType::from_u8) {
            Some(msg_type) => msg_type,
            None => {
                warn!("Bad message type from server");
                self.protocol_error();
                return;
            }
        };

        // The disconnect handler is installed in every state: whatever is
        // active, the reason ends up in the error message.
        if msg_type == NetMessageType::Disconnect {
            match DisconnectMessage::deserialize(&mut packet) {
                Some(message) => {
                    self.error_message = Some(format!(
                        "Disconnected from server: {} (message: {})",
                        message.reason, message.message
                    ));
                }
                None => self.protocol_error(),
            }
            return;
        }

        let result =
            self.with_dispatch(|client, state| states::handle_message(client, state, msg_type, &mut packet));

        match result {
            Some(DispatchResult::Handled) => {
                if !packet.is_valid_and_finished() {
                    warn!("Message {:?} not fully consumed", msg_type);
                    self.protocol_error();
                }
            }
            Some(DispatchResult::Malformed) => {
                warn!("Malformed {:?} message", msg_type);
                self.protocol_error();
            }
            Some(DispatchResult::NoHandler) => {
                debug!(
                    "Dropping {:?} message in state {}",
                    msg_type,
                    self.state_name()
                );
            }
            None => {}
        }
    }

    /// Runs a closure against the current state with deferred-transition
    /// discipline: transitions requested inside resolve afterwards.
    fn with_dispatch<R>(&mut self, f: impl FnOnce(&mut Client, &mut ClientState) -> R) -> Option<R> {
        let mut state = self.state.take()?;

        debug_assert!(!self.in_dispatch);
        self.in_dispatch = true;
        let result = f(self, &mut state);
        self.in_dispatch = false;

        self.state = Some(state);

        if let Some(next) = self.next_state.take() {
            self.switch_state(next);
        }

        Some(result)
    }

    /// Requests a state transition. Inside a dispatch the switch is
    /// deferred until the dispatch returns; queueing two transitions in one
    /// dispatch is a logic error and aborts.
    pub fn set_next_state(&mut self, state: ClientState) {
        if self.in_dispatch {
            assert!(
                self.next_state.is_none(),
                "conflicting client state transition"
            );
            self.next_state = Some(state);
        } else {
            self.switch_state(state);
        }
    }

    fn switch_state(&mut self, new_state: ClientState) {
        info!(
            "State change: [{}] -> [{}]",
            self.state_name(),
            states::name(&new_state)
        );

        self.state = Some(new_state);

        // Begin the new state under the same deferred discipline; a begin
        // hook may itself request the next transition.
        if let Some(mut state) = self.state.take() {
            debug_assert!(!self.in_dispatch);
            self.in_dispatch = true;
            states::begin(self, &mut state);
            self.in_dispatch = false;
            self.state = Some(state);

            if let Some(next) = self.next_state.take() {
                self.switch_state(next);
            }
        }
    }

    /// Tears the connection down and returns to the menu. Used for
    /// deserialization failures and half-consumed messages.
    pub fn protocol_error(&mut self) {
        self.disconnect();
        self.set_next_state(ClientState::Menu);
    }

    pub fn disconnect(&mut self) {
        self.socket.close(false);
    }

    /// Requests shutdown. Development builds announce it to the server and
    /// flush the send queue before the main loop exits.
    pub fn quit(&mut self) {
        #[cfg(debug_assertions)]
        if self.socket.state() == SocketState::Connected {
            self.send(&shared::messages::ShutdownMessage);
            self.finish_outbound_packets = true;
        }

        info!("Setting quit flag");

        if self.quit_flag {
            warn!("Client already quit");
            return;
        }

        self.quit_flag = true;
    }

    /// True once the main loop may stop: quit was requested and any final
    /// outbound packets have drained (or the socket is gone).
    pub fn should_exit(&self) -> bool {
        let socket_done = self.socket.state() != SocketState::Connected
            || !self.finish_outbound_packets
            || !self.socket.has_pending_send();

        self.quit_flag && socket_done
    }

    /// Resets into the session browser; useful for tests and tools that
    /// start from an established connection.
    pub fn enter_session_browser(&mut self) {
        self.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
    }
}
