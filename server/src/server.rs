//! The server registry: listening socket, connection slots, session slots
//! and the per-tick drive of everything.

use std::error::Error;
use std::io;
use std::net::{SocketAddr, TcpListener};

use log::{info, warn};

use shared::messages::{NetMessage, SessionInfo};
use shared::packet::Packet;
use shared::socket::create_listener;
use shared::timer::FrameTimer;

use crate::connection::ClientConnection;
use crate::session::{Outbox, Session, StateChanges};
use crate::states::ConnectionState;

/// Everything message handlers may touch besides their own connection:
/// session slots, the routed outbox, forced state changes and the timer.
///
/// Keeping this separate from the connection array lets a handler run with
/// `&mut` access to both its connection and the rest of the server.
pub struct ServerCtx {
    pub sessions: Vec<Option<Session>>,
    pub outbox: Outbox,
    pub state_changes: StateChanges,
    pub timer: FrameTimer,
    pub quit: bool,
}

impl Default for ServerCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCtx {
    pub fn new() -> Self {
        ServerCtx {
            sessions: Vec::new(),
            outbox: Outbox::new(),
            state_changes: StateChanges::new(),
            timer: FrameTimer::new(),
            quit: false,
        }
    }

    /// Creates a session in the first free slot after validating the
    /// request. Slot indices are session ids and are never repacked.
    pub fn create_session(
        &mut self,
        name: &str,
        password: &str,
        num_players: usize,
        num_npcs: usize,
        persistent: bool,
    ) -> Option<usize> {
        if name.is_empty() || name.len() > 20 {
            warn!("Cannot create session, invalid name");
            return None;
        }

        if password.len() > 20 {
            warn!("Cannot create session, invalid password");
            return None;
        }

        if num_players < 1 || num_players > 100 {
            warn!(
                "Cannot create session {}, invalid number of players ({})",
                name, num_players
            );
            return None;
        }

        info!(
            "Creating session {}, number of players: {}",
            name, num_players
        );

        let session_id = self
            .sessions
            .iter()
            .position(|slot| slot.is_none())
            .unwrap_or_else(|| {
                self.sessions.push(None);
                self.sessions.len() - 1
            });

        self.sessions[session_id] = Some(Session::new(
            session_id,
            name,
            password,
            num_players,
            num_npcs,
            persistent,
        ));

        Some(session_id)
    }

    pub fn session(&self, id: usize) -> Option<&Session> {
        self.sessions.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn session_mut(&mut self, id: usize) -> Option<&mut Session> {
        self.sessions.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Current simulation time of a session's running game.
    pub fn session_time(&self, id: usize) -> Option<f32> {
        self.session(id)
            .and_then(|session| session.game_state.as_ref())
            .map(|game| game.game.time)
    }

    /// Browser rows for every existing session.
    pub fn session_infos(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let session = slot.as_ref()?;
                Some(SessionInfo {
                    name: session.name.clone(),
                    id: id as u16,
                    num_players: session.num_players as u16,
                    num_players_connected: session.connected_count(false) as u16,
                    state: session.state,
                    has_password: !session.password.is_empty(),
                })
            })
            .collect()
    }

    pub fn join_session(
        &mut self,
        session_id: usize,
        con: &mut ClientConnection,
        player_name: &str,
        password: &str,
    ) -> shared::messages::JoinSessionResult {
        let ServerCtx {
            sessions, outbox, ..
        } = self;

        match sessions.get_mut(session_id).and_then(|slot| slot.as_mut()) {
            Some(session) => session.join(con, player_name, password, outbox),
            None => shared::messages::JoinSessionResult::NotFound,
        }
    }

    pub fn remove_from_session(&mut self, session_id: usize, con: &mut ClientConnection) {
        let ServerCtx {
            sessions, outbox, ..
        } = self;

        if let Some(session) = sessions.get_mut(session_id).and_then(|slot| slot.as_mut()) {
            session.remove(con, outbox);
        }

        con.session_id = None;
        con.player_id = None;
    }

    /// Toggles ready for the connection's player. None if the session does
    /// not exist.
    pub fn set_player_ready(&mut self, session_id: usize, con: &ClientConnection) -> Option<bool> {
        let ServerCtx {
            sessions,
            outbox,
            state_changes,
            ..
        } = self;

        sessions
            .get_mut(session_id)
            .and_then(|slot| slot.as_mut())
            .map(|session| session.set_player_ready(con, outbox, state_changes))
    }

    /// Routes one client-authored game command into the session's game.
    /// Returns false when the session cannot accept commands at all; a
    /// command the game itself rejects is not an error.
    pub fn handle_game_command(
        &mut self,
        session_id: usize,
        player_id: Option<usize>,
        packet: &mut Packet,
    ) -> bool {
        let ServerCtx {
            sessions, outbox, ..
        } = self;

        let session = match sessions.get_mut(session_id).and_then(|slot| slot.as_mut()) {
            Some(session) => session,
            None => return false,
        };

        if session.state != shared::messages::SessionState::Ingame {
            return false;
        }

        let player_tank = player_id
            .and_then(|player_id| session.players.get(player_id))
            .and_then(|slot| slot.as_ref())
            .and_then(|player| player.tank);

        let packets = match session.game_state.as_mut() {
            Some(game) => {
                game.handle_command_packet(
                    &crate::game::CommandContext { player_tank },
                    packet,
                );
                game.drain_outbox()
            }
            None => return false,
        };

        for broadcast in packets {
            session.broadcast_packet(broadcast, outbox);
        }

        true
    }

    /// Serializes a message and queues it for every member of a session.
    pub fn broadcast_message<M: NetMessage>(&mut self, session_id: usize, message: &M) {
        let ServerCtx {
            sessions, outbox, ..
        } = self;

        if let Some(session) = sessions.get_mut(session_id).and_then(|slot| slot.as_mut()) {
            session.broadcast(message, outbox);
        }
    }
}

/// The server: one listening socket, connection slots (index 0 reserved so
/// connection ids are 1-based) and the shared context.
pub struct Server {
    listener: TcpListener,
    clients: Vec<Option<ClientConnection>>,
    pub ctx: ServerCtx,
}

impl Server {
    /// Binds the listener and seeds development sessions.
    pub fn start(addr: SocketAddr) -> Result<Server, Box<dyn Error>> {
        info!("Starting the server");

        let listener = create_listener(addr)?;
        info!("Server running on {}", listener.local_addr()?);

        let mut server = Server {
            listener,
            // Slot 0 stays empty so connection ids start at 1.
            clients: vec![None],
            ctx: ServerCtx::new(),
        };

        #[cfg(debug_assertions)]
        {
            server.ctx.create_session("developer", "", 1, 1, true);
            server.ctx.create_session("playground", "", 2, 4, true);
        }

        Ok(server)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn quit(&mut self) {
        info!("Setting quit flag");

        if self.ctx.quit {
            warn!("Server already quit");
            return;
        }

        self.ctx.quit = true;
    }

    /// Blocks in the fixed-tick loop until the quit flag is set.
    pub fn main_loop(&mut self) {
        info!("Starting the main loop");

        self.ctx.timer.start();

        while !self.ctx.quit {
            self.ctx.timer.begin_frame();

            let mut ticks_done = 0u32;
            while !self.ctx.timer.frame_done() {
                self.ctx.timer.begin_tick();
                self.tick(1.0);
                self.ctx.timer.advance_tick();

                ticks_done += 1;
                if ticks_done > 100 {
                    warn!(
                        "Cannot keep up the tick rate! Did {} ticks in this main loop iteration",
                        ticks_done
                    );
                }
            }

            // All sockets are non-blocking; yield briefly instead of
            // spinning until the next tick is due.
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        info!("Main loop exit");
    }

    /// One server tick: accept, drive every connection, drive sessions,
    /// deliver queued packets, sweep garbage.
    pub fn tick(&mut self, dt: f32) {
        self.accept_connections();

        for id in 1..self.clients.len() {
            let mut con = match self.clients[id].take() {
                Some(con) => con,
                None => continue,
            };

            if con.garbage {
                info!("Sweeping connection {}", id);
                continue;
            }

            con.tick(&mut self.ctx, dt);
            self.deliver_outbox(Some(&mut con));
            self.apply_state_changes(Some(&mut con));

            if con.garbage {
                info!("Sweeping connection {}", id);
                continue;
            }

            self.clients[id] = Some(con);
        }

        {
            let ServerCtx {
                sessions, outbox, ..
            } = &mut self.ctx;

            for slot in sessions.iter_mut() {
                match slot {
                    Some(session) if session.state == shared::messages::SessionState::Garbage => {
                        info!("Removing garbage session {}", session.id);
                        *slot = None;
                    }
                    Some(session) => session.tick(dt, outbox),
                    None => {}
                }
            }
        }

        self.deliver_outbox(None);
        self.apply_state_changes(None);
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = (1..self.clients.len())
                        .find(|&id| self.clients[id].is_none())
                        .unwrap_or_else(|| {
                            self.clients.push(None);
                            self.clients.len() - 1
                        });

                    info!("Client connected: {} (connection {})", addr, id);
                    self.clients[id] = Some(ClientConnection::from_stream(id, stream));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("Failed to accept client: {}", err);
                    break;
                }
            }
        }
    }

    /// Routes queued (connection, packet) pairs into the target sockets.
    /// `current` is the connection currently taken out of its slot.
    fn deliver_outbox(&mut self, mut current: Option<&mut ClientConnection>) {
        let entries = std::mem::take(&mut self.ctx.outbox);

        for (target, packet) in entries {
            if let Some(con) = current.as_deref_mut() {
                if con.id == target {
                    con.send_packet(packet);
                    continue;
                }
            }

            if let Some(con) = self
                .clients
                .get_mut(target)
                .and_then(|slot| slot.as_mut())
            {
                con.send_packet(packet);
            }
        }
    }

    /// Applies queued forced state transitions. The current connection gets
    /// its transition resolved immediately (it is mid-tick); others resolve
    /// at the end of their own next tick.
    fn apply_state_changes(&mut self, mut current: Option<&mut ClientConnection>) {
        let changes = std::mem::take(&mut self.ctx.state_changes);

        for (target, state) in changes {
            if let Some(con) = current.as_deref_mut() {
                if con.id == target {
                    con.queue_state(state);
                    con.apply_pending_state();
                    continue;
                }
            }

            if let Some(con) = self
                .clients
                .get_mut(target)
                .and_then(|slot| slot.as_mut())
            {
                con.queue_state(state);
            }
        }
    }

    /// Number of live (non-garbage) connections; slot 0 never counts.
    pub fn connection_count(&self) -> usize {
        self.clients.iter().flatten().count()
    }
}
