//! Game sessions: lobby roster, game start gating and broadcast fan-out.

use log::info;

use shared::entity::Entity;
use shared::messages::{
    GameStartedMessage, JoinSessionResult, LoadLevelMessage, LobbyUpdate, LobbyUpdateMessage,
    NetMessage, PlayerInfo, SessionState,
};
use shared::packet::Packet;

use crate::connection::ClientConnection;
use crate::game::ServerGameState;
use crate::states::ConnectionState;

/// Pending (connection id, framed packet) pairs the server delivers after
/// the current dispatch.
pub type Outbox = Vec<(usize, Packet)>;

/// Pending forced protocol-state transitions, applied by the server.
pub type StateChanges = Vec<(usize, ConnectionState)>;

/// One occupied lobby slot. The slot index is the player id.
#[derive(Debug)]
pub struct SessionPlayer {
    pub connection_id: usize,
    pub name: String,
    pub ready: bool,
    pub tank: Option<Entity>,
    #[cfg(debug_assertions)]
    pub name_collision_index: usize,
}

impl SessionPlayer {
    pub fn new(connection_id: usize, name: String) -> Self {
        SessionPlayer {
            connection_id,
            name,
            ready: false,
            tank: None,
            #[cfg(debug_assertions)]
            name_collision_index: 0,
        }
    }

    pub fn display_name(&self) -> String {
        #[cfg(debug_assertions)]
        {
            format!("{} [dev:{}]", self.name, self.name_collision_index)
        }
        #[cfg(not(debug_assertions))]
        {
            self.name.clone()
        }
    }
}

/// A lobby/match instance with a player roster and, once started, the
/// authoritative simulation.
pub struct Session {
    pub id: usize,
    pub state: SessionState,
    pub name: String,
    pub password: String,
    pub game_state: Option<ServerGameState>,
    pub num_players: usize,
    pub num_npcs: usize,
    pub players: Vec<Option<SessionPlayer>>,
    pub is_persistent: bool,
}

impl Session {
    pub fn new(
        id: usize,
        name: &str,
        password: &str,
        num_players: usize,
        num_npcs: usize,
        persistent: bool,
    ) -> Self {
        debug_assert!(num_players >= 1);

        Session {
            id,
            state: SessionState::Lobby,
            name: name.to_string(),
            password: password.to_string(),
            game_state: None,
            num_players,
            num_npcs,
            players: Vec::new(),
            is_persistent: persistent,
        }
    }

    /// Attempts to add a connection to the roster. Failure reasons are
    /// checked in a fixed order and reported to the caller; none of them
    /// tear the connection down.
    pub fn join(
        &mut self,
        con: &mut ClientConnection,
        player_name: &str,
        password: &str,
        outbox: &mut Outbox,
    ) -> JoinSessionResult {
        if self.state != SessionState::Lobby {
            return JoinSessionResult::InvalidState;
        }

        if con.session_id.is_some() {
            return JoinSessionResult::AlreadyConnected;
        }

        if self.connected_count(false) == self.num_players {
            return JoinSessionResult::SessionFull;
        }

        if self.password != password {
            return JoinSessionResult::WrongPassword;
        }

        let mut name_collision_index = 0;
        for player in self.players.iter().flatten() {
            if player.name == player_name {
                if cfg!(debug_assertions) {
                    name_collision_index += 1;
                } else {
                    return JoinSessionResult::NameTaken;
                }
            }
        }
        let _ = name_collision_index;

        con.player_id = Some(self.players.len());
        con.session_id = Some(self.id);

        let player = SessionPlayer {
            connection_id: con.id,
            name: player_name.to_string(),
            ready: false,
            tank: None,
            #[cfg(debug_assertions)]
            name_collision_index,
        };
        let info = self.player_info(&player);
        self.players.push(Some(player));

        self.broadcast(
            &LobbyUpdateMessage {
                update: LobbyUpdate::PlayerJoined(info),
            },
            outbox,
        );

        JoinSessionResult::Success
    }

    /// Removes a connection's player from the roster. When the last player
    /// leaves, persistent sessions reset to a fresh lobby and ephemeral
    /// sessions become garbage.
    pub fn remove(&mut self, con: &mut ClientConnection, outbox: &mut Outbox) -> bool {
        let player_id = match con.player_id {
            Some(player_id) if self.has_player(con) => player_id,
            _ => return false,
        };

        let player = match self.players[player_id].take() {
            Some(player) => player,
            None => return false,
        };

        con.session_id = None;
        con.player_id = None;

        self.broadcast(
            &LobbyUpdateMessage {
                update: LobbyUpdate::PlayerLeft {
                    player_name: player.name,
                },
            },
            outbox,
        );

        if self.connected_count(false) == 0 {
            self.game_state = None;
            self.players.clear();

            if self.is_persistent {
                info!("Restarting persistent session {}", self.id);
                self.state = SessionState::Lobby;
            } else {
                info!("Session {} ended", self.id);
                self.state = SessionState::Garbage;
            }
        }

        true
    }

    pub fn has_player(&self, con: &ClientConnection) -> bool {
        con.player_id
            .and_then(|player_id| self.players.get(player_id))
            .and_then(|player| player.as_ref())
            .map(|player| player.connection_id == con.id)
            .unwrap_or(false)
    }

    /// Toggles a player's ready flag and starts the game once every
    /// occupied slot is ready at full capacity.
    pub fn set_player_ready(
        &mut self,
        con: &ClientConnection,
        outbox: &mut Outbox,
        state_changes: &mut StateChanges,
    ) -> bool {
        if self.state != SessionState::Lobby {
            info!("Ready request for session {} outside lobby state", self.id);
            return false;
        }

        let player_id = match con.player_id {
            Some(player_id) if self.has_player(con) => player_id,
            _ => return false,
        };

        let info = match self.players[player_id].as_mut() {
            Some(player) => {
                player.ready = !player.ready;
                let info = PlayerInfo {
                    name: player.name.clone(),
                    display_name: player.display_name(),
                    ready: player.ready,
                };
                info
            }
            None => return false,
        };

        info!(
            "Player {} ready ({}/{})",
            player_id,
            self.connected_count(true),
            self.num_players
        );

        self.broadcast(
            &LobbyUpdateMessage {
                update: LobbyUpdate::UpdatePlayerInfo(info),
            },
            outbox,
        );

        if self.connected_count(true) == self.num_players {
            info!("All players ready, starting game");
            self.start_game(outbox, state_changes);
        }

        true
    }

    /// Creates the authoritative game, tells every player their tank,
    /// snapshots the world and forces every member connection ingame.
    pub fn start_game(&mut self, outbox: &mut Outbox, state_changes: &mut StateChanges) {
        let mut game = ServerGameState::new();
        game.prepare(&mut self.players, self.num_npcs);

        for player in self.players.iter().flatten() {
            let tank = match player.tank {
                Some(tank) => tank,
                None => continue,
            };

            let mut packet = Packet::new();
            GameStartedMessage {
                player_tank: tank.to_bits(),
            }
            .serialize(&mut packet);
            packet.write_header();
            outbox.push((player.connection_id, packet));
        }

        self.state = SessionState::Ingame;

        let mut level_packet = Packet::new();
        LoadLevelMessage.serialize(&mut level_packet);
        game.game.serialize(&mut level_packet);
        level_packet.write_header();

        for player in self.players.iter().flatten() {
            outbox.push((player.connection_id, level_packet.clone()));
            state_changes.push((player.connection_id, ConnectionState::Ingame));
        }

        self.game_state = Some(game);
    }

    /// Advances the simulation and fans its broadcasts out to the roster.
    pub fn tick(&mut self, dt: f32, outbox: &mut Outbox) {
        if self.state != SessionState::Ingame {
            return;
        }

        let packets = match self.game_state.as_mut() {
            Some(game) => {
                game.tick(dt);
                game.drain_outbox()
            }
            None => return,
        };

        for packet in packets {
            self.broadcast_packet(packet, outbox);
        }
    }

    /// Queues a framed packet for every connected player.
    pub fn broadcast_packet(&self, packet: Packet, outbox: &mut Outbox) {
        for player in self.players.iter().flatten() {
            outbox.push((player.connection_id, packet.clone()));
        }
    }

    pub fn broadcast<M: NetMessage>(&self, message: &M, outbox: &mut Outbox) {
        let mut packet = Packet::new();
        message.serialize(&mut packet);
        packet.write_header();
        self.broadcast_packet(packet, outbox);
    }

    pub fn connected_count(&self, only_ready: bool) -> usize {
        self.players
            .iter()
            .flatten()
            .filter(|player| !only_ready || player.ready)
            .count()
    }

    pub fn player_info(&self, player: &SessionPlayer) -> PlayerInfo {
        PlayerInfo {
            name: player.name.clone(),
            display_name: player.display_name(),
            ready: player.ready,
        }
    }

    /// Roster infos for every occupied slot.
    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players
            .iter()
            .flatten()
            .map(|player| self.player_info(player))
            .collect()
    }
}
