//! Client UI/session protocol states.
//!
//! Menu -> Connecting -> Handshake -> SessionBrowser <-> CreateSession ->
//! Lobby -> Ingame. Dispatch is an exhaustive match over (state, message
//! type); a DISCONNECT handler is effectively installed in every state by
//! the client's dispatcher. Transitions requested during a dispatch are
//! deferred until that dispatch returns.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{info, warn};

use shared::commands::{
    ChargeCommand, GameCommand, MoveTankCommand, RotateTurretCommand, SwitchWeaponCommand,
};
use shared::components::Tank;
use shared::messages::{
    CreateSessionRequest, CreateSessionResponse, GameStartedMessage, GetSessionInfoRequest,
    GetSessionInfoResponse, HandshakeRequest, HandshakeResponse, JoinSessionRequest,
    JoinSessionResponse, JoinSessionResult, LeaveSessionMessage, LobbyUpdate, LobbyUpdateMessage,
    NetMessage, NetMessageType, PauseGameMessage, PingMessage, PlayerInfo, PongMessage,
    ReadyMessage, SessionInfo, SetTickLengthMessage,
};
use shared::packet::Packet;
use shared::socket::SocketResult;
use shared::Entity;

use crate::client::Client;
use crate::game::ClientGameState;
use crate::input::ClientInput;

/// How long a pending connect may stall before the development fallback
/// kicks in.
const CONNECT_FALLBACK_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ConnectingState {
    target: SocketAddr,
    try_localhost_on_failure: bool,
    connecting_to_primary: bool,
    started: Instant,
}

impl ConnectingState {
    pub fn new(target: SocketAddr, explicit: bool) -> Self {
        // With an explicitly chosen server there is nothing to fall back
        // to; otherwise development builds retry against localhost.
        let fallback = !explicit && cfg!(debug_assertions) && !target.ip().is_loopback();

        ConnectingState {
            target,
            try_localhost_on_failure: fallback,
            connecting_to_primary: true,
            started: Instant::now(),
        }
    }
}

#[derive(Default)]
pub struct SessionBrowserState {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Default)]
pub struct CreateSessionState {
    /// Password of the last submitted request, reused for the follow-up
    /// join once the session exists.
    last_password: String,
}

pub struct LobbyState {
    pub players: Vec<PlayerInfo>,
}

pub struct IngameState {
    pub game: ClientGameState,
}

impl IngameState {
    pub fn new(my_tank: Entity) -> Self {
        let mut game = ClientGameState::new();
        game.my_tank = Some(my_tank);
        IngameState { game }
    }
}

pub enum ClientState {
    Menu,
    Connecting(ConnectingState),
    Handshake,
    SessionBrowser(SessionBrowserState),
    CreateSession(CreateSessionState),
    Lobby(LobbyState),
    Ingame(Box<IngameState>),
}

pub fn name(state: &ClientState) -> &'static str {
    match state {
        ClientState::Menu => "Menu",
        ClientState::Connecting(_) => "Connecting",
        ClientState::Handshake => "Handshake",
        ClientState::SessionBrowser(_) => "SessionBrowser",
        ClientState::CreateSession(_) => "CreateSession",
        ClientState::Lobby(_) => "Lobby",
        ClientState::Ingame(_) => "Ingame",
    }
}

/// Runs when a state becomes current.
pub fn begin(client: &mut Client, state: &mut ClientState) {
    match state {
        ClientState::Connecting(connecting) => {
            info!("Connecting to {}", connecting.target);
            connecting.started = Instant::now();
            client.socket.connect(connecting.target);
        }

        ClientState::Handshake => {
            client.send(&HandshakeRequest::current_version());
        }

        ClientState::SessionBrowser(_) => {
            client.send(&GetSessionInfoRequest);
        }

        ClientState::Menu
        | ClientState::CreateSession(_)
        | ClientState::Lobby(_)
        | ClientState::Ingame(_) => {}
    }
}

/// Per-tick work of the current state.
pub fn tick(client: &mut Client, state: &mut ClientState, dt: f32) {
    match state {
        ClientState::Connecting(connecting) => match client.socket.do_connect() {
            SocketResult::Done => {
                info!(
                    "Connected to {}",
                    if connecting.connecting_to_primary {
                        "server"
                    } else {
                        "localhost"
                    }
                );
                client.set_next_state(ClientState::Handshake);
            }

            SocketResult::Error => {
                if connecting.connecting_to_primary && connecting.try_localhost_on_failure {
                    info!("Server not available; trying localhost");
                    connect_to_localhost(client, connecting);
                } else {
                    client.error_message = Some("Could not connect to server".to_string());
                    client.set_next_state(ClientState::Menu);
                }
            }

            SocketResult::NotDone => {
                // Unresponsive hosts can leave the connect pending for a
                // long time; development builds bail to localhost early.
                if connecting.connecting_to_primary
                    && connecting.try_localhost_on_failure
                    && connecting.started.elapsed() > CONNECT_FALLBACK_TIMEOUT
                {
                    info!("Connect timed out; trying localhost");
                    connect_to_localhost(client, connecting);
                }
            }
        },

        ClientState::Ingame(ingame) => {
            ingame.game.tick(dt);
        }

        _ => {}
    }
}

fn connect_to_localhost(client: &mut Client, connecting: &mut ConnectingState) {
    connecting.connecting_to_primary = false;
    connecting.started = Instant::now();
    let target = SocketAddr::from(([127, 0, 0, 1], connecting.target.port()));
    client.socket.connect(target);
}

/// Routes one frontend input intent into the current state.
pub fn input(client: &mut Client, state: &mut ClientState, input: ClientInput) {
    match state {
        ClientState::Menu => {
            if input == ClientInput::Play {
                let (target, explicit) = client.connect_target();
                client.set_next_state(ClientState::Connecting(ConnectingState::new(
                    target, explicit,
                )));
            }
        }

        ClientState::SessionBrowser(_) => match input {
            ClientInput::RefreshSessions => client.send(&GetSessionInfoRequest),
            ClientInput::JoinSession {
                session_id,
                password,
            } => {
                let player_name = client.config.player_name.clone();
                client.send(&JoinSessionRequest {
                    session_id,
                    player_name,
                    password,
                });
            }
            ClientInput::OpenCreateSession => {
                client.set_next_state(ClientState::CreateSession(CreateSessionState::default()));
            }
            ClientInput::Back => client.set_next_state(ClientState::Menu),
            _ => {}
        },

        ClientState::CreateSession(create_session) => match input {
            ClientInput::SubmitCreateSession {
                name,
                password,
                num_players,
                num_bots,
            } => {
                create_session.last_password = password.clone();
                let player_name = client.config.player_name.clone();
                client.send(&CreateSessionRequest {
                    num_players,
                    num_bots,
                    name,
                    password,
                    player_name,
                });
            }
            ClientInput::Back => {
                client.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
            }
            _ => {}
        },

        ClientState::Lobby(_) => match input {
            ClientInput::ToggleReady => client.send(&ReadyMessage),
            ClientInput::LeaveSession => {
                client.send(&LeaveSessionMessage);
                client.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
            }
            _ => {}
        },

        ClientState::Ingame(ingame) => {
            ingame_input(client, &mut ingame.game, input);
        }

        _ => {}
    }
}

/// Translates ingame intents into client-authored game commands.
fn ingame_input(client: &mut Client, game: &mut ClientGameState, input: ClientInput) {
    let my_tank = match game.my_tank {
        Some(my_tank) => my_tank,
        None => return,
    };

    let move_command = |velocity: f32| {
        GameCommand::MoveTank(MoveTankCommand {
            entity: my_tank,
            planet_position: 0.0,
            velocity,
        })
    };

    match input {
        ClientInput::MoveLeft => client.send_game_command(&move_command(0.5)),
        ClientInput::MoveRight => client.send_game_command(&move_command(-0.5)),
        ClientInput::StopMoving => client.send_game_command(&move_command(0.0)),

        ClientInput::AimTurret { angle } => {
            client.send_game_command(&GameCommand::RotateTurret(RotateTurretCommand {
                is_absolute: true,
                entity: my_tank,
                target_rotation: angle,
                flags: 0,
            }));
        }
        ClientInput::RotateTurretLeft => {
            client.send_game_command(&GameCommand::RotateTurret(RotateTurretCommand {
                is_absolute: false,
                entity: my_tank,
                target_rotation: 0.0,
                flags: Tank::ROTATE_TURRET_LEFT,
            }));
        }
        ClientInput::RotateTurretRight => {
            client.send_game_command(&GameCommand::RotateTurret(RotateTurretCommand {
                is_absolute: false,
                entity: my_tank,
                target_rotation: 0.0,
                flags: Tank::ROTATE_TURRET_RIGHT,
            }));
        }
        ClientInput::StopRotatingTurret => {
            client.send_game_command(&GameCommand::RotateTurret(RotateTurretCommand {
                is_absolute: false,
                entity: my_tank,
                target_rotation: 0.0,
                flags: 0,
            }));
        }

        ClientInput::ChargeStart => {
            client.send_game_command(&GameCommand::Charge(ChargeCommand {
                entity: my_tank,
                fire: false,
            }));
        }
        ClientInput::ChargeRelease => {
            client.send_game_command(&GameCommand::Charge(ChargeCommand {
                entity: my_tank,
                fire: true,
            }));
        }

        ClientInput::CycleWeapon => {
            let weapon = game
                .game
                .entities
                .get(my_tank)
                .and_then(|components| components.tank.as_ref())
                .map(|tank| tank.weapon);

            if let Some(weapon) = weapon {
                client.send_game_command(&GameCommand::SwitchWeapon(SwitchWeaponCommand {
                    weapon: weapon.next(),
                }));
            }
        }

        ClientInput::TogglePauseMenu => {
            game.is_pause_menu_open = !game.is_pause_menu_open;
        }

        _ => {}
    }
}

pub enum DispatchResult {
    /// The handler ran; the dispatcher still verifies full consumption.
    Handled,
    /// The message body failed to deserialize.
    Malformed,
    /// No handler for this message type in the current state. Unlike the
    /// server, the client drops such messages: responses can legitimately
    /// arrive for a state that has already been left.
    NoHandler,
}

/// Dispatches one server message to the current state.
pub fn handle_message(
    client: &mut Client,
    state: &mut ClientState,
    msg_type: NetMessageType,
    packet: &mut Packet,
) -> DispatchResult {
    match (state, msg_type) {
        (ClientState::Handshake, NetMessageType::Handshake) => {
            let response = match HandshakeResponse::deserialize(packet) {
                Some(response) => response,
                None => return DispatchResult::Malformed,
            };

            info!(
                "Server game version: {}.{}.{}",
                response.ver_major, response.ver_minor, response.ver_build
            );
            client.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
            DispatchResult::Handled
        }

        (ClientState::SessionBrowser(browser), NetMessageType::GetSessionInfo) => {
            match GetSessionInfoResponse::deserialize(packet) {
                Some(response) => {
                    browser.sessions = response.sessions;
                    DispatchResult::Handled
                }
                None => DispatchResult::Malformed,
            }
        }

        (ClientState::SessionBrowser(_), NetMessageType::JoinSession) => {
            let response = match JoinSessionResponse::deserialize(packet) {
                Some(response) => response,
                None => return DispatchResult::Malformed,
            };

            if response.result == JoinSessionResult::Success {
                client.set_next_state(ClientState::Lobby(LobbyState {
                    players: response.connected_players,
                }));
            } else {
                warn!("Could not join session: {}", response.result);
            }
            DispatchResult::Handled
        }

        (ClientState::CreateSession(create_session), NetMessageType::CreateSession) => {
            let response = match CreateSessionResponse::deserialize(packet) {
                Some(response) => response,
                None => return DispatchResult::Malformed,
            };

            if !response.success {
                client.error_message = Some("Cannot create session".to_string());
                client
                    .set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
                return DispatchResult::Handled;
            }

            // Switch to the browser so its handler picks up the join
            // response, then request the join for the new session.
            let password = create_session.last_password.clone();
            client.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
            let player_name = client.config.player_name.clone();
            client.send(&JoinSessionRequest {
                session_id: response.created_session_id,
                player_name,
                password,
            });
            DispatchResult::Handled
        }

        (ClientState::Lobby(_), NetMessageType::GameStarted) => {
            let message = match GameStartedMessage::deserialize(packet) {
                Some(message) => message,
                None => return DispatchResult::Malformed,
            };

            info!("Server game started, player tank: {}", message.player_tank);
            client.set_next_state(ClientState::Ingame(Box::new(IngameState::new(
                Entity::from_bits(message.player_tank),
            ))));
            DispatchResult::Handled
        }

        (ClientState::Lobby(_), NetMessageType::LeaveSession) => {
            client.set_next_state(ClientState::SessionBrowser(SessionBrowserState::default()));
            DispatchResult::Handled
        }

        (ClientState::Lobby(lobby), NetMessageType::LobbyUpdate) => {
            let message = match LobbyUpdateMessage::deserialize(packet) {
                Some(message) => message,
                None => return DispatchResult::Malformed,
            };

            apply_lobby_update(&mut lobby.players, message);
            DispatchResult::Handled
        }

        (ClientState::Ingame(ingame), NetMessageType::LoadLevel) => {
            if ingame.game.load_level(packet) {
                DispatchResult::Handled
            } else {
                DispatchResult::Malformed
            }
        }

        (ClientState::Ingame(ingame), NetMessageType::GameCommand) => {
            // A rejected command is not an error; a malformed one leaves
            // the packet unfinished and the dispatcher reports it.
            ingame.game.handle_command_packet(packet);
            DispatchResult::Handled
        }

        (ClientState::Ingame(_), NetMessageType::SetTickLength) => {
            let message = match SetTickLengthMessage::deserialize(packet) {
                Some(message) => message,
                None => return DispatchResult::Malformed,
            };

            client.timer.set_tick_length_delta(
                message.tick_length_delta_microseconds,
                message.duration_milliseconds,
            );
            info!(
                "Set tick length delta {}us for {}ms",
                message.tick_length_delta_microseconds, message.duration_milliseconds
            );
            DispatchResult::Handled
        }

        (ClientState::Ingame(_), NetMessageType::PauseGame) => {
            let message = match PauseGameMessage::deserialize(packet) {
                Some(message) => message,
                None => return DispatchResult::Malformed,
            };

            client.timer.paused = message.paused;
            info!(
                "{}",
                if message.paused {
                    "Game paused"
                } else {
                    "Game continued"
                }
            );
            DispatchResult::Handled
        }

        (ClientState::Ingame(ingame), NetMessageType::Ping) => {
            let ping = match PingMessage::deserialize(packet) {
                Some(ping) => ping,
                None => return DispatchResult::Malformed,
            };

            client.send(&PongMessage {
                my_time: ingame.game.game.time,
                your_time: ping.my_time,
            });
            DispatchResult::Handled
        }

        _ => DispatchResult::NoHandler,
    }
}

fn apply_lobby_update(players: &mut Vec<PlayerInfo>, message: LobbyUpdateMessage) {
    match message.update {
        LobbyUpdate::PlayerJoined(player_info) => {
            if !players.iter().any(|player| player.name == player_info.name) {
                players.push(player_info);
            }
        }

        LobbyUpdate::PlayerLeft { player_name } => {
            players.retain(|player| player.name != player_name);
        }

        LobbyUpdate::UpdatePlayerInfo(player_info) => {
            match players
                .iter_mut()
                .find(|player| player.name == player_info.name)
            {
                Some(player) => *player = player_info,
                None => players.push(player_info),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lobby_update_join_leave_update() {
        let mut players = Vec::new();

        let ada = PlayerInfo {
            name: "ada".to_string(),
            display_name: "ada".to_string(),
            ready: false,
        };

        apply_lobby_update(
            &mut players,
            LobbyUpdateMessage {
                update: LobbyUpdate::PlayerJoined(ada.clone()),
            },
        );
        assert_eq!(players.len(), 1);

        // Duplicate joins are ignored.
        apply_lobby_update(
            &mut players,
            LobbyUpdateMessage {
                update: LobbyUpdate::PlayerJoined(ada.clone()),
            },
        );
        assert_eq!(players.len(), 1);

        let mut ready = ada.clone();
        ready.ready = true;
        apply_lobby_update(
            &mut players,
            LobbyUpdateMessage {
                update: LobbyUpdate::UpdatePlayerInfo(ready),
            },
        );
        assert!(players[0].ready);

        apply_lobby_update(
            &mut players,
            LobbyUpdateMessage {
                update: LobbyUpdate::PlayerLeft {
                    player_name: "ada".to_string(),
                },
            },
        );
        assert!(players.is_empty());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(name(&ClientState::Menu), "Menu");
        assert_eq!(name(&ClientState::Handshake), "Handshake");
        assert_eq!(
            name(&ClientState::SessionBrowser(SessionBrowserState::default())),
            "SessionBrowser"
        );
    }
}
