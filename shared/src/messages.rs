//! Wire messages exchanged between client and server.
//!
//! Every message starts with a 1-byte type tag followed by its fixed fields
//! in declared order. The tag values form a closed protocol surface; adding a
//! message means extending [`NetMessageType`] and both state machines.

use crate::packet::Packet;

/// Protocol version triple. A handshake only succeeds on an exact match.
pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 1;
pub const VERSION_BUILD: u16 = 0;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 1303;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetMessageType {
    Handshake = 1,
    Ping = 2,
    Pong = 3,
    GetSessionInfo = 4,
    CreateSession = 5,
    JoinSession = 6,
    LeaveSession = 7,
    Ready = 8,
    GameStarted = 9,
    LoadLevel = 10,
    GameCommand = 11,
    Shutdown = 12,
    SetTickLength = 13,
    PauseGame = 14,
    LobbyUpdate = 15,
    Disconnect = 16,
}

impl NetMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Handshake,
            2 => Self::Ping,
            3 => Self::Pong,
            4 => Self::GetSessionInfo,
            5 => Self::CreateSession,
            6 => Self::JoinSession,
            7 => Self::LeaveSession,
            8 => Self::Ready,
            9 => Self::GameStarted,
            10 => Self::LoadLevel,
            11 => Self::GameCommand,
            12 => Self::Shutdown,
            13 => Self::SetTickLength,
            14 => Self::PauseGame,
            15 => Self::LobbyUpdate,
            16 => Self::Disconnect,
            _ => return None,
        })
    }
}

/// Common interface for all wire messages.
///
/// `serialize` writes the type tag followed by the body; `deserialize` reads
/// only the body, since the dispatcher has already consumed the tag.
pub trait NetMessage {
    const TYPE: NetMessageType;

    fn serialize(&self, packet: &mut Packet);

    fn deserialize(packet: &mut Packet) -> Option<Self>
    where
        Self: Sized;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    None,
    Error,
    Invalid,
    ProtoErr,
    Kick,
}

impl DisconnectReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::Error,
            2 => Self::Invalid,
            3 => Self::ProtoErr,
            4 => Self::Kick,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Error => "An error occurred",
            Self::Invalid => "Invalid parameter",
            Self::ProtoErr => "Protocol error",
            Self::Kick => "You were kicked",
            Self::None => "(unknown)",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSessionResult {
    Success = 0,
    NotFound = 1,
    InvalidState = 2,
    AlreadyConnected = 3,
    SessionFull = 4,
    WrongPassword = 5,
    NameTaken = 6,
}

impl JoinSessionResult {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Success,
            1 => Self::NotFound,
            2 => Self::InvalidState,
            3 => Self::AlreadyConnected,
            4 => Self::SessionFull,
            5 => Self::WrongPassword,
            6 => Self::NameTaken,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JoinSessionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Success => "Success",
            Self::NotFound => "Session not found",
            Self::InvalidState => "Invalid state",
            Self::AlreadyConnected => "Already connected",
            Self::SessionFull => "Session is full",
            Self::WrongPassword => "Wrong password",
            Self::NameTaken => "Name taken",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Lobby,
    Ingame,
    Result,
    Garbage,
}

impl SessionState {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Lobby,
            1 => Self::Ingame,
            2 => Self::Result,
            3 => Self::Garbage,
            _ => return None,
        })
    }
}

/// Roster entry shown in session lobbies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub name: String,
    pub display_name: String,
    pub ready: bool,
}

impl PlayerInfo {
    pub fn serialize(&self, packet: &mut Packet) {
        packet.write_str(&self.name);
        packet.write_str(&self.display_name);
        packet.write_bool(self.ready);
    }

    pub fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(PlayerInfo {
            name: packet.read_string()?,
            display_name: packet.read_string()?,
            ready: packet.read_bool()?,
        })
    }
}

/// One row in the session browser.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub name: String,
    pub id: u16,
    pub num_players: u16,
    pub num_players_connected: u16,
    pub state: SessionState,
    pub has_password: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub ver_major: u16,
    pub ver_minor: u16,
    pub ver_build: u16,
}

impl HandshakeRequest {
    pub fn current_version() -> Self {
        HandshakeRequest {
            ver_major: VERSION_MAJOR,
            ver_minor: VERSION_MINOR,
            ver_build: VERSION_BUILD,
        }
    }
}

impl NetMessage for HandshakeRequest {
    const TYPE: NetMessageType = NetMessageType::Handshake;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.ver_major);
        packet.write_u16(self.ver_minor);
        packet.write_u16(self.ver_build);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(HandshakeRequest {
            ver_major: packet.read_u16()?,
            ver_minor: packet.read_u16()?,
            ver_build: packet.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub ver_major: u16,
    pub ver_minor: u16,
    pub ver_build: u16,
    pub ok: bool,
}

impl NetMessage for HandshakeResponse {
    const TYPE: NetMessageType = NetMessageType::Handshake;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.ver_major);
        packet.write_u16(self.ver_minor);
        packet.write_u16(self.ver_build);
        packet.write_bool(self.ok);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(HandshakeResponse {
            ver_major: packet.read_u16()?,
            ver_minor: packet.read_u16()?,
            ver_build: packet.read_u16()?,
            ok: packet.read_bool()?,
        })
    }
}

/// Sent by the server, carrying its current simulation time in ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct PingMessage {
    pub my_time: f32,
}

impl NetMessage for PingMessage {
    const TYPE: NetMessageType = NetMessageType::Ping;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_f32(self.my_time);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(PingMessage {
            my_time: packet.read_f32()?,
        })
    }
}

/// Echo of a ping.
///
/// `my_time` is the recipient's simulation time when the ping arrived;
/// `your_time` is the time the ping originally carried.
#[derive(Debug, Clone, PartialEq)]
pub struct PongMessage {
    pub my_time: f32,
    pub your_time: f32,
}

impl NetMessage for PongMessage {
    const TYPE: NetMessageType = NetMessageType::Pong;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_f32(self.my_time);
        packet.write_f32(self.your_time);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(PongMessage {
            my_time: packet.read_f32()?,
            your_time: packet.read_f32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSessionInfoRequest;

impl NetMessage for GetSessionInfoRequest {
    const TYPE: NetMessageType = NetMessageType::GetSessionInfo;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(GetSessionInfoRequest)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetSessionInfoResponse {
    pub sessions: Vec<SessionInfo>,
}

impl NetMessage for GetSessionInfoResponse {
    const TYPE: NetMessageType = NetMessageType::GetSessionInfo;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.sessions.len() as u16);

        for info in &self.sessions {
            packet.write_str(&info.name);
            packet.write_u16(info.id);
            packet.write_u16(info.num_players);
            packet.write_u16(info.num_players_connected);
            packet.write_u8(info.state as u8);
            packet.write_bool(info.has_password);
        }
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        let count = packet.read_u16()?;
        let mut sessions = Vec::with_capacity(count as usize);

        for _ in 0..count {
            sessions.push(SessionInfo {
                name: packet.read_string()?,
                id: packet.read_u16()?,
                num_players: packet.read_u16()?,
                num_players_connected: packet.read_u16()?,
                state: SessionState::from_u8(packet.read_u8()?)?,
                has_password: packet.read_bool()?,
            });
        }

        Some(GetSessionInfoResponse { sessions })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionRequest {
    pub num_players: u16,
    pub num_bots: u16,
    pub name: String,
    pub password: String,
    pub player_name: String,
}

impl NetMessage for CreateSessionRequest {
    const TYPE: NetMessageType = NetMessageType::CreateSession;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.num_players);
        packet.write_u16(self.num_bots);
        packet.write_str(&self.name);
        packet.write_str(&self.password);
        packet.write_str(&self.player_name);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(CreateSessionRequest {
            num_players: packet.read_u16()?,
            num_bots: packet.read_u16()?,
            name: packet.read_string()?,
            password: packet.read_string()?,
            player_name: packet.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionResponse {
    pub created_session_id: u16,
    pub success: bool,
}

impl NetMessage for CreateSessionResponse {
    const TYPE: NetMessageType = NetMessageType::CreateSession;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.created_session_id);
        packet.write_bool(self.success);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(CreateSessionResponse {
            created_session_id: packet.read_u16()?,
            success: packet.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSessionRequest {
    pub session_id: u16,
    pub player_name: String,
    pub password: String,
}

impl NetMessage for JoinSessionRequest {
    const TYPE: NetMessageType = NetMessageType::JoinSession;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u16(self.session_id);
        packet.write_str(&self.player_name);
        packet.write_str(&self.password);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(JoinSessionRequest {
            session_id: packet.read_u16()?,
            player_name: packet.read_string()?,
            password: packet.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSessionResponse {
    pub result: JoinSessionResult,
    pub connected_players: Vec<PlayerInfo>,
}

impl NetMessage for JoinSessionResponse {
    const TYPE: NetMessageType = NetMessageType::JoinSession;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u8(self.result as u8);
        packet.write_u16(self.connected_players.len() as u16);

        for player_info in &self.connected_players {
            player_info.serialize(packet);
        }
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        let result = JoinSessionResult::from_u8(packet.read_u8()?)?;
        let count = packet.read_u16()?;
        let mut connected_players = Vec::with_capacity(count as usize);

        for _ in 0..count {
            connected_players.push(PlayerInfo::deserialize(packet)?);
        }

        Some(JoinSessionResponse {
            result,
            connected_players,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaveSessionMessage;

impl NetMessage for LeaveSessionMessage {
    const TYPE: NetMessageType = NetMessageType::LeaveSession;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(LeaveSessionMessage)
    }
}

/// Toggles the sender's ready flag in the lobby.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadyMessage;

impl NetMessage for ReadyMessage {
    const TYPE: NetMessageType = NetMessageType::Ready;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(ReadyMessage)
    }
}

/// Tells one player which tank entity is theirs.
#[derive(Debug, Clone, PartialEq)]
pub struct GameStartedMessage {
    pub player_tank: u32,
}

impl Default for GameStartedMessage {
    fn default() -> Self {
        GameStartedMessage {
            player_tank: 0xDEAD_BEEF,
        }
    }
}

impl NetMessage for GameStartedMessage {
    const TYPE: NetMessageType = NetMessageType::GameStarted;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u32(self.player_tank);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(GameStartedMessage {
            player_tank: packet.read_u32()?,
        })
    }
}

/// Envelope for the full world snapshot sent at game start. The snapshot
/// itself follows the tag and is written by the game state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadLevelMessage;

impl NetMessage for LoadLevelMessage {
    const TYPE: NetMessageType = NetMessageType::LoadLevel;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(LoadLevelMessage)
    }
}

/// Envelope for a nested game command (see `commands`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameCommandMessage;

impl NetMessage for GameCommandMessage {
    const TYPE: NetMessageType = NetMessageType::GameCommand;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(GameCommandMessage)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownMessage;

impl NetMessage for ShutdownMessage {
    const TYPE: NetMessageType = NetMessageType::Shutdown;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
    }

    fn deserialize(_packet: &mut Packet) -> Option<Self> {
        Some(ShutdownMessage)
    }
}

/// Temporary tick-length adjustment used for clock reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct SetTickLengthMessage {
    pub tick_length_delta_microseconds: i16,
    pub duration_milliseconds: u16,
}

impl NetMessage for SetTickLengthMessage {
    const TYPE: NetMessageType = NetMessageType::SetTickLength;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_i16(self.tick_length_delta_microseconds);
        packet.write_u16(self.duration_milliseconds);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(SetTickLengthMessage {
            tick_length_delta_microseconds: packet.read_i16()?,
            duration_milliseconds: packet.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PauseGameMessage {
    pub paused: bool,
}

impl NetMessage for PauseGameMessage {
    const TYPE: NetMessageType = NetMessageType::PauseGame;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_bool(self.paused);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(PauseGameMessage {
            paused: packet.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LobbyUpdate {
    PlayerJoined(PlayerInfo),
    PlayerLeft { player_name: String },
    UpdatePlayerInfo(PlayerInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyUpdateMessage {
    pub update: LobbyUpdate,
}

impl NetMessage for LobbyUpdateMessage {
    const TYPE: NetMessageType = NetMessageType::LobbyUpdate;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);

        match &self.update {
            LobbyUpdate::PlayerJoined(player_info) => {
                packet.write_u8(0);
                player_info.serialize(packet);
            }
            LobbyUpdate::PlayerLeft { player_name } => {
                packet.write_u8(1);
                packet.write_str(player_name);
            }
            LobbyUpdate::UpdatePlayerInfo(player_info) => {
                packet.write_u8(2);
                player_info.serialize(packet);
            }
        }
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        let update = match packet.read_u8()? {
            0 => LobbyUpdate::PlayerJoined(PlayerInfo::deserialize(packet)?),
            1 => LobbyUpdate::PlayerLeft {
                player_name: packet.read_string()?,
            },
            2 => LobbyUpdate::UpdatePlayerInfo(PlayerInfo::deserialize(packet)?),
            _ => return None,
        };

        Some(LobbyUpdateMessage { update })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectMessage {
    pub reason: DisconnectReason,
    pub message: String,
}

impl NetMessage for DisconnectMessage {
    const TYPE: NetMessageType = NetMessageType::Disconnect;

    fn serialize(&self, packet: &mut Packet) {
        packet.write_u8(Self::TYPE as u8);
        packet.write_u8(self.reason as u8);
        packet.write_str(&self.message);
    }

    fn deserialize(packet: &mut Packet) -> Option<Self> {
        Some(DisconnectMessage {
            reason: DisconnectReason::from_u8(packet.read_u8()?)?,
            message: packet.read_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializes a message, then reads back the tag and body.
    fn roundtrip<M: NetMessage + PartialEq + std::fmt::Debug>(message: &M) -> M {
        let mut packet = Packet::new();
        message.serialize(&mut packet);
        packet.write_header();

        let mut packet = Packet::from_frame(packet.into_bytes());
        let tag = packet.read_u8().unwrap();
        assert_eq!(NetMessageType::from_u8(tag), Some(M::TYPE));

        let out = M::deserialize(&mut packet).unwrap();
        assert!(packet.is_valid_and_finished());
        out
    }

    #[test]
    fn test_handshake_roundtrip() {
        let request = HandshakeRequest::current_version();
        assert_eq!(roundtrip(&request), request);

        let response = HandshakeResponse {
            ver_major: 0,
            ver_minor: 1,
            ver_build: 0,
            ok: true,
        };
        assert_eq!(roundtrip(&response), response);
    }

    #[test]
    fn test_ping_pong_roundtrip() {
        let ping = PingMessage { my_time: 120.5 };
        assert_eq!(roundtrip(&ping), ping);

        let pong = PongMessage {
            my_time: 118.0,
            your_time: 120.5,
        };
        assert_eq!(roundtrip(&pong), pong);
    }

    #[test]
    fn test_session_info_roundtrip() {
        let response = GetSessionInfoResponse {
            sessions: vec![
                SessionInfo {
                    name: "developer".to_string(),
                    id: 0,
                    num_players: 1,
                    num_players_connected: 0,
                    state: SessionState::Lobby,
                    has_password: false,
                },
                SessionInfo {
                    name: "duel".to_string(),
                    id: 3,
                    num_players: 2,
                    num_players_connected: 1,
                    state: SessionState::Ingame,
                    has_password: true,
                },
            ],
        };
        assert_eq!(roundtrip(&response), response);
    }

    #[test]
    fn test_create_and_join_roundtrip() {
        let create = CreateSessionRequest {
            num_players: 2,
            num_bots: 1,
            name: "my game".to_string(),
            password: "secret".to_string(),
            player_name: "ada".to_string(),
        };
        assert_eq!(roundtrip(&create), create);

        let join = JoinSessionRequest {
            session_id: 4,
            player_name: "ada".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(roundtrip(&join), join);

        let response = JoinSessionResponse {
            result: JoinSessionResult::Success,
            connected_players: vec![PlayerInfo {
                name: "ada".to_string(),
                display_name: "ada".to_string(),
                ready: false,
            }],
        };
        assert_eq!(roundtrip(&response), response);
    }

    #[test]
    fn test_lobby_update_roundtrip() {
        let joined = LobbyUpdateMessage {
            update: LobbyUpdate::PlayerJoined(PlayerInfo {
                name: "bob".to_string(),
                display_name: "bob [dev:1]".to_string(),
                ready: false,
            }),
        };
        assert_eq!(roundtrip(&joined), joined);

        let left = LobbyUpdateMessage {
            update: LobbyUpdate::PlayerLeft {
                player_name: "bob".to_string(),
            },
        };
        assert_eq!(roundtrip(&left), left);

        let updated = LobbyUpdateMessage {
            update: LobbyUpdate::UpdatePlayerInfo(PlayerInfo {
                name: "bob".to_string(),
                display_name: "bob".to_string(),
                ready: true,
            }),
        };
        assert_eq!(roundtrip(&updated), updated);
    }

    #[test]
    fn test_remaining_messages_roundtrip() {
        assert_eq!(
            roundtrip(&GameStartedMessage { player_tank: 77 }),
            GameStartedMessage { player_tank: 77 }
        );
        assert_eq!(roundtrip(&LeaveSessionMessage), LeaveSessionMessage);
        assert_eq!(roundtrip(&ReadyMessage), ReadyMessage);
        assert_eq!(roundtrip(&LoadLevelMessage), LoadLevelMessage);
        assert_eq!(roundtrip(&GameCommandMessage), GameCommandMessage);
        assert_eq!(roundtrip(&ShutdownMessage), ShutdownMessage);

        let nudge = SetTickLengthMessage {
            tick_length_delta_microseconds: -750,
            duration_milliseconds: 650,
        };
        assert_eq!(roundtrip(&nudge), nudge);

        let pause = PauseGameMessage { paused: true };
        assert_eq!(roundtrip(&pause), pause);

        let disconnect = DisconnectMessage {
            reason: DisconnectReason::ProtoErr,
            message: "Protocol error".to_string(),
        };
        assert_eq!(roundtrip(&disconnect), disconnect);
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        assert_eq!(NetMessageType::from_u8(0), None);
        assert_eq!(NetMessageType::from_u8(17), None);
    }
}
