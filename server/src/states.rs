//! Per-connection protocol states and their message handlers.
//!
//! The message-type set is closed, so dispatch is one exhaustive match over
//! (state, type) instead of runtime handler registration; a combination
//! without an arm closes the connection, exactly like a missing handler
//! would have.

use log::{info, warn};

use shared::messages::{
    CreateSessionRequest, CreateSessionResponse, DisconnectReason, GetSessionInfoResponse,
    HandshakeRequest, HandshakeResponse, JoinSessionRequest, JoinSessionResponse,
    JoinSessionResult, LeaveSessionMessage, NetMessage, NetMessageType, PauseGameMessage,
    PingMessage, PongMessage, SetTickLengthMessage, VERSION_BUILD, VERSION_MAJOR, VERSION_MINOR,
};
use shared::packet::Packet;

use crate::connection::ClientConnection;
use crate::server::ServerCtx;

/// Protocol position of one connection. Handshake is the entry state;
/// Ingame is entered for a whole session at once when its game starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshake,
    JoinSession,
    Lobby,
    Ingame,
}

pub enum DispatchResult {
    /// The handler ran; the dispatcher still verifies full consumption.
    Handled,
    /// The message body failed to deserialize.
    Malformed,
    /// No handler for this message type in the current state.
    NoHandler,
}

/// Per-tick work of the current state, before packets are dispatched.
pub fn state_tick(con: &mut ClientConnection, ctx: &mut ServerCtx, _dt: f32) {
    if con.state() != ConnectionState::Ingame {
        return;
    }

    // Continuous clock probing: every tick carries the session time.
    if let Some(time) = con.session_id.and_then(|id| ctx.session_time(id)) {
        con.send(&PingMessage { my_time: time });
    }
}

/// Dispatches one message to the current state's handler.
pub fn handle_message(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    msg_type: NetMessageType,
    packet: &mut Packet,
) -> DispatchResult {
    match (con.state(), msg_type) {
        (ConnectionState::Handshake, NetMessageType::Handshake) => {
            handle_handshake(con, ctx, packet)
        }

        (ConnectionState::JoinSession, NetMessageType::GetSessionInfo) => {
            handle_get_session_info(con, ctx)
        }
        (ConnectionState::JoinSession, NetMessageType::CreateSession) => {
            handle_create_session(con, ctx, packet)
        }
        (ConnectionState::JoinSession, NetMessageType::JoinSession) => {
            handle_join_session(con, ctx, packet)
        }

        (ConnectionState::Lobby, NetMessageType::Ready) => handle_ready(con, ctx),
        (ConnectionState::Lobby, NetMessageType::LeaveSession) => handle_leave_session(con, ctx),
        // A client that just joined may still be looking at the session
        // browser (create-then-join does this); keep serving it.
        (ConnectionState::Lobby, NetMessageType::GetSessionInfo) => {
            handle_get_session_info(con, ctx)
        }
        (ConnectionState::Lobby, NetMessageType::JoinSession) => {
            handle_join_session(con, ctx, packet)
        }

        (ConnectionState::Ingame, NetMessageType::GameCommand) => {
            handle_game_command(con, ctx, packet)
        }
        (ConnectionState::Ingame, NetMessageType::SetTickLength) => {
            handle_set_tick_length(con, ctx, packet)
        }
        (ConnectionState::Ingame, NetMessageType::PauseGame) => handle_pause_game(con, ctx, packet),
        (ConnectionState::Ingame, NetMessageType::Pong) => handle_pong(con, ctx, packet),

        _ => DispatchResult::NoHandler,
    }
}

fn handle_handshake(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let request = match HandshakeRequest::deserialize(packet) {
        Some(request) => request,
        None => return DispatchResult::Malformed,
    };

    let ok = request.ver_major == VERSION_MAJOR
        && request.ver_minor == VERSION_MINOR
        && request.ver_build == VERSION_BUILD;

    con.send(&HandshakeResponse {
        ver_major: VERSION_MAJOR,
        ver_minor: VERSION_MINOR,
        ver_build: VERSION_BUILD,
        ok,
    });

    if !ok {
        con.close(ctx, false, DisconnectReason::ProtoErr, "Protocol error");
    }

    con.request_state(ctx, ConnectionState::JoinSession);
    DispatchResult::Handled
}

fn handle_get_session_info(con: &mut ClientConnection, ctx: &mut ServerCtx) -> DispatchResult {
    let response = GetSessionInfoResponse {
        sessions: ctx.session_infos(),
    };
    con.send(&response);
    DispatchResult::Handled
}

fn handle_create_session(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let request = match CreateSessionRequest::deserialize(packet) {
        Some(request) => request,
        None => return DispatchResult::Malformed,
    };

    let session_id = ctx.create_session(
        &request.name,
        &request.password,
        request.num_players as usize,
        request.num_bots as usize,
        false,
    );

    con.send(&CreateSessionResponse {
        created_session_id: session_id.map(|id| id as u16).unwrap_or(u16::MAX),
        success: session_id.is_some(),
    });

    DispatchResult::Handled
}

fn handle_join_session(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let request = match JoinSessionRequest::deserialize(packet) {
        Some(request) => request,
        None => return DispatchResult::Malformed,
    };

    let result = ctx.join_session(
        request.session_id as usize,
        con,
        &request.player_name,
        &request.password,
    );

    let connected_players = if result == JoinSessionResult::Success {
        con.session_id
            .and_then(|id| ctx.session(id))
            .map(|session| session.player_infos())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    con.send(&JoinSessionResponse {
        result,
        connected_players,
    });

    if result == JoinSessionResult::Success {
        con.request_state(ctx, ConnectionState::Lobby);
    }

    DispatchResult::Handled
}

fn handle_ready(con: &mut ClientConnection, ctx: &mut ServerCtx) -> DispatchResult {
    let session_id = match con.session_id {
        Some(session_id) => session_id,
        None => {
            con.close(ctx, false, DisconnectReason::Invalid, "No session assigned");
            return DispatchResult::Handled;
        }
    };

    match ctx.set_player_ready(session_id, con) {
        Some(true) => {}
        Some(false) => {
            con.close(ctx, false, DisconnectReason::Invalid, "Invalid ready state");
        }
        None => {
            con.close(ctx, false, DisconnectReason::Invalid, "Not in any session");
        }
    }

    DispatchResult::Handled
}

fn handle_leave_session(con: &mut ClientConnection, ctx: &mut ServerCtx) -> DispatchResult {
    if let Some(session_id) = con.session_id {
        ctx.remove_from_session(session_id, con);
    }

    con.send(&LeaveSessionMessage);
    // Back to serving the session browser.
    con.request_state(ctx, ConnectionState::JoinSession);

    DispatchResult::Handled
}

fn handle_game_command(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let session_id = match con.session_id {
        Some(session_id) => session_id,
        None => {
            con.close(
                ctx,
                false,
                DisconnectReason::Invalid,
                "Can not handle game command: invalid session",
            );
            return DispatchResult::Handled;
        }
    };

    if !ctx.handle_game_command(session_id, con.player_id, packet) {
        con.close(
            ctx,
            false,
            DisconnectReason::Invalid,
            "Can not handle game command: invalid session",
        );
    }

    DispatchResult::Handled
}

fn handle_set_tick_length(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let message = match SetTickLengthMessage::deserialize(packet) {
        Some(message) => message,
        None => return DispatchResult::Malformed,
    };

    if !con.is_admin() {
        con.close(
            ctx,
            false,
            DisconnectReason::Invalid,
            "Setting tick length not allowed",
        );
        return DispatchResult::Handled;
    }

    ctx.timer.set_tick_length_delta(
        message.tick_length_delta_microseconds,
        message.duration_milliseconds,
    );
    info!(
        "Set tick length delta: {}us duration: {}ms",
        message.tick_length_delta_microseconds, message.duration_milliseconds
    );

    if let Some(session_id) = con.session_id {
        ctx.broadcast_message(session_id, &message);
    }

    DispatchResult::Handled
}

fn handle_pause_game(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let message = match PauseGameMessage::deserialize(packet) {
        Some(message) => message,
        None => return DispatchResult::Malformed,
    };

    if !con.is_admin() {
        con.close(
            ctx,
            false,
            DisconnectReason::Invalid,
            "Pausing game not allowed",
        );
        return DispatchResult::Handled;
    }

    ctx.timer.paused = message.paused;

    if let Some(session_id) = con.session_id {
        ctx.broadcast_message(session_id, &message);
    }

    DispatchResult::Handled
}

const SPEED_CHANGE_COOLDOWN: f32 = 9.0;
const PUNISHABLE_OFFENSE: f32 = 50.0;
const SKEW_EPSILON: f32 = 3.5;
const NUDGE_MICROSECONDS: i16 = 750;
const NUDGE_DURATION_MILLISECONDS: u16 = 650;

fn handle_pong(
    con: &mut ClientConnection,
    ctx: &mut ServerCtx,
    packet: &mut Packet,
) -> DispatchResult {
    let message = match PongMessage::deserialize(packet) {
        Some(message) => message,
        None => return DispatchResult::Malformed,
    };

    let time = match con.session_id.and_then(|id| ctx.session_time(id)) {
        Some(time) => time,
        None => {
            con.close(ctx, false, DisconnectReason::Invalid, "Not in a game");
            return DispatchResult::Handled;
        }
    };

    let rtt = time - message.your_time;
    con.rtt.push(rtt);

    let half_rtt = con.rtt.average() / 2.0;
    let server_time = message.your_time;

    // Best guess of the client's clock (in our notion of time) when the
    // ping arrived, versus where it should have been.
    let approx_client_time = message.my_time - half_rtt;
    let target = server_time + half_rtt;

    // diff < 0: client ahead of the server; diff > 0: client behind.
    let diff = target - approx_client_time;
    con.time_diff.push(diff);

    if con.time_last_speed_change + SPEED_CHANGE_COOLDOWN < time {
        let diff_avg = con.time_diff.average();

        if !cfg!(debug_assertions) && diff_avg.abs() > PUNISHABLE_OFFENSE {
            warn!("Kicking client {} that can't keep up the tick rate", con.id);
            con.close(
                ctx,
                false,
                DisconnectReason::ProtoErr,
                "It looks like you could not keep up the frame rate",
            );
            return DispatchResult::Handled;
        }

        if diff_avg > SKEW_EPSILON {
            con.send(&SetTickLengthMessage {
                tick_length_delta_microseconds: -NUDGE_MICROSECONDS, // Slower
                duration_milliseconds: NUDGE_DURATION_MILLISECONDS,
            });
        } else if diff_avg < -SKEW_EPSILON {
            con.send(&SetTickLengthMessage {
                tick_length_delta_microseconds: NUDGE_MICROSECONDS, // Faster
                duration_milliseconds: NUDGE_DURATION_MILLISECONDS,
            });
        }

        con.time_last_speed_change = time;
    }

    DispatchResult::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::socket::TcpSocket;

    fn test_connection() -> ClientConnection {
        ClientConnection::new(1, TcpSocket::new())
    }

    fn body_packet<M: NetMessage>(message: &M) -> Packet {
        let mut packet = Packet::new();
        message.serialize(&mut packet);
        packet.write_header();

        // Re-read as an inbound frame with the tag already consumed.
        let mut packet = Packet::from_frame(packet.into_bytes());
        packet.read_u8();
        packet
    }

    #[test]
    fn test_handshake_advances_to_join_session() {
        let mut con = test_connection();
        let mut ctx = ServerCtx::new();

        let mut packet = body_packet(&HandshakeRequest::current_version());
        let result = handle_message(&mut con, &mut ctx, NetMessageType::Handshake, &mut packet);
        assert!(matches!(result, DispatchResult::Handled));
        assert!(packet.is_valid_and_finished());
        assert!(!con.closed);

        con.apply_pending_state();
        assert_eq!(con.state(), ConnectionState::JoinSession);
    }

    #[test]
    fn test_handshake_version_mismatch_closes() {
        let mut con = test_connection();
        let mut ctx = ServerCtx::new();

        let mut packet = body_packet(&HandshakeRequest {
            ver_major: 9,
            ver_minor: 9,
            ver_build: 9,
        });
        let result = handle_message(&mut con, &mut ctx, NetMessageType::Handshake, &mut packet);
        assert!(matches!(result, DispatchResult::Handled));
        assert!(con.closed);
    }

    #[test]
    fn test_message_in_wrong_state_has_no_handler() {
        let mut con = test_connection();
        let mut ctx = ServerCtx::new();

        let mut packet = body_packet(&shared::messages::ReadyMessage);
        let result = handle_message(&mut con, &mut ctx, NetMessageType::Ready, &mut packet);
        assert!(matches!(result, DispatchResult::NoHandler));
    }

    #[test]
    fn test_create_session_with_bad_name_reports_failure() {
        let mut con = test_connection();
        con.apply_pending_state();
        let mut ctx = ServerCtx::new();

        // Move the connection into the JoinSession state first.
        let mut packet = body_packet(&HandshakeRequest::current_version());
        handle_message(&mut con, &mut ctx, NetMessageType::Handshake, &mut packet);
        con.apply_pending_state();

        let mut packet = body_packet(&CreateSessionRequest {
            num_players: 2,
            num_bots: 0,
            name: String::new(),
            password: String::new(),
            player_name: "ada".to_string(),
        });
        let result = handle_message(
            &mut con,
            &mut ctx,
            NetMessageType::CreateSession,
            &mut packet,
        );
        assert!(matches!(result, DispatchResult::Handled));
        // The rejection is a response, not a teardown.
        assert!(!con.closed);
        assert!(ctx.session_infos().is_empty());
    }
}
