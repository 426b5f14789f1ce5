//! End-to-end tests driving a real server and real clients over loopback
//! TCP, single-threaded, by pumping ticks manually.

use std::time::Duration;

use client::states::ClientState;
use client::{Client, ClientConfig, ClientInput};
use server::Server;
use shared::messages::{
    DisconnectReason, HandshakeRequest, HandshakeResponse, NetMessage, NetMessageType,
};
use shared::packet::Packet;
use shared::socket::SocketState;
use shared::Entity;

fn start_server() -> Server {
    Server::start("127.0.0.1:0".parse().unwrap()).expect("server start")
}

fn connect_client(server: &Server, name: &str) -> Client {
    let address = server.local_addr().expect("server address");
    let mut client = Client::new(ClientConfig {
        player_name: name.to_string(),
        server_address: Some(address),
    });
    client.input(ClientInput::Play);
    client
}

/// One cooperative round: a server tick, then every client's frame.
fn pump(server: &mut Server, clients: &mut [&mut Client]) {
    server.tick(1.0);
    for client in clients.iter_mut() {
        client.pump_network();
        client.tick(1.0);
    }
    std::thread::sleep(Duration::from_millis(1));
}

fn find_session_id(client: &Client, name: &str) -> Option<u16> {
    match client.state() {
        Some(ClientState::SessionBrowser(browser)) => browser
            .sessions
            .iter()
            .find(|session| session.name == name)
            .map(|session| session.id),
        _ => None,
    }
}

fn ingame_entity_count(client: &Client) -> Option<usize> {
    match client.state() {
        Some(ClientState::Ingame(ingame)) => Some(ingame.game.game.entities.len()),
        _ => None,
    }
}

fn my_tank(client: &Client) -> Option<Entity> {
    match client.state() {
        Some(ClientState::Ingame(ingame)) => ingame.game.my_tank,
        _ => None,
    }
}

fn tank_delta_in_replica(client: &Client, tank: Entity) -> Option<f32> {
    match client.state() {
        Some(ClientState::Ingame(ingame)) => ingame
            .game
            .game
            .entities
            .get(tank)
            .and_then(|components| components.planet_position.as_ref())
            .map(|planet_position| planet_position.delta),
        _ => None,
    }
}

#[test]
fn test_client_reaches_session_browser() {
    let mut server = start_server();
    let mut client = connect_client(&server, "ada");

    let mut reached = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut client]);
        if client.state_name() == "SessionBrowser" {
            reached = true;
            break;
        }
    }

    assert!(reached, "client never finished the handshake");
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_full_session_flow_to_ingame() {
    let mut server = start_server();
    let mut ada = connect_client(&server, "ada");
    let mut bob = connect_client(&server, "bob");

    // Both clients into the session browser.
    let mut ready = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if ada.state_name() == "SessionBrowser" && bob.state_name() == "SessionBrowser" {
            ready = true;
            break;
        }
    }
    assert!(ready, "clients never reached the session browser");

    // Ada creates a two-player session and lands in its lobby.
    ada.input(ClientInput::OpenCreateSession);
    ada.input(ClientInput::SubmitCreateSession {
        name: "duel".to_string(),
        password: String::new(),
        num_players: 2,
        num_bots: 0,
    });

    let mut in_lobby = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if ada.state_name() == "Lobby" {
            in_lobby = true;
            break;
        }
    }
    assert!(in_lobby, "creator never reached the lobby");

    // Bob discovers the session in the browser and joins it.
    bob.input(ClientInput::RefreshSessions);
    let mut session_id = None;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        session_id = find_session_id(&bob, "duel");
        if session_id.is_some() {
            break;
        }
    }
    let session_id = session_id.expect("created session never showed up in the browser");

    bob.input(ClientInput::JoinSession {
        session_id,
        password: String::new(),
    });

    let mut in_lobby = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if bob.state_name() == "Lobby" {
            in_lobby = true;
            break;
        }
    }
    assert!(in_lobby, "joiner never reached the lobby");

    // One ready toggle is not enough to start a two-player game.
    ada.input(ClientInput::ToggleReady);
    for _ in 0..50 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
    }
    assert_eq!(ada.state_name(), "Lobby");

    // The second toggle starts the game; both replicas load the level.
    bob.input(ClientInput::ToggleReady);

    let mut loaded = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        let ada_entities = ingame_entity_count(&ada).unwrap_or(0);
        let bob_entities = ingame_entity_count(&bob).unwrap_or(0);
        if ada_entities > 0 && bob_entities > 0 {
            loaded = true;
            break;
        }
    }
    assert!(loaded, "level snapshot never arrived");

    // Identical worlds: 2 tanks + (2 + 0 + 3) planets on both replicas.
    assert_eq!(ingame_entity_count(&ada), Some(7));
    assert_eq!(ingame_entity_count(&bob), Some(7));

    let ada_tank = my_tank(&ada).expect("ada has no tank");
    let bob_tank = my_tank(&bob).expect("bob has no tank");
    assert_ne!(ada_tank, bob_tank);

    // A movement command from ada replicates into bob's world.
    ada.input(ClientInput::MoveLeft);
    let mut replicated = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if tank_delta_in_replica(&bob, ada_tank) == Some(0.5) {
            replicated = true;
            break;
        }
    }
    assert!(replicated, "movement command never replicated");
}

#[test]
fn test_handshake_version_mismatch_disconnects() {
    let mut server = start_server();
    let address = server.local_addr().unwrap();

    let mut socket = shared::TcpSocket::new();
    socket.connect(address);

    for _ in 0..1000 {
        server.tick(1.0);
        socket.do_connect();
        if socket.state() == SocketState::Connected {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(socket.state(), SocketState::Connected);

    let mut packet = Packet::new();
    HandshakeRequest {
        ver_major: 9,
        ver_minor: 9,
        ver_build: 9,
    }
    .serialize(&mut packet);
    packet.write_header();
    socket.push(packet);

    let mut got_response = false;
    let mut got_disconnect = false;

    'outer: for _ in 0..1000 {
        server.tick(1.0);
        socket.do_send();
        socket.do_recv();

        while let Some(mut packet) = socket.pop() {
            let tag = packet.read_u8().and_then(NetMessageType::from_u8);
            match tag {
                Some(NetMessageType::Handshake) => {
                    let response = HandshakeResponse::deserialize(&mut packet).unwrap();
                    assert!(!response.ok);
                    got_response = true;
                }
                Some(NetMessageType::Disconnect) => {
                    let message =
                        shared::messages::DisconnectMessage::deserialize(&mut packet).unwrap();
                    assert_eq!(message.reason, DisconnectReason::ProtoErr);
                    got_disconnect = true;
                    break 'outer;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(got_response, "no handshake response received");
    assert!(got_disconnect, "no disconnect message received");
}

#[test]
fn test_join_rejections_leave_connection_alive() {
    let mut server = start_server();
    let locked = server
        .ctx
        .create_session("locked", "hunter2", 1, 0, false)
        .expect("create session") as u16;

    let mut ada = connect_client(&server, "ada");
    let mut bob = connect_client(&server, "bob");

    let mut ready = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if ada.state_name() == "SessionBrowser" && bob.state_name() == "SessionBrowser" {
            ready = true;
            break;
        }
    }
    assert!(ready);

    // Wrong password: rejected, but the connection stays up in the browser.
    ada.input(ClientInput::JoinSession {
        session_id: locked,
        password: "wrong".to_string(),
    });
    for _ in 0..100 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
    }
    assert_eq!(ada.state_name(), "SessionBrowser");

    // Right password joins; the session is now full.
    ada.input(ClientInput::JoinSession {
        session_id: locked,
        password: "hunter2".to_string(),
    });
    let mut in_lobby = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
        if ada.state_name() == "Lobby" {
            in_lobby = true;
            break;
        }
    }
    assert!(in_lobby);

    // Full session: bob is rejected and keeps browsing.
    bob.input(ClientInput::JoinSession {
        session_id: locked,
        password: "hunter2".to_string(),
    });
    for _ in 0..100 {
        pump(&mut server, &mut [&mut ada, &mut bob]);
    }
    assert_eq!(bob.state_name(), "SessionBrowser");
    assert_eq!(server.connection_count(), 2);
}

#[test]
fn test_leaving_lobby_returns_to_browser() {
    let mut server = start_server();
    let session_id = server
        .ctx
        .create_session("open", "", 2, 0, false)
        .expect("create session") as u16;

    let mut ada = connect_client(&server, "ada");

    let mut ready = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada]);
        if ada.state_name() == "SessionBrowser" {
            ready = true;
            break;
        }
    }
    assert!(ready);

    ada.input(ClientInput::JoinSession {
        session_id,
        password: String::new(),
    });
    let mut in_lobby = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada]);
        if ada.state_name() == "Lobby" {
            in_lobby = true;
            break;
        }
    }
    assert!(in_lobby);

    // Leave, then verify the browser works again end to end: the session
    // list request after leaving must be answered.
    ada.input(ClientInput::LeaveSession);

    let mut listed = false;
    for _ in 0..1000 {
        pump(&mut server, &mut [&mut ada]);
        if find_session_id(&ada, "open").is_some() {
            listed = true;
            break;
        }
    }
    assert!(listed, "session browser broke after leaving a lobby");
}
