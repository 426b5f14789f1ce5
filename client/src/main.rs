//! Thin scripted client: connects, joins or creates a session, readies up
//! and then idles in the game, logging world snapshots. Stands in for the
//! interactive frontend; the protocol flow is exactly the same.

use std::time::{Duration, Instant};

use clap::Parser;
use log::{info, warn};

use client::states::ClientState;
use client::{Client, ClientConfig, ClientInput};
use shared::messages::SessionState;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address (host or host:port)
    #[clap(short, long, default_value = "127.0.0.1")]
    server: String,
    /// Player display name
    #[clap(short, long, default_value = "player")]
    name: String,
    /// Create a session instead of joining one
    #[clap(long)]
    create: bool,
    /// Session id to join (default: first joinable session)
    #[clap(long)]
    session: Option<u16>,
    /// Session name when creating
    #[clap(long, default_value = "gravwell match")]
    session_name: String,
    /// Player capacity when creating
    #[clap(long, default_value = "2")]
    players: u16,
    /// NPC tank count when creating
    #[clap(long, default_value = "0")]
    bots: u16,
    /// Session password, used for both join and create
    #[clap(long, default_value = "")]
    password: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let server_address = ClientConfig::parse_server_address(&args.server);
    if server_address.is_none() {
        warn!("Cannot resolve '{}', using localhost", args.server);
    }

    let mut client = Client::new(ClientConfig {
        player_name: args.name.clone(),
        server_address,
    });
    let mut driver = Driver::new(args);

    client.input(ClientInput::Play);

    info!("Starting the main loop");
    client.timer.start();

    loop {
        client.timer.begin_frame();
        client.pump_network();

        let mut ticks_done = 0u32;
        while !client.timer.frame_done() {
            client.timer.begin_tick();
            driver.drive(&mut client);
            client.tick(1.0);
            client.timer.advance_tick();

            ticks_done += 1;
            if ticks_done > 100 {
                warn!(
                    "Cannot keep up the framerate! Did {} ticks in this main loop iteration",
                    ticks_done
                );
            }
        }

        if client.should_exit() {
            break;
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    info!("Main loop exit");
    Ok(())
}

/// Scripted behavior replacing interactive menus.
struct Driver {
    args: Args,
    submitted_create: bool,
    readied: bool,
    last_refresh: Instant,
    last_report: Instant,
}

impl Driver {
    fn new(args: Args) -> Self {
        Driver {
            args,
            submitted_create: false,
            readied: false,
            last_refresh: Instant::now(),
            last_report: Instant::now(),
        }
    }

    fn drive(&mut self, client: &mut Client) {
        let action = self.next_action(client);
        if let Some(action) = action {
            client.input(action);
        }
    }

    fn next_action(&mut self, client: &mut Client) -> Option<ClientInput> {
        // Back in the menu means the connection is over; report and stop
        // instead of reconnecting forever.
        if matches!(client.state(), Some(ClientState::Menu)) {
            if let Some(message) = client.error_message.take() {
                warn!("{}", message);
            }
            if !client.quit_flag {
                client.quit();
            }
            return None;
        }

        match client.state_mut()? {
            ClientState::SessionBrowser(browser) => {
                if self.args.create {
                    if self.submitted_create {
                        return None;
                    }
                    return Some(ClientInput::OpenCreateSession);
                }

                let wanted = self.args.session;
                let candidate = browser.sessions.iter().find(|session| {
                    match wanted {
                        Some(id) => session.id == id,
                        None => {
                            session.state == SessionState::Lobby
                                && session.num_players_connected < session.num_players
                        }
                    }
                });

                if let Some(session) = candidate {
                    info!("Joining session '{}' ({})", session.name, session.id);
                    return Some(ClientInput::JoinSession {
                        session_id: session.id,
                        password: self.args.password.clone(),
                    });
                }

                if self.last_refresh.elapsed() > Duration::from_secs(1) {
                    self.last_refresh = Instant::now();
                    return Some(ClientInput::RefreshSessions);
                }

                None
            }

            ClientState::CreateSession(_) => {
                if self.submitted_create {
                    return None;
                }
                self.submitted_create = true;

                Some(ClientInput::SubmitCreateSession {
                    name: self.args.session_name.clone(),
                    password: self.args.password.clone(),
                    num_players: self.args.players,
                    num_bots: self.args.bots,
                })
            }

            ClientState::Lobby(_) => {
                if self.readied {
                    return None;
                }
                self.readied = true;
                Some(ClientInput::ToggleReady)
            }

            ClientState::Ingame(ingame) => {
                for sfx in ingame.game.drain_sfx() {
                    info!("sfx: {:?}", sfx);
                }

                if self.last_report.elapsed() > Duration::from_secs(2) {
                    self.last_report = Instant::now();

                    let snapshot = ingame.game.snapshot();
                    info!(
                        "t={:.0} planets={} tanks={} projectiles={}",
                        snapshot.time,
                        snapshot.planets.len(),
                        snapshot.tanks.len(),
                        snapshot.projectiles.len()
                    );

                    // Sweep the turret around slowly so spectators see life.
                    let angle = (snapshot.time * 0.36) % 360.0;
                    return Some(ClientInput::AimTurret { angle });
                }

                None
            }

            _ => None,
        }
    }
}
