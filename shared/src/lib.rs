//! Shared protocol and simulation code for the gravwell client and server:
//! the packet codec, the non-blocking TCP transport, wire messages, game
//! commands, the entity registry and the tick engine both sides run.

pub mod commands;
pub mod components;
pub mod entity;
pub mod game_state;
pub mod messages;
pub mod packet;
pub mod socket;
pub mod timer;
pub mod vec2;

pub use commands::GameCommand;
pub use entity::{Entity, EntityRegistry, Prefab};
pub use game_state::GameState;
pub use messages::{NetMessage, NetMessageType, DEFAULT_PORT};
pub use packet::Packet;
pub use socket::{SocketResult, SocketState, TcpSocket};
pub use timer::FrameTimer;
pub use vec2::Vec2;
