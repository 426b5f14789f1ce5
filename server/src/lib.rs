//! The authoritative game server: connection registry, per-connection
//! protocol states, sessions and the server-side simulation.

pub mod connection;
pub mod game;
pub mod server;
pub mod session;
pub mod states;

pub use connection::ClientConnection;
pub use game::ServerGameState;
pub use server::{Server, ServerCtx};
pub use session::Session;
pub use states::ConnectionState;
