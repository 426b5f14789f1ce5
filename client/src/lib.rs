//! The thin game client: protocol state machine, replica simulation and a
//! data-only presentation seam (render snapshots, sound events, input
//! intents). Rendering, audio and window management live in the embedding
//! frontend.

pub mod client;
pub mod game;
pub mod input;
pub mod states;

pub use client::{Client, ClientConfig};
pub use game::{ClientGameState, RenderSnapshot};
pub use input::ClientInput;
pub use states::ClientState;
