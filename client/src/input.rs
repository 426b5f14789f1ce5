//! Input intents fed into the client by the embedding frontend.
//!
//! The core consumes abstract intents rather than keyboard/mouse events;
//! translating device input into these is the frontend's job.

#[derive(Debug, Clone, PartialEq)]
pub enum ClientInput {
    /// Menu: connect to the configured server.
    Play,

    /// Session browser: re-request the session list.
    RefreshSessions,
    /// Session browser: join a session from the list.
    JoinSession { session_id: u16, password: String },
    /// Session browser: open the create-session form.
    OpenCreateSession,
    /// Create-session form: submit it.
    SubmitCreateSession {
        name: String,
        password: String,
        num_players: u16,
        num_bots: u16,
    },
    /// Leave the current screen (browser/create form).
    Back,

    /// Lobby: toggle the own ready flag.
    ToggleReady,
    /// Lobby: leave the session.
    LeaveSession,

    /// Ingame: drive the tank along its planet.
    MoveLeft,
    MoveRight,
    StopMoving,
    /// Ingame: aim the turret at an absolute angle in degrees.
    AimTurret { angle: f32 },
    /// Ingame: rotate the turret via held keys.
    RotateTurretLeft,
    RotateTurretRight,
    StopRotatingTurret,
    /// Ingame: fire button pressed (starts charging).
    ChargeStart,
    /// Ingame: fire button released (fires with the held charge).
    ChargeRelease,
    /// Ingame: cycle to the next weapon.
    CycleWeapon,
    /// Ingame: toggle the pause menu flag for the frontend.
    TogglePauseMenu,
}
