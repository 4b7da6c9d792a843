pub mod actor;
pub mod broadcast;
pub mod events;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

/// Sender half of a WebSocket connection's bounded outbound queue.
/// Other parts of the system clone this to push frames to a specific client.
pub type ConnectionSender = mpsc::Sender<axum::extract::ws::Message>;

/// Close codes sent to clients.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    /// A newer connection for the same user took over.
    pub const SUPERSEDED: u16 = 4000;
    /// No `auth` message arrived in time.
    pub const AUTH_TIMEOUT: u16 = 4001;
    /// The liveness sweeper found no heartbeat within the timeout.
    pub const HEARTBEAT_TIMEOUT: u16 = 4008;
    /// Presence could not be persisted.
    pub const INTERNAL_ERROR: u16 = 1011;
}
