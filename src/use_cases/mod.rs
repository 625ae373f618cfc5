// Use cases layer: the room session and the rules it coordinates.

pub mod lobby;
pub mod phase;
pub mod placement;
pub mod scheduler;
pub mod score;
pub mod session;
pub mod types;

pub use lobby::{JoinRequest, LobbyError};
pub use session::{SessionExit, SessionHandle, SessionSettings, spawn_session};
pub use types::{
    Broadcast, Intent, LinkError, Notice, Notify, PeerCommand, PeerEvent, Reply, Request,
    SessionView,
};
