// Network adapter: the WebSocket link to the room host.

pub mod client;

pub use client::{LinkSettings, NetError, PeerLink, spawn_peer_link};
