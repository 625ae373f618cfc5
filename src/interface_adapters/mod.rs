// Interface adapters: wire protocol and the connection to the room host.

pub mod net;
pub mod protocol;
pub mod utils;
