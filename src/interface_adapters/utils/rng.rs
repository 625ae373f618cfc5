use crate::use_cases::lobby::room_code;
use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Process-unique, increasing id. Used for connection ids and ack correlation.
pub fn rand_id() -> u64 {
    static NEXT: OnceLock<AtomicU64> = OnceLock::new();
    NEXT.get_or_init(|| AtomicU64::new(clock_seed()))
        .fetch_add(1, Ordering::Relaxed)
}

/// Code for a room this client is about to create.
pub fn fresh_room_code() -> String {
    room_code(rand_id())
}
