use std::time::Duration;

/// Countdown lengths and loop rates for a round.

#[derive(Debug, Clone, Copy)]
pub struct RoundTuning {
    /// Seconds to pick an item before an automatic skip.
    pub item_selection_secs: u32,

    /// Advisory round clock shown while playing.
    pub round_secs: u32,

    /// Seconds a claimed item may stay unplaced.
    pub placement_secs: u32,

    /// Physics step period.
    pub frame_interval: Duration,

    /// Minimum spacing between outbound position updates.
    pub position_sync_interval: Duration,
}

impl Default for RoundTuning {
    fn default() -> Self {
        Self {
            item_selection_secs: 15,
            round_secs: 120,
            placement_secs: 30,
            frame_interval: Duration::from_millis(1000 / 60),
            position_sync_interval: Duration::from_millis(100),
        }
    }
}
