// Round countdowns and the frame loop, each a cancellable task tagged with a generation.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Auto-skips when it runs out.
    ItemSelection,
    /// Discards the provisional obstacle when it runs out.
    Placement,
    /// Display only; round end comes from the host.
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerTick {
    Countdown {
        kind: TimerKind,
        generation: u64,
        remaining: u32,
    },
    Frame {
        generation: u64,
    },
}

/// Aborts its task when dropped, so replacing or clearing a slot cancels it.
#[derive(Debug)]
struct TaskGuard {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
pub struct RoundScheduler {
    tick_tx: mpsc::Sender<SchedulerTick>,
    next_generation: u64,
    item_selection: Option<TaskGuard>,
    placement: Option<TaskGuard>,
    round: Option<TaskGuard>,
    frames: Option<TaskGuard>,
}

impl RoundScheduler {
    pub fn new(tick_tx: mpsc::Sender<SchedulerTick>) -> Self {
        Self {
            tick_tx,
            next_generation: 1,
            item_selection: None,
            placement: None,
            round: None,
            frames: None,
        }
    }

    /// Starts (or restarts) a countdown ticking once per second down to zero.
    pub fn start_countdown(&mut self, kind: TimerKind, seconds: u32) -> u64 {
        let generation = self.bump();
        let tx = self.tick_tx.clone();
        let task = tokio::spawn(run_countdown(tx, kind, generation, seconds));
        debug!(?kind, generation, seconds, "countdown started");
        *self.slot(kind) = Some(TaskGuard { generation, task });
        generation
    }

    /// Returns true when a live countdown was cancelled.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let cancelled = self.slot(kind).take().is_some();
        if cancelled {
            debug!(?kind, "countdown cancelled");
        }
        cancelled
    }

    #[cfg(test)]
    pub fn is_running(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::ItemSelection => self.item_selection.is_some(),
            TimerKind::Placement => self.placement.is_some(),
            TimerKind::Round => self.round.is_some(),
        }
    }

    pub fn start_frames(&mut self, period: Duration) {
        let generation = self.bump();
        let tx = self.tick_tx.clone();
        let task = tokio::spawn(run_frames(tx, generation, period));
        self.frames = Some(TaskGuard { generation, task });
    }

    pub fn stop_frames(&mut self) -> bool {
        self.frames.take().is_some()
    }

    #[cfg(test)]
    pub fn frames_running(&self) -> bool {
        self.frames.is_some()
    }

    /// False for ticks from a cancelled or replaced task that were already queued.
    pub fn accepts(&self, tick: &SchedulerTick) -> bool {
        match *tick {
            SchedulerTick::Countdown {
                kind, generation, ..
            } => {
                let slot = match kind {
                    TimerKind::ItemSelection => &self.item_selection,
                    TimerKind::Placement => &self.placement,
                    TimerKind::Round => &self.round,
                };
                slot.as_ref().is_some_and(|guard| guard.generation == generation)
            }
            SchedulerTick::Frame { generation } => self
                .frames
                .as_ref()
                .is_some_and(|guard| guard.generation == generation),
        }
    }

    /// Cancels everything. Used on teardown and room reset.
    pub fn shutdown(&mut self) {
        self.item_selection = None;
        self.placement = None;
        self.round = None;
        self.frames = None;
    }

    fn bump(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<TaskGuard> {
        match kind {
            TimerKind::ItemSelection => &mut self.item_selection,
            TimerKind::Placement => &mut self.placement,
            TimerKind::Round => &mut self.round,
        }
    }
}

async fn run_countdown(
    tx: mpsc::Sender<SchedulerTick>,
    kind: TimerKind,
    generation: u64,
    seconds: u32,
) {
    let period = Duration::from_secs(1);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    let mut remaining = seconds;

    loop {
        if remaining > 0 {
            interval.tick().await;
            remaining -= 1;
        }
        let tick = SchedulerTick::Countdown {
            kind,
            generation,
            remaining,
        };
        if tx.send(tick).await.is_err() || remaining == 0 {
            break;
        }
    }
}

async fn run_frames(tx: mpsc::Sender<SchedulerTick>, generation: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        match tx.try_send(SchedulerTick::Frame { generation }) {
            // A busy session drops frames instead of queueing them.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => break,
        }
    }
}
