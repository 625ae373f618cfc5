// The per-room session task: owns phase, placement, timers, physics and the room cache.

use super::lobby::{JoinRequest, NO_ROOM};
use super::phase::{HostCommand, SessionStateMachine, Transition, TransitionError, Trigger};
use super::placement::{ClaimOutcome, PlacementArbiter, PlacementError, stamp_millis};
use super::scheduler::{RoundScheduler, SchedulerTick, TimerKind};
use super::score::ScoreAggregator;
use super::types::{
    Broadcast, Intent, LinkError, Notice, Notify, PeerCommand, PeerEvent, Reply, Request,
    SessionView,
};
use crate::domain::catalog::find_scenario;
use crate::domain::systems::physics::normalize_stick;
use crate::domain::systems::{ControlInput, PhysicsEngine, PhysicsEvent, WorldView};
use crate::domain::tuning::{LevelTuning, PhysicsTuning, RoundTuning};
use crate::domain::{ObstacleType, Phase, PlayerId, Projectile, RoomState, Viewport};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

/// Everything a session needs besides its channels.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub join: JoinRequest,
    pub viewport: Viewport,
    /// How long a request may wait for its acknowledgment.
    pub ack_timeout: Duration,
    pub physics: PhysicsTuning,
    pub level: LevelTuning,
    pub round: RoundTuning,
}

impl SessionSettings {
    pub fn new(join: JoinRequest, viewport: Viewport, ack_timeout: Duration) -> Self {
        Self {
            join,
            viewport,
            ack_timeout,
            physics: PhysicsTuning::default(),
            level: LevelTuning::default(),
            round: RoundTuning::default(),
        }
    }
}

/// Why the session task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    Left,
    LinkClosed,
    Unreachable,
    JoinFailed(String),
}

/// Presentation-side handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    pub intents: mpsc::Sender<Intent>,
    pub view: watch::Receiver<SessionView>,
    notices: broadcast::Sender<Notice>,
    task: JoinHandle<SessionExit>,
}

impl SessionHandle {
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    /// Waits for the session to end.
    pub async fn finished(self) -> SessionExit {
        self.task.await.unwrap_or(SessionExit::LinkClosed)
    }
}

const INTENT_CHANNEL_CAPACITY: usize = 64;
const TICK_CHANNEL_CAPACITY: usize = 64;
const ACK_CHANNEL_CAPACITY: usize = 16;
const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Starts the session task for one room.
pub fn spawn_session(
    settings: SessionSettings,
    peer_events: mpsc::Receiver<PeerEvent>,
    peer_commands: mpsc::Sender<PeerCommand>,
) -> SessionHandle {
    let (intent_tx, intent_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
    let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
    let (ack_tx, ack_rx) = mpsc::channel(ACK_CHANNEL_CAPACITY);
    let (notice_tx, _notice_rx) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

    let context = SessionContext::new(settings, peer_commands, ack_tx, tick_tx, notice_tx.clone());
    let (view_tx, view_rx) = watch::channel(context.view());
    let span = info_span!("session", room_id = %context.settings.join.room_id);
    let task = tokio::spawn(
        context
            .run(view_tx, peer_events, intent_rx, tick_rx, ack_rx)
            .instrument(span),
    );

    SessionHandle {
        intents: intent_tx,
        view: view_rx,
        notices: notice_tx,
        task,
    }
}

/// Acknowledgments routed back into the session loop.
#[derive(Debug)]
enum AckEvent {
    Joined(Result<Reply, LinkError>),
    Created(Result<Reply, LinkError>),
    Snapshot(Result<Reply, LinkError>),
    Claim {
        kind: ObstacleType,
        result: Result<Reply, LinkError>,
    },
}

enum Flow {
    Continue,
    Exit(SessionExit),
}

struct SessionContext {
    settings: SessionSettings,
    peer_tx: mpsc::Sender<PeerCommand>,
    ack_tx: mpsc::Sender<AckEvent>,
    notice_tx: broadcast::Sender<Notice>,
    scheduler: RoundScheduler,
    machine: SessionStateMachine,
    arbiter: PlacementArbiter,
    scores: ScoreAggregator,
    engine: PhysicsEngine,
    room: RoomState,
    projectiles: Vec<Projectile>,
    self_id: Option<PlayerId>,
    connected: bool,
    has_connected: bool,
    control: ControlInput,
    last_sync: Option<Instant>,
    item_seconds_left: Option<u32>,
    placement_seconds_left: Option<u32>,
    round_seconds_left: Option<u32>,
    winner: Option<String>,
}

impl SessionContext {
    fn new(
        settings: SessionSettings,
        peer_tx: mpsc::Sender<PeerCommand>,
        ack_tx: mpsc::Sender<AckEvent>,
        tick_tx: mpsc::Sender<SchedulerTick>,
        notice_tx: broadcast::Sender<Notice>,
    ) -> Self {
        let engine = PhysicsEngine::new(
            settings.physics,
            settings.level,
            settings.viewport,
            settings.level.default_ground_y,
        );
        Self {
            settings,
            peer_tx,
            ack_tx,
            notice_tx,
            scheduler: RoundScheduler::new(tick_tx),
            machine: SessionStateMachine::default(),
            arbiter: PlacementArbiter::default(),
            scores: ScoreAggregator::default(),
            engine,
            room: RoomState::default(),
            projectiles: Vec::new(),
            self_id: None,
            connected: false,
            has_connected: false,
            control: ControlInput::default(),
            last_sync: None,
            item_seconds_left: None,
            placement_seconds_left: None,
            round_seconds_left: None,
            winner: None,
        }
    }

    async fn run(
        mut self,
        view_tx: watch::Sender<SessionView>,
        mut peer_rx: mpsc::Receiver<PeerEvent>,
        mut intent_rx: mpsc::Receiver<Intent>,
        mut tick_rx: mpsc::Receiver<SchedulerTick>,
        mut ack_rx: mpsc::Receiver<AckEvent>,
    ) -> SessionExit {
        info!(name = %self.settings.join.name, "session started");

        let exit = loop {
            // Each branch applies one input completely before the next is polled.
            let flow = tokio::select! {
                event = peer_rx.recv() => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => Flow::Exit(SessionExit::LinkClosed),
                },
                intent = intent_rx.recv() => match intent {
                    Some(intent) => self.on_intent(intent).await,
                    None => {
                        self.notify(Notify::LeaveRoom).await;
                        Flow::Exit(SessionExit::Left)
                    }
                },
                Some(tick) = tick_rx.recv() => self.on_tick(tick).await,
                Some(ack) = ack_rx.recv() => self.on_ack(ack).await,
            };

            let _ = view_tx.send(self.view());
            if let Flow::Exit(exit) = flow {
                break exit;
            }
        };

        self.scheduler.shutdown();
        info!(?exit, "session ended");
        exit
    }

    // ---- peer events ----

    async fn on_peer_event(&mut self, event: PeerEvent) -> Flow {
        match event {
            PeerEvent::Connected { self_id } => {
                info!(%self_id, "connected");
                self.self_id = Some(self_id);
                self.connected = true;
                if self.has_connected {
                    self.emit(Notice::Reconnected);
                }
                self.has_connected = true;
                let join = self.settings.join.join();
                self.request(join, AckEvent::Joined).await;
                Flow::Continue
            }
            PeerEvent::Disconnected => {
                warn!("disconnected from peer");
                self.connected = false;
                self.emit(Notice::Disconnected);
                Flow::Continue
            }
            PeerEvent::Unreachable => {
                self.connected = false;
                self.emit(Notice::PeerUnreachable);
                Flow::Exit(SessionExit::Unreachable)
            }
            PeerEvent::Broadcast(broadcast) => {
                self.on_broadcast(broadcast);
                Flow::Continue
            }
        }
    }

    fn on_broadcast(&mut self, broadcast: Broadcast) {
        match broadcast {
            Broadcast::RoomUpdate(state) => self.apply_snapshot(state),
            Broadcast::PlayerMoved(player) => {
                if self.is_self(&player.id) {
                    return;
                }
                match self.room.players.get_mut(&player.id) {
                    Some(known) => {
                        known.x = player.x;
                        known.y = player.y;
                    }
                    None => {
                        self.room.players.insert(player.id.clone(), player);
                    }
                }
            }
            Broadcast::RoundStarted {
                obstacles,
                scenario,
                players,
            } => {
                self.room.obstacles = obstacles;
                if scenario.is_some() {
                    self.room.scenario = scenario;
                }
                self.room.players = players;
                self.projectiles.clear();
                self.engine.respawn(self.ground_y());
                self.fire(Trigger::RoundStarted);
            }
            Broadcast::ScenarioSelection => {
                self.winner = None;
                self.fire(Trigger::ScenarioSelectionOpened);
            }
            Broadcast::BuildingPhase { scenario } => {
                self.room.scenario = Some(scenario);
                self.engine.respawn(self.ground_y());
                self.fire(Trigger::BuildingOpened);
            }
            Broadcast::ObstacleAdded(obstacle) => {
                if !self.room.obstacles.iter().any(|o| o.id == obstacle.id) {
                    self.room.obstacles.push(obstacle);
                }
            }
            Broadcast::ObstaclesUpdate(obstacles) => self.room.obstacles = obstacles,
            Broadcast::ItemTaken(kind) => self.arbiter.mark_taken(kind),
            Broadcast::StartPlaying => self.fire(Trigger::PlacementsSettled),
            Broadcast::ProjectilesUpdate(projectiles) => self.projectiles = projectiles,
            Broadcast::RoundEnd { new_points } => {
                let transition = match self.machine.fire(Trigger::RoundEnded) {
                    Ok(transition) => transition,
                    Err(e) => {
                        warn!(error = %e, "round end ignored");
                        return;
                    }
                };
                let fallback = self.settings.level.default_ground_y;
                self.scores
                    .apply_round_end(&mut self.room, &mut self.engine, &new_points, fallback);
                self.projectiles.clear();
                self.last_sync = None;
                self.on_transition(transition);
            }
            Broadcast::GameWinner { winner_id } => {
                let name = self
                    .room
                    .player_name(&winner_id)
                    .unwrap_or(winner_id.as_str())
                    .to_string();
                self.fire(Trigger::WinnerAnnounced);
                self.winner = Some(name.clone());
                self.emit(Notice::Winner { name });
            }
            Broadcast::RoomReset => {
                self.room.obstacles.clear();
                self.room.scenario = None;
                self.projectiles.clear();
                self.winner = None;
                self.scores.reset_points(&mut self.room);
                self.engine.respawn(self.ground_y());
                self.fire(Trigger::RoomReset);
            }
            Broadcast::NewHost { host_id } => {
                let was_host = self.is_host();
                self.room.host_id = host_id;
                info!(host_id = %self.room.host_id, "host changed");
                if !was_host && self.is_host() {
                    self.emit(Notice::BecameHost);
                }
            }
        }
    }

    /// Replaces the room cache wholesale. The local body is never touched.
    fn apply_snapshot(&mut self, state: RoomState) {
        let was_host = self.is_host();
        let reported = state.phase;
        let ground_before = self.ground_y();
        self.room = state;
        if let Some(id) = &self.self_id {
            let body = self.engine.body();
            if let Some(me) = self.room.players.get_mut(id) {
                me.x = body.x;
                me.y = body.y;
            }
        }
        if self.ground_y() != ground_before && !self.machine.phase().is_round_phase() {
            self.engine.respawn(self.ground_y());
        }

        let transition = self.machine.reconcile(reported);
        if transition.skipped_round_end() {
            // The snapshot already carries the new points.
            info!("round end missed while away; starting the next round");
            let fallback = self.settings.level.default_ground_y;
            self.scores
                .apply_round_end(&mut self.room, &mut self.engine, &HashMap::new(), fallback);
            self.projectiles.clear();
            self.last_sync = None;
        }
        self.on_transition(transition);

        if !was_host && self.is_host() {
            self.emit(Notice::BecameHost);
        }
    }

    // ---- intents ----

    async fn on_intent(&mut self, intent: Intent) -> Flow {
        match intent {
            Intent::StartScenarioSelection => {
                self.host_command(HostCommand::StartScenarioSelection, Notify::StartScenarioSelection)
                    .await
            }
            Intent::StartRound => {
                self.host_command(HostCommand::StartRound, Notify::StartRound)
                    .await
            }
            Intent::ResetRoom => {
                self.host_command(HostCommand::ResetRoom, Notify::ResetRoom)
                    .await
            }
            Intent::SelectScenario(id) => self.select_scenario(&id).await,
            Intent::ClaimItem(kind) => self.claim_item(kind).await,
            Intent::DragProvisional { x, y } => {
                if let Err(e) = self.arbiter.move_provisional(x, y) {
                    debug!(?e, "drag ignored");
                }
            }
            Intent::CommitPlacement => self.commit_placement().await,
            Intent::SkipItem => self.skip_item().await,
            Intent::Stick { dx, dy } => {
                self.control.stick_x = normalize_stick(dx, dy, self.settings.level.stick_radius);
            }
            Intent::Jump => {
                if self.machine.phase() == Phase::Playing {
                    self.engine.jump();
                }
            }
            Intent::ChangeCharacter(glyph) => {
                self.settings.join.character = glyph.clone();
                if let Some(me) = self.self_id.as_ref().and_then(|id| self.room.players.get_mut(id)) {
                    me.character = glyph.clone();
                }
                self.notify(Notify::ChangeCharacter(glyph)).await;
            }
            Intent::Leave => {
                self.notify(Notify::LeaveRoom).await;
                return Flow::Exit(SessionExit::Left);
            }
        }
        Flow::Continue
    }

    /// Host-only actions are checked locally and never reach the peer when refused.
    async fn host_command(&mut self, command: HostCommand, message: Notify) {
        match self.machine.authorize(command, self.is_host()) {
            Ok(()) => self.notify(message).await,
            Err(TransitionError::HostOnly) => {
                info!(action = command.label(), "host-only action refused");
                self.emit(Notice::HostOnly {
                    action: command.label(),
                });
            }
            Err(e) => {
                debug!(error = %e, "host command refused");
                self.emit(Notice::WrongPhase {
                    action: command.label(),
                    phase: self.machine.phase(),
                });
            }
        }
    }

    async fn select_scenario(&mut self, id: &str) {
        if self.machine.phase() != Phase::ScenarioSelecting {
            self.emit(Notice::WrongPhase {
                action: "choose a scenario",
                phase: self.machine.phase(),
            });
            return;
        }
        let Some(scenario) = find_scenario(id) else {
            self.emit(Notice::UnknownScenario(id.to_string()));
            return;
        };

        self.notify(Notify::SelectScenario(scenario.clone())).await;
        self.room.scenario = Some(scenario);
        self.engine.respawn(self.ground_y());
        self.fire(Trigger::ScenarioChosen);
    }

    async fn claim_item(&mut self, kind: ObstacleType) {
        if self.machine.phase() != Phase::ItemSelection {
            self.emit(Notice::WrongPhase {
                action: "claim an item",
                phase: self.machine.phase(),
            });
            return;
        }
        match self.arbiter.begin_claim(kind) {
            Ok(()) => {
                self.request(Request::ClaimItem(kind), move |result| AckEvent::Claim {
                    kind,
                    result,
                })
                .await;
            }
            Err(PlacementError::ItemDisabled(kind)) => self.emit(Notice::ItemUnavailable(kind)),
            Err(e) => debug!(?e, %kind, "claim refused locally"),
        }
    }

    async fn commit_placement(&mut self) {
        let Some(owner) = self.self_id.clone() else {
            return;
        };
        match self.arbiter.commit(&owner, stamp_millis()) {
            Ok(obstacle) => {
                info!(id = %obstacle.id, kind = %obstacle.kind, "obstacle placed");
                self.notify(Notify::PlaceObstacle(obstacle)).await;
                self.notify(Notify::ItemPlaced).await;
                self.fire(Trigger::ObstacleCommitted);
            }
            Err(e) => debug!(?e, "commit refused"),
        }
    }

    async fn skip_item(&mut self) {
        if !matches!(self.machine.phase(), Phase::ItemSelection | Phase::Placing) {
            self.emit(Notice::WrongPhase {
                action: "skip",
                phase: self.machine.phase(),
            });
            return;
        }
        match self.arbiter.skip() {
            Ok(dropped) => {
                debug!(?dropped, "item selection skipped");
                self.notify(Notify::SkipItemSelection).await;
                self.fire(Trigger::SelectionSkipped);
            }
            Err(e) => debug!(?e, "skip refused"),
        }
    }

    // ---- timers ----

    async fn on_tick(&mut self, tick: SchedulerTick) -> Flow {
        if !self.scheduler.accepts(&tick) {
            debug!(?tick, "stale tick dropped");
            return Flow::Continue;
        }
        match tick {
            SchedulerTick::Frame { .. } => self.on_frame().await,
            SchedulerTick::Countdown {
                kind, remaining, ..
            } => {
                *self.countdown_slot(kind) = Some(remaining);
                if remaining == 0 {
                    self.scheduler.cancel(kind);
                    self.on_countdown_expired(kind).await;
                }
            }
        }
        Flow::Continue
    }

    async fn on_countdown_expired(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::ItemSelection if self.machine.phase() == Phase::ItemSelection => {
                if let Ok(dropped) = self.arbiter.skip() {
                    info!(?dropped, "item selection timed out");
                }
                self.notify(Notify::SkipItemSelection).await;
                self.fire(Trigger::SelectionTimedOut);
                self.emit(Notice::AutoSkipped);
            }
            TimerKind::Placement if self.machine.phase() == Phase::Placing => {
                if let Ok(dropped) = self.arbiter.skip() {
                    info!(?dropped, "placement timed out");
                }
                self.notify(Notify::SkipItemSelection).await;
                self.fire(Trigger::PlacementTimedOut);
                self.emit(Notice::PlacementExpired);
            }
            TimerKind::Round => debug!("round clock ran out"),
            _ => debug!(?kind, "countdown expired outside its phase"),
        }
    }

    async fn on_frame(&mut self) {
        if self.machine.phase() != Phase::Playing {
            return;
        }
        let ground_y = self.ground_y();
        let world = WorldView {
            obstacles: &self.room.obstacles,
            projectiles: &self.projectiles,
            ground_y,
        };
        let events = self.engine.step(self.control, &world);

        for event in events {
            match event {
                PhysicsEvent::Died => {
                    info!("local player died");
                    self.notify(Notify::PlayerDied).await;
                }
                PhysicsEvent::ReachedFlag => {
                    info!("local player reached the flag");
                    self.notify(Notify::ReachedFlag).await;
                }
            }
        }

        self.sync_position();
    }

    /// Publishes the local position at most once per sync interval.
    fn sync_position(&mut self) {
        let now = Instant::now();
        let due = self
            .last_sync
            .is_none_or(|last| now.duration_since(last) >= self.settings.round.position_sync_interval);
        if !due {
            return;
        }
        self.last_sync = Some(now);

        let body = *self.engine.body();
        if let Some(me) = self.self_id.as_ref().and_then(|id| self.room.players.get_mut(id)) {
            me.x = body.x;
            me.y = body.y;
        }
        let update = PeerCommand::Notify(Notify::PlayerUpdate {
            x: body.x,
            y: body.y,
        });
        match self.peer_tx.try_send(update) {
            Ok(()) => {}
            // Position updates are superseded by the next one anyway.
            Err(TrySendError::Full(_)) => debug!("peer link busy; position update dropped"),
            Err(TrySendError::Closed(_)) => debug!("peer link closed"),
        }
    }

    // ---- acknowledgments ----

    async fn on_ack(&mut self, ack: AckEvent) -> Flow {
        match ack {
            AckEvent::Joined(result) | AckEvent::Created(result) => match result {
                Ok(_) => {
                    info!(room_id = %self.settings.join.room_id, "joined room");
                    let glyph = self.settings.join.character.clone();
                    self.notify(Notify::ChangeCharacter(glyph)).await;
                    self.request(Request::RoomSnapshot, AckEvent::Snapshot).await;
                }
                Err(LinkError::Rejected(reason)) if reason == NO_ROOM => {
                    info!(room_id = %self.settings.join.room_id, "room not found; creating it");
                    let create = self.settings.join.create();
                    self.request(create, AckEvent::Created).await;
                }
                Err(LinkError::Rejected(reason)) => {
                    warn!(%reason, "join rejected");
                    self.emit(Notice::JoinFailed(reason.clone()));
                    return Flow::Exit(SessionExit::JoinFailed(reason));
                }
                Err(LinkError::Timeout) if self.connected => {
                    warn!("join not acknowledged; retrying");
                    let join = self.settings.join.join();
                    self.request(join, AckEvent::Joined).await;
                }
                // The next `Connected` event restarts the handshake.
                Err(e) => debug!(error = %e, "join interrupted"),
            },
            AckEvent::Snapshot(result) => match result {
                Ok(Reply::Room(state)) => self.apply_snapshot(state),
                Ok(Reply::Accepted) => warn!("snapshot request acknowledged without room"),
                Err(LinkError::Timeout) if self.connected => {
                    warn!("snapshot not acknowledged; retrying");
                    self.request(Request::RoomSnapshot, AckEvent::Snapshot).await;
                }
                Err(e) => debug!(error = %e, "snapshot request failed"),
            },
            AckEvent::Claim { kind, result } => self.on_claim_ack(kind, result).await,
        }
        Flow::Continue
    }

    async fn on_claim_ack(&mut self, kind: ObstacleType, result: Result<Reply, LinkError>) {
        match result {
            Ok(_) => {
                let at = self.screen_center();
                match self.arbiter.resolve_claim(kind, true, at) {
                    Ok(ClaimOutcome::Granted(provisional)) => {
                        info!(%kind, x = provisional.x, y = provisional.y, "claim granted");
                        self.fire(Trigger::ClaimGranted);
                    }
                    Ok(ClaimOutcome::Lost(_)) => {}
                    Err(_) => {
                        // Granted after we moved on: hand the claim straight back.
                        info!(%kind, "late claim grant; skipping it");
                        self.notify(Notify::SkipItemSelection).await;
                    }
                }
            }
            Err(LinkError::Rejected(reason)) => {
                info!(%kind, %reason, "claim lost");
                if self.arbiter.resolve_claim(kind, false, (0.0, 0.0)).is_ok() {
                    self.emit(Notice::ClaimLost(kind));
                }
            }
            Err(e) => {
                warn!(%kind, error = %e, "claim not confirmed");
                if self.arbiter.abandon_claim(kind) {
                    self.emit(Notice::ClaimUnconfirmed(kind));
                }
            }
        }
    }

    // ---- phase plumbing ----

    fn fire(&mut self, trigger: Trigger) {
        match self.machine.fire(trigger) {
            Ok(transition) => self.on_transition(transition),
            Err(e) => warn!(error = %e, "transition refused"),
        }
    }

    /// Starts and stops the timers owned by the phases being left and entered.
    fn on_transition(&mut self, transition: Transition) {
        if !transition.changed() {
            return;
        }
        let Transition { from, to, .. } = transition;

        match from {
            Phase::ItemSelection => {
                self.scheduler.cancel(TimerKind::ItemSelection);
                self.item_seconds_left = None;
            }
            Phase::Placing => {
                self.scheduler.cancel(TimerKind::Placement);
                self.placement_seconds_left = None;
            }
            Phase::Playing => {
                self.scheduler.cancel(TimerKind::Round);
                self.scheduler.stop_frames();
                self.round_seconds_left = None;
                self.control = ControlInput::default();
            }
            _ => {}
        }

        // Forced out of selection by the host: drop whatever was held.
        let selecting = |phase: Phase| matches!(phase, Phase::ItemSelection | Phase::Placing);
        if selecting(from) && !selecting(to) {
            let _ = self.arbiter.skip();
        }

        let round = self.settings.round;
        match to {
            Phase::ItemSelection => {
                self.arbiter.open_round();
                self.scheduler
                    .start_countdown(TimerKind::ItemSelection, round.item_selection_secs);
                self.item_seconds_left = Some(round.item_selection_secs);
            }
            Phase::Placing => {
                self.scheduler
                    .start_countdown(TimerKind::Placement, round.placement_secs);
                self.placement_seconds_left = Some(round.placement_secs);
            }
            Phase::Playing => {
                self.scheduler
                    .start_countdown(TimerKind::Round, round.round_secs);
                self.scheduler.start_frames(round.frame_interval);
                self.round_seconds_left = Some(round.round_secs);
                self.last_sync = None;
            }
            Phase::WaitingForOthers => {}
            Phase::Waiting | Phase::ScenarioSelecting | Phase::Building | Phase::GameOver => {
                self.arbiter.close();
            }
        }

        self.emit(Notice::PhaseChanged { from, to });
    }

    // ---- helpers ----

    /// Sends a request now and awaits its acknowledgment off the loop.
    async fn request<F>(&mut self, request: Request, wrap: F)
    where
        F: FnOnce(Result<Reply, LinkError>) -> AckEvent + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = PeerCommand::Request {
            request,
            reply: reply_tx,
        };
        let ack_tx = self.ack_tx.clone();
        let ack_timeout = self.settings.ack_timeout;

        if self.peer_tx.send(command).await.is_err() {
            let _ = ack_tx.send(wrap(Err(LinkError::Closed))).await;
            return;
        }

        tokio::spawn(async move {
            let result = match tokio::time::timeout(ack_timeout, reply_rx).await {
                Ok(Ok(result)) => result,
                // Link dropped the request without answering.
                Ok(Err(_)) => Err(LinkError::Disconnected),
                Err(_) => Err(LinkError::Timeout),
            };
            let _ = ack_tx.send(wrap(result)).await;
        });
    }

    async fn notify(&self, message: Notify) {
        if self.peer_tx.send(PeerCommand::Notify(message)).await.is_err() {
            debug!("peer link closed; notification dropped");
        }
    }

    fn emit(&self, notice: Notice) {
        debug!(%notice, "notice");
        // No subscribers is fine.
        let _ = self.notice_tx.send(notice);
    }

    fn is_self(&self, player_id: &str) -> bool {
        self.self_id.as_deref() == Some(player_id)
    }

    fn is_host(&self) -> bool {
        self.self_id
            .as_deref()
            .is_some_and(|id| self.room.is_host(id))
    }

    fn ground_y(&self) -> f32 {
        self.room.ground_y_or(self.settings.level.default_ground_y)
    }

    /// Screen center in world coordinates.
    fn screen_center(&self) -> (f32, f32) {
        let viewport = self.settings.viewport;
        (
            self.engine.camera_x() + viewport.width / 2.0,
            viewport.height / 2.0,
        )
    }

    fn countdown_slot(&mut self, kind: TimerKind) -> &mut Option<u32> {
        match kind {
            TimerKind::ItemSelection => &mut self.item_seconds_left,
            TimerKind::Placement => &mut self.placement_seconds_left,
            TimerKind::Round => &mut self.round_seconds_left,
        }
    }

    fn view(&self) -> SessionView {
        SessionView {
            self_id: self.self_id.clone(),
            connected: self.connected,
            phase: self.machine.phase(),
            is_host: self.is_host(),
            room: self.room.clone(),
            projectiles: self.projectiles.clone(),
            body: *self.engine.body(),
            control: self.control,
            camera_x: self.engine.camera_x(),
            disabled_items: self.arbiter.disabled(),
            pending_claim: self.arbiter.pending(),
            provisional: self.arbiter.provisional(),
            item_seconds_left: self.item_seconds_left,
            placement_seconds_left: self.placement_seconds_left,
            round_seconds_left: self.round_seconds_left,
            round_number: self.scores.round_number(),
            winner: self.winner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Facing, Player, ProjectileKind};
    use tokio::time::timeout;

    const SELF_ID: &str = "a";

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Notify(Notify),
        Request(Request),
    }

    /// Stands in for the peer link: answers requests and records all traffic.
    struct FakeLink {
        events: mpsc::Sender<PeerEvent>,
        // Each message with the virtual time it left the session.
        sent: mpsc::UnboundedReceiver<(Instant, Sent)>,
        snapshot: watch::Sender<RoomState>,
    }

    impl FakeLink {
        fn start(rejected_claims: Vec<ObstacleType>) -> (Self, SessionHandle) {
            let (event_tx, event_rx) = mpsc::channel(32);
            let (command_tx, mut command_rx) = mpsc::channel::<PeerCommand>(256);
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (snapshot_tx, snapshot_rx) = watch::channel(RoomState::default());

            tokio::spawn(async move {
                while let Some(command) = command_rx.recv().await {
                    match command {
                        PeerCommand::Notify(message) => {
                            let _ = sent_tx.send((Instant::now(), Sent::Notify(message)));
                        }
                        PeerCommand::Request { request, reply } => {
                            let answer = match &request {
                                Request::RoomSnapshot => Ok(Reply::Room(snapshot_rx.borrow().clone())),
                                Request::ClaimItem(kind) if rejected_claims.contains(kind) => {
                                    Err(LinkError::Rejected("taken".to_string()))
                                }
                                _ => Ok(Reply::Accepted),
                            };
                            let _ = sent_tx.send((Instant::now(), Sent::Request(request)));
                            let _ = reply.send(answer);
                        }
                    }
                }
            });

            let join = JoinRequest::new("ROOM1", "Ana", "🐸").expect("valid join");
            let settings = SessionSettings::new(
                join,
                Viewport {
                    width: 400.0,
                    height: 800.0,
                },
                Duration::from_secs(3),
            );
            let handle = spawn_session(settings, event_rx, command_tx);
            let link = Self {
                events: event_tx,
                sent: sent_rx,
                snapshot: snapshot_tx,
            };
            (link, handle)
        }

        async fn broadcast(&self, broadcast: Broadcast) {
            self.events
                .send(PeerEvent::Broadcast(broadcast))
                .await
                .expect("session alive");
        }

        /// Connects, joins and applies `room` as the first snapshot.
        async fn join_with(&mut self, handle: &mut SessionHandle, room: RoomState) {
            self.snapshot.send_replace(room.clone());
            self.events
                .send(PeerEvent::Connected {
                    self_id: SELF_ID.to_string(),
                })
                .await
                .expect("session alive");
            wait_for(handle, |view| view.room.host_id == room.host_id && !view.room.players.is_empty())
                .await;
        }

        /// Drops the connection and reconnects into `room`.
        async fn reconnect_with(&mut self, handle: &mut SessionHandle, room: RoomState) {
            self.events
                .send(PeerEvent::Disconnected)
                .await
                .expect("session alive");
            wait_for(handle, |view| !view.connected).await;
            self.snapshot.send_replace(room);
            self.events
                .send(PeerEvent::Connected {
                    self_id: SELF_ID.to_string(),
                })
                .await
                .expect("session alive");
        }

        /// Drains everything sent within `window` of virtual time.
        async fn sent_within(&mut self, window: Duration) -> Vec<Sent> {
            self.stamped_within(window)
                .await
                .into_iter()
                .map(|(_, message)| message)
                .collect()
        }

        async fn stamped_within(&mut self, window: Duration) -> Vec<(Instant, Sent)> {
            let mut sent = Vec::new();
            let deadline = Instant::now() + window;
            while let Ok(Some(message)) = tokio::time::timeout_at(deadline, self.sent.recv()).await {
                sent.push(message);
            }
            sent
        }
    }

    fn player(id: &str, points: u32) -> Player {
        Player {
            id: id.to_string(),
            name: id.to_uppercase(),
            character: "🐱".to_string(),
            x: 0.0,
            y: 0.0,
            points,
        }
    }

    fn room(host: &str, phase: Phase, players: &[(&str, u32)]) -> RoomState {
        RoomState {
            players: players
                .iter()
                .map(|(id, points)| (id.to_string(), player(id, *points)))
                .collect(),
            phase,
            host_id: host.to_string(),
            ..RoomState::default()
        }
    }

    async fn wait_for<F>(handle: &mut SessionHandle, predicate: F) -> SessionView
    where
        F: Fn(&SessionView) -> bool,
    {
        let view = timeout(Duration::from_secs(300), handle.view.wait_for(|view| predicate(view)))
            .await
            .expect("view condition reached in time")
            .expect("session alive");
        view.clone()
    }

    fn position_updates(sent: &[Sent]) -> usize {
        sent.iter()
            .filter(|message| matches!(message, Sent::Notify(Notify::PlayerUpdate { .. })))
            .count()
    }

    fn deaths(sent: &[Sent]) -> usize {
        sent.iter()
            .filter(|message| **message == Sent::Notify(Notify::PlayerDied))
            .count()
    }

    // Covers the whole course, so the local player is always hit.
    fn arrow_everywhere() -> Projectile {
        Projectile {
            id: "arrow-1".to_string(),
            x: 0.0,
            y: 0.0,
            width: 5000.0,
            height: 2000.0,
            dir: Facing::Left,
            kind: ProjectileKind::Arrow,
        }
    }

    fn skips(sent: &[Sent]) -> usize {
        sent.iter()
            .filter(|message| **message == Sent::Notify(Notify::SkipItemSelection))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn when_connected_then_join_character_and_snapshot_are_sent_in_order() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());

        link.join_with(&mut handle, room("a", Phase::Waiting, &[("a", 0)]))
            .await;
        let sent = link.sent_within(Duration::from_millis(10)).await;

        assert_eq!(
            sent,
            vec![
                Sent::Request(Request::JoinRoom {
                    room_id: "ROOM1".to_string(),
                    name: "Ana".to_string(),
                    character: "🐸".to_string(),
                }),
                Sent::Notify(Notify::ChangeCharacter("🐸".to_string())),
                Sent::Request(Request::RoomSnapshot),
            ]
        );
        assert!(handle.view.borrow().is_host);
    }

    #[tokio::test(start_paused = true)]
    async fn when_item_selection_runs_out_then_exactly_one_auto_skip_is_sent() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        let mut notices = handle.subscribe_notices();
        link.join_with(&mut handle, room("a", Phase::Building, &[("a", 0), ("b", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;
        let started = Instant::now();

        link.broadcast(Broadcast::RoundStarted {
            obstacles: Vec::new(),
            scenario: None,
            players: HashMap::from([("a".to_string(), player("a", 0))]),
        })
        .await;
        wait_for(&mut handle, |view| view.phase == Phase::WaitingForOthers).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
        let sent = link.sent_within(Duration::from_secs(60)).await;
        assert_eq!(skips(&sent), 1);

        let mut auto_skips = 0;
        while let Ok(notice) = notices.try_recv() {
            if notice == Notice::AutoSkipped {
                auto_skips += 1;
            }
        }
        assert_eq!(auto_skips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn when_claim_succeeds_then_selection_timer_never_fires() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::ItemSelection, &[("a", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;

        handle
            .intents
            .send(Intent::ClaimItem(ObstacleType::Spring))
            .await
            .expect("session alive");
        let view = wait_for(&mut handle, |view| view.phase == Phase::Placing).await;

        let provisional = view.provisional.expect("provisional obstacle held");
        assert_eq!((provisional.x, provisional.y), (200.0, 400.0));
        assert!(view.disabled_items.contains(&ObstacleType::Spring));

        // Past the 15 s selection window but inside the 30 s placement window.
        let sent = link.sent_within(Duration::from_secs(20)).await;
        assert_eq!(skips(&sent), 0);
        assert_eq!(handle.view.borrow().phase, Phase::Placing);

        // The placement window then expires exactly once.
        let sent = link.sent_within(Duration::from_secs(40)).await;
        assert_eq!(skips(&sent), 1);
        assert_eq!(handle.view.borrow().phase, Phase::WaitingForOthers);
    }

    #[tokio::test(start_paused = true)]
    async fn when_claim_is_rejected_then_player_is_told_and_may_pick_again() {
        let (mut link, mut handle) = FakeLink::start(vec![ObstacleType::Saw]);
        let mut notices = handle.subscribe_notices();
        link.join_with(&mut handle, room("a", Phase::ItemSelection, &[("a", 0)]))
            .await;

        handle
            .intents
            .send(Intent::ClaimItem(ObstacleType::Saw))
            .await
            .expect("session alive");
        let view = wait_for(&mut handle, |view| {
            view.disabled_items.contains(&ObstacleType::Saw)
        })
        .await;

        assert_eq!(view.phase, Phase::ItemSelection);
        assert_eq!(view.provisional, None);
        loop {
            let notice = notices.recv().await.expect("notice");
            if notice == Notice::ClaimLost(ObstacleType::Saw) {
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn when_non_host_starts_selection_then_nothing_is_sent() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        let mut notices = handle.subscribe_notices();
        link.join_with(&mut handle, room("b", Phase::Waiting, &[("a", 0), ("b", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;

        handle
            .intents
            .send(Intent::StartScenarioSelection)
            .await
            .expect("session alive");

        loop {
            let notice = notices.recv().await.expect("notice");
            if let Notice::HostOnly { .. } = notice {
                break;
            }
        }
        assert!(link.sent_within(Duration::from_millis(50)).await.is_empty());
        assert_eq!(handle.view.borrow().phase, Phase::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn when_round_ends_then_points_add_up_and_round_advances() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("b", Phase::Playing, &[("a", 5), ("b", 0)]))
            .await;

        link.broadcast(Broadcast::RoundEnd {
            new_points: HashMap::from([("a".to_string(), 3), ("b".to_string(), 1)]),
        })
        .await;
        let view = wait_for(&mut handle, |view| view.round_number == 2).await;

        assert_eq!(view.room.players["a"].points, 8);
        assert_eq!(view.room.players["b"].points, 1);
        assert_eq!(view.phase, Phase::ItemSelection);
        assert!(!view.body.dead && !view.body.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn when_room_resets_then_phase_and_timers_are_cleared() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::ItemSelection, &[("a", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;

        link.broadcast(Broadcast::RoomReset).await;
        let view = wait_for(&mut handle, |view| view.phase == Phase::Waiting).await;

        assert_eq!(view.item_seconds_left, None);
        assert!(view.room.obstacles.is_empty());
        let sent = link.sent_within(Duration::from_secs(30)).await;
        assert_eq!(skips(&sent), 0, "stale selection timer fired after reset");
    }

    #[tokio::test(start_paused = true)]
    async fn when_playing_then_position_updates_are_throttled_and_stop_on_reset() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Playing, &[("a", 0), ("b", 0)]))
            .await;

        let stamps: Vec<Instant> = link
            .stamped_within(Duration::from_secs(1))
            .await
            .into_iter()
            .filter(|(_, message)| matches!(message, Sent::Notify(Notify::PlayerUpdate { .. })))
            .map(|(at, _)| at)
            .collect();

        assert!(
            (5..=11).contains(&stamps.len()),
            "{} updates in one second",
            stamps.len()
        );
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }

        link.broadcast(Broadcast::RoomReset).await;
        wait_for(&mut handle, |view| view.phase == Phase::Waiting).await;
        // Updates already queued before the reset.
        link.sent_within(Duration::from_millis(10)).await;

        let sent = link.sent_within(Duration::from_secs(1)).await;
        assert_eq!(position_updates(&sent), 0, "frames kept running after reset");
    }

    #[tokio::test(start_paused = true)]
    async fn when_round_ends_then_position_updates_stop() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Playing, &[("a", 0)]))
            .await;
        let sent = link.sent_within(Duration::from_millis(500)).await;
        assert!(position_updates(&sent) > 0);

        link.broadcast(Broadcast::RoundEnd {
            new_points: HashMap::new(),
        })
        .await;
        wait_for(&mut handle, |view| view.phase == Phase::ItemSelection).await;
        link.sent_within(Duration::from_millis(10)).await;

        let sent = link.sent_within(Duration::from_secs(1)).await;
        assert_eq!(position_updates(&sent), 0);
        assert_eq!(handle.view.borrow().round_seconds_left, None);
    }

    #[tokio::test(start_paused = true)]
    async fn when_player_is_hit_then_death_is_reported_once_per_life() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Playing, &[("a", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;

        link.broadcast(Broadcast::ProjectilesUpdate(vec![arrow_everywhere()]))
            .await;
        let sent = link.sent_within(Duration::from_secs(1)).await;
        assert_eq!(deaths(&sent), 1);
        assert!(handle.view.borrow().body.dead);

        // Next life: the round end respawns, the new round starts playing.
        link.broadcast(Broadcast::RoundEnd {
            new_points: HashMap::new(),
        })
        .await;
        link.broadcast(Broadcast::StartPlaying).await;
        let view = wait_for(&mut handle, |view| {
            view.round_number == 2 && view.phase == Phase::Playing
        })
        .await;
        assert!(!view.body.dead);
        link.broadcast(Broadcast::ProjectilesUpdate(vec![arrow_everywhere()]))
            .await;

        let sent = link.sent_within(Duration::from_secs(1)).await;
        assert_eq!(deaths(&sent), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn when_reconnect_snapshot_is_playing_then_waiting_player_starts_playing() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::ItemSelection, &[("a", 0), ("b", 0)]))
            .await;
        handle.intents.send(Intent::SkipItem).await.expect("session alive");
        wait_for(&mut handle, |view| view.phase == Phase::WaitingForOthers).await;
        link.sent_within(Duration::from_millis(10)).await;

        link.reconnect_with(&mut handle, room("a", Phase::Playing, &[("a", 0), ("b", 0)]))
            .await;
        let view = wait_for(&mut handle, |view| view.phase == Phase::Playing).await;

        assert!(view.round_seconds_left.is_some());
        let sent = link.sent_within(Duration::from_millis(500)).await;
        assert!(position_updates(&sent) > 0, "frames did not start");
    }

    #[tokio::test(start_paused = true)]
    async fn when_reconnect_snapshot_is_item_selection_then_missed_round_end_is_applied() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Playing, &[("a", 0), ("b", 0)]))
            .await;
        assert_eq!(handle.view.borrow().round_number, 1);

        link.reconnect_with(&mut handle, room("a", Phase::ItemSelection, &[("a", 4), ("b", 1)]))
            .await;
        let view = wait_for(&mut handle, |view| view.phase == Phase::ItemSelection).await;

        assert_eq!(view.round_number, 2);
        assert_eq!(view.round_seconds_left, None);
        assert!(view.item_seconds_left.is_some());
        assert_eq!(view.room.players["a"].points, 4);
        assert!(!view.body.dead && !view.body.finished);

        link.sent_within(Duration::from_millis(10)).await;
        let sent = link.sent_within(Duration::from_secs(1)).await;
        assert_eq!(position_updates(&sent), 0, "frames kept running after the missed round end");
    }

    #[tokio::test(start_paused = true)]
    async fn when_peer_moves_self_then_local_position_is_kept() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Waiting, &[("a", 0), ("b", 0)]))
            .await;
        let before = handle.view.borrow().body;

        let mut moved_self = player("a", 0);
        moved_self.x = 999.0;
        let mut moved_other = player("b", 0);
        moved_other.x = 321.0;
        link.broadcast(Broadcast::PlayerMoved(moved_self)).await;
        link.broadcast(Broadcast::PlayerMoved(moved_other)).await;
        let view = wait_for(&mut handle, |view| view.room.players["b"].x == 321.0).await;

        assert_eq!(view.body, before);
        assert_ne!(view.room.players["a"].x, 999.0);
    }

    #[tokio::test(start_paused = true)]
    async fn when_leaving_then_leave_is_sent_and_session_ends() {
        let (mut link, mut handle) = FakeLink::start(Vec::new());
        link.join_with(&mut handle, room("a", Phase::Waiting, &[("a", 0)]))
            .await;
        link.sent_within(Duration::from_millis(10)).await;

        handle.intents.send(Intent::Leave).await.expect("session alive");
        let exit = handle.finished().await;

        assert_eq!(exit, SessionExit::Left);
        let sent = link.sent_within(Duration::from_millis(10)).await;
        assert_eq!(sent, vec![Sent::Notify(Notify::LeaveRoom)]);
    }
}
