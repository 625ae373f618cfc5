// In-process fake room host for integration tests.
#![allow(dead_code)]

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use obstacle_party::domain::claims::ClaimLedger;
use obstacle_party::domain::{ObstacleType, Player, RoomState};
use obstacle_party::interface_adapters::net::LinkSettings;
use obstacle_party::interface_adapters::protocol::{
    AckDto, ClientMessage, IdentityDto, ItemTakenDto, RoomDto, ServerMessage,
};
use obstacle_party::use_cases::PeerEvent;
use std::{
    collections::HashMap,
    // `Mutex` is never held across an await, so the std one is enough.
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

// Default placement budget; long enough to never expire in a test.
const PLACEMENT_BUDGET: Duration = Duration::from_secs(30);
// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

type Shared = Arc<Mutex<HostState>>;

struct HostState {
    // Id of the single room this host serves, once someone created it.
    room_id: Option<String>,
    room: RoomState,
    // Authoritative claim bookkeeping, same rules the real host applies.
    ledger: ClaimLedger,
    // Outbound queues, one per connected peer.
    peers: HashMap<String, mpsc::UnboundedSender<Message>>,
    next_player: u32,
    // Every decoded client message, with the sender id.
    received: Vec<(String, ClientMessage)>,
    // When set, item claims are never acknowledged.
    mute_claims: bool,
}

/// Handle to a running fake host.
pub struct FakeHost {
    pub url: String,
    state: Shared,
}

impl FakeHost {
    pub async fn start() -> Self {
        Self::with_placement_budget(PLACEMENT_BUDGET).await
    }

    // Bind an ephemeral port and serve `/ws` on the current runtime.
    pub async fn with_placement_budget(budget: Duration) -> Self {
        let state: Shared = Arc::new(Mutex::new(HostState {
            room_id: None,
            room: RoomState::default(),
            ledger: ClaimLedger::new(budget),
            peers: HashMap::new(),
            next_player: 0,
            received: Vec::new(),
            mute_claims: false,
        }));

        // Bind to an ephemeral port to avoid collisions with local services.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral test port");
        // Capture the exact address that was assigned by the OS.
        let addr = listener.local_addr().expect("get local addr");

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state.clone());
        // Serve until the test runtime shuts down.
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake host failed");
        });

        Self {
            url: format!("ws://{addr}/ws"),
            state,
        }
    }

    // Link settings with short backoff so reconnect tests stay fast.
    pub fn link_settings(&self, room_id: &str) -> LinkSettings {
        LinkSettings {
            url: self.url.clone(),
            room_id: room_id.to_string(),
            reconnect_delay: Duration::from_millis(20),
            max_reconnect_delay: Duration::from_millis(100),
            reconnect_attempts: 3,
            channel_capacity: 64,
        }
    }

    // Send a raw text frame to every connected peer.
    pub fn push_raw(&self, text: &str) {
        let host = lock(&self.state);
        for tx in host.peers.values() {
            let _ = tx.send(Message::Text(text.to_string().into()));
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) {
        broadcast(&lock(&self.state), message);
    }

    // Close every connection from the host side.
    pub fn kick_all(&self) {
        let mut host = lock(&self.state);
        for (_, tx) in host.peers.drain() {
            let _ = tx.send(Message::Close(None));
        }
    }

    // Close one connection from the host side. Its claims go when the peer is torn down.
    pub fn kick(&self, player_id: &str) {
        if let Some(tx) = lock(&self.state).peers.get(player_id) {
            let _ = tx.send(Message::Close(None));
        }
    }

    pub fn is_connected(&self, player_id: &str) -> bool {
        lock(&self.state).peers.contains_key(player_id)
    }

    pub fn set_mute_claims(&self, mute: bool) {
        lock(&self.state).mute_claims = mute;
    }

    pub fn received(&self) -> Vec<(String, ClientMessage)> {
        lock(&self.state).received.clone()
    }

    pub fn room(&self) -> RoomState {
        lock(&self.state).room.clone()
    }
}

// Unique room id per test, so failures never bleed between tests.
pub fn fresh_room() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

// Wait for the next peer event or fail the test.
pub async fn next_event(events: &mut mpsc::Receiver<PeerEvent>) -> PeerEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("peer event in time")
        .expect("link still running")
}

// Poll until the host has seen a message matching `predicate`.
pub async fn wait_received<F>(host: &FakeHost, predicate: F) -> (String, ClientMessage)
where
    F: Fn(&ClientMessage) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(found) = host
            .received()
            .into_iter()
            .find(|(_, message)| predicate(message))
        {
            return found;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "host never received the expected message"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// Poll until the host has torn down `player_id`.
pub async fn wait_gone(host: &FakeHost, player_id: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while host.is_connected(player_id) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "host never dropped {player_id}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn lock(state: &Shared) -> MutexGuard<'_, HostState> {
    // A panicking test thread poisons the lock; the data is still usable.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Shared>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_peer(socket, state))
}

async fn serve_peer(socket: WebSocket, state: Shared) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Assign the next player id and register the outbound queue.
    let player_id = {
        let mut host = lock(&state);
        host.next_player += 1;
        let player_id = format!("p{}", host.next_player);
        host.peers.insert(player_id.clone(), tx.clone());
        player_id
    };

    // Writer task: drains the queue, stops after a close frame.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    send(
        &tx,
        &ServerMessage::Identity(IdentityDto {
            player_id: player_id.clone(),
        }),
    );

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                // Garbled input is ignored, same as the real host.
                if let Ok(message) = serde_json::from_str::<ClientMessage>(&text) {
                    handle_message(&state, &player_id, &tx, message);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    {
        let mut host = lock(&state);
        // A departed player's unplaced hold is free for everyone else.
        host.ledger.release_owner(&player_id);
        host.room.players.remove(&player_id);
        host.peers.remove(&player_id);
    }
    writer.abort();
}

fn handle_message(
    state: &Shared,
    player_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    message: ClientMessage,
) {
    let mut host = lock(state);
    host.received.push((player_id.to_string(), message.clone()));

    match message {
        ClientMessage::JoinRoom(join) => {
            if host.room_id.as_deref() != Some(join.room_id.as_str()) {
                ack(tx, join.request_id, Err("no_room"), None);
                return;
            }
            host.room.players.insert(
                player_id.to_string(),
                new_player(player_id, &join.name, &join.character),
            );
            ack(tx, join.request_id, Ok(()), None);
            let room = RoomDto::from(&host.room);
            broadcast(&host, &ServerMessage::RoomUpdate(room));
        }
        ClientMessage::CreateRoom(create) => {
            host.room_id = Some(create.room_id);
            host.room = RoomState {
                host_id: player_id.to_string(),
                ..RoomState::default()
            };
            host.room.players.insert(
                player_id.to_string(),
                new_player(player_id, &create.name, &create.character),
            );
            ack(tx, create.request_id, Ok(()), None);
            let room = RoomDto::from(&host.room);
            broadcast(&host, &ServerMessage::RoomUpdate(room));
        }
        ClientMessage::RequestRoomUpdate(request) => {
            let room = RoomDto::from(&host.room);
            ack(tx, request.request_id, Ok(()), Some(room));
        }
        ClientMessage::SelectItem(select) => {
            if host.mute_claims {
                return;
            }
            let Ok(kind) = select.item_type.parse::<ObstacleType>() else {
                ack(tx, select.request_id, Err("unknown_item"), None);
                return;
            };
            let now = Instant::now();
            // Holds nobody placed or skipped in time are free again.
            host.ledger.expire(now);
            match host.ledger.try_claim(player_id, kind, now) {
                Ok(()) => {
                    ack(tx, select.request_id, Ok(()), None);
                    broadcast(
                        &host,
                        &ServerMessage::ItemTaken(ItemTakenDto {
                            item_type: kind.as_str().to_string(),
                        }),
                    );
                }
                Err(_) => ack(tx, select.request_id, Err("taken"), None),
            }
        }
        ClientMessage::ChangeCharacter(change) => {
            if let Some(player) = host.room.players.get_mut(player_id) {
                player.character = change.character;
            }
        }
        _ => {}
    }
}

fn new_player(player_id: &str, name: &str, character: &str) -> Player {
    Player {
        id: player_id.to_string(),
        name: name.to_string(),
        character: character.to_string(),
        x: 0.0,
        y: 0.0,
        points: 0,
    }
}

fn ack(
    tx: &mpsc::UnboundedSender<Message>,
    request_id: u64,
    result: Result<(), &str>,
    room: Option<RoomDto>,
) {
    send(
        tx,
        &ServerMessage::Ack(AckDto {
            request_id,
            ok: result.is_ok(),
            error: result.err().map(str::to_string),
            room,
        }),
    );
}

fn broadcast(host: &HostState, message: &ServerMessage) {
    for tx in host.peers.values() {
        send(tx, message);
    }
}

fn send(tx: &mpsc::UnboundedSender<Message>, message: &ServerMessage) {
    let text = serde_json::to_string(message).expect("serializable server message");
    let _ = tx.send(Message::Text(text.into()));
}
