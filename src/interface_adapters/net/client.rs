use crate::interface_adapters::protocol::{ClientMessage, Inbound, ServerMessage};
use crate::interface_adapters::utils::rng::rand_id;
use crate::use_cases::types::ReplySender;
use crate::use_cases::{LinkError, PeerCommand, PeerEvent};

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::{collections::HashMap, fmt, time::Duration};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{Instrument, debug, info, info_span, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const LOG_EVERY_INVALID: u32 = 10;

#[derive(Debug)]
pub enum NetError {
    Serialization(serde_json::Error),
    Ws(tungstenite::Error),
    ConnectTimeout,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Serialization(e) => write!(f, "serialization failed: {e}"),
            NetError::Ws(e) => write!(f, "websocket error: {e}"),
            NetError::ConnectTimeout => f.write_str("connect timed out"),
        }
    }
}

impl std::error::Error for NetError {}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// ws:// or wss:// address of the room host.
    pub url: String,
    pub room_id: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Consecutive failed connects before giving up. 0 retries forever.
    pub reconnect_attempts: u32,
    pub channel_capacity: usize,
}

/// Both ends the session needs, plus the task driving the socket.
pub struct PeerLink {
    pub events: mpsc::Receiver<PeerEvent>,
    pub commands: mpsc::Sender<PeerCommand>,
    pub task: JoinHandle<()>,
}

pub fn spawn_peer_link(settings: LinkSettings) -> PeerLink {
    let (event_tx, event_rx) = mpsc::channel(settings.channel_capacity);
    let (command_tx, command_rx) = mpsc::channel(settings.channel_capacity);

    let span = info_span!("peer_link", url = %settings.url, room_id = %settings.room_id);
    let task = tokio::spawn(link_task(settings, event_tx, command_rx).instrument(span));

    PeerLink {
        events: event_rx,
        commands: command_tx,
        task,
    }
}

enum ConnectionEnd {
    /// The session dropped its side; stop for good.
    SessionGone,
    Dropped { identified: bool },
}

async fn link_task(
    settings: LinkSettings,
    event_tx: mpsc::Sender<PeerEvent>,
    mut command_rx: mpsc::Receiver<PeerCommand>,
) {
    let mut delay = settings.reconnect_delay;
    let mut failures = 0u32;

    loop {
        match connect(&settings.url).await {
            Ok(stream) => {
                failures = 0;
                delay = settings.reconnect_delay;

                // Separate id so logs of successive connections can be told apart.
                let conn_id = rand_id();
                let end = drive_connection(stream, &settings.room_id, &event_tx, &mut command_rx)
                    .instrument(info_span!("conn", conn_id))
                    .await;
                match end {
                    ConnectionEnd::SessionGone => {
                        info!("session closed; link stopping");
                        return;
                    }
                    ConnectionEnd::Dropped { identified } => {
                        warn!("connection lost");
                        if identified && event_tx.send(PeerEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "connect failed");
                if settings.reconnect_attempts != 0 && failures >= settings.reconnect_attempts {
                    warn!("giving up on the room host");
                    let _ = event_tx.send(PeerEvent::Unreachable).await;
                    return;
                }
            }
        }

        if !idle_wait(delay, &mut command_rx).await {
            return;
        }
        delay = (delay * 2).min(settings.max_reconnect_delay);
    }
}

async fn connect(url: &str) -> Result<WsStream, NetError> {
    match time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(NetError::Ws(e)),
        Err(_) => Err(NetError::ConnectTimeout),
    }
}

/// Waits out the backoff. Requests fail fast meanwhile; notifies are dropped.
/// Returns false once the session is gone.
async fn idle_wait(delay: Duration, command_rx: &mut mpsc::Receiver<PeerCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = command_rx.recv() => match command {
                None => return false,
                Some(PeerCommand::Request { request, reply }) => {
                    debug!(?request, "request while disconnected");
                    let _ = reply.send(Err(LinkError::Disconnected));
                }
                Some(PeerCommand::Notify(notify)) => {
                    debug!(?notify, "dropping notify while disconnected");
                }
            },
        }
    }
}

async fn drive_connection(
    stream: WsStream,
    room_id: &str,
    event_tx: &mpsc::Sender<PeerEvent>,
    command_rx: &mut mpsc::Receiver<PeerCommand>,
) -> ConnectionEnd {
    let (mut sink, mut source) = stream.split();
    let mut pending: HashMap<u64, ReplySender> = HashMap::new();
    let mut identified = false;
    let mut invalid_json = 0u32;
    info!("connected");

    let end = loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(Message::Close(None)).await;
                    break ConnectionEnd::SessionGone;
                };
                let message = match command {
                    PeerCommand::Notify(notify) => ClientMessage::notify(notify, room_id),
                    PeerCommand::Request { request, reply } => {
                        let request_id = rand_id();
                        // Replies the session already timed out on.
                        pending.retain(|_, waiting| !waiting.is_closed());
                        pending.insert(request_id, reply);
                        ClientMessage::request(request, request_id, room_id)
                    }
                };
                if let Err(e) = send_message(&mut sink, &message).await {
                    warn!(error = %e, "send failed");
                    break ConnectionEnd::Dropped { identified };
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            invalid_json += 1;
                            if invalid_json % LOG_EVERY_INVALID == 1 {
                                warn!(error = %e, invalid_json, "ignoring malformed message");
                            }
                            continue;
                        }
                    };
                    match Inbound::from(message) {
                        Inbound::Identity(self_id) => {
                            identified = true;
                            info!(%self_id, "identified by host");
                            if event_tx.send(PeerEvent::Connected { self_id }).await.is_err() {
                                break ConnectionEnd::SessionGone;
                            }
                        }
                        Inbound::Ack { request_id, result } => match pending.remove(&request_id) {
                            Some(reply) => {
                                let _ = reply.send(result);
                            }
                            None => debug!(request_id, "ack for unknown or expired request"),
                        },
                        Inbound::Broadcast(broadcast) => {
                            if event_tx.send(PeerEvent::Broadcast(broadcast)).await.is_err() {
                                break ConnectionEnd::SessionGone;
                            }
                        }
                        Inbound::Ignored => {}
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "closed by host");
                    break ConnectionEnd::Dropped { identified };
                }
                // Pings are answered by tungstenite; nothing else is expected.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "read failed");
                    break ConnectionEnd::Dropped { identified };
                }
                None => break ConnectionEnd::Dropped { identified },
            },
        }
    };

    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(LinkError::Disconnected));
    }
    end
}

async fn send_message(sink: &mut WsSink, message: &ClientMessage) -> Result<usize, NetError> {
    let txt = serde_json::to_string(message).map_err(NetError::Serialization)?;
    let bytes = txt.len();
    sink.send(Message::Text(txt.into()))
        .await
        .map_err(NetError::Ws)?;
    Ok(bytes)
}
