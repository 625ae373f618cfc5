// Framework bootstrap for the party client runtime.

use crate::frameworks::{config, console};
use crate::interface_adapters::net::{LinkSettings, PeerLink, spawn_peer_link};
use crate::use_cases::{SessionExit, SessionSettings, spawn_session};

use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};

/// How long the link gets to send its close frame after the session ends.
const LINK_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Runs one room session over a fresh peer link, driven by line commands from `input`.
pub async fn run<R>(link: LinkSettings, session: SessionSettings, input: R) -> SessionExit
where
    R: AsyncBufRead + Unpin,
{
    let PeerLink {
        events,
        commands,
        task: link_task,
    } = spawn_peer_link(link);
    let handle = spawn_session(session, events, commands);

    let exit = console::drive(handle, input).await;
    tracing::info!(?exit, "session ended");

    // The session dropped its command sender, so the link is already winding down.
    if tokio::time::timeout(LINK_SHUTDOWN_GRACE, link_task)
        .await
        .is_err()
    {
        tracing::warn!("peer link did not stop in time");
    }
    exit
}

pub async fn run_with_config() -> Result<SessionExit, config::ConfigError> {
    init_runtime();

    let join = config::join_request().inspect_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
    })?;

    let link = LinkSettings {
        url: config::server_url(),
        room_id: join.room_id.clone(),
        reconnect_delay: config::reconnect_delay(),
        max_reconnect_delay: config::MAX_RECONNECT_DELAY,
        reconnect_attempts: config::reconnect_attempts(),
        channel_capacity: config::PEER_CHANNEL_CAPACITY,
    };
    tracing::info!(url = %link.url, room_id = %join.room_id, name = %join.name, "starting");

    let session = SessionSettings::new(join, config::viewport(), config::ack_timeout());
    let input = BufReader::new(tokio::io::stdin());

    Ok(run(link, session, input).await)
}
