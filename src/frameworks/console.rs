// Headless stand-in for the presentation layer: line commands in, notices out.

use crate::domain::ObstacleType;
use crate::use_cases::{Intent, SessionExit, SessionHandle, SessionView};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Stick offset used for `left`/`right`; the full stick radius.
const STICK_PUSH: f32 = 40.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Intent(Intent),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownCommand(String),
    MissingArgument(&'static str),
    BadArgument(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty command"),
            ParseError::UnknownCommand(word) => write!(f, "unknown command {word}"),
            ParseError::MissingArgument(what) => write!(f, "missing {what}"),
            ParseError::BadArgument(arg) => write!(f, "bad argument {arg}"),
        }
    }
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ParseError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(ParseError::Empty);
    };

    let intent = match verb {
        "start" => Intent::StartScenarioSelection,
        "scenario" => Intent::SelectScenario(
            words
                .next()
                .ok_or(ParseError::MissingArgument("scenario id"))?
                .to_string(),
        ),
        "round" => Intent::StartRound,
        "reset" => Intent::ResetRoom,
        "claim" => {
            let kind = words.next().ok_or(ParseError::MissingArgument("item type"))?;
            Intent::ClaimItem(
                kind.parse::<ObstacleType>()
                    .map_err(|e| ParseError::BadArgument(e.0))?,
            )
        }
        "drag" => {
            let x = coordinate(words.next())?;
            let y = coordinate(words.next())?;
            Intent::DragProvisional { x, y }
        }
        "place" => Intent::CommitPlacement,
        "skip" => Intent::SkipItem,
        "left" => Intent::Stick {
            dx: -STICK_PUSH,
            dy: 0.0,
        },
        "right" => Intent::Stick {
            dx: STICK_PUSH,
            dy: 0.0,
        },
        "stop" => Intent::Stick { dx: 0.0, dy: 0.0 },
        "jump" => Intent::Jump,
        "character" => Intent::ChangeCharacter(
            words
                .next()
                .ok_or(ParseError::MissingArgument("character"))?
                .to_string(),
        ),
        "status" => return Ok(ConsoleCommand::Status),
        "quit" => return Ok(ConsoleCommand::Quit),
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };
    Ok(ConsoleCommand::Intent(intent))
}

fn coordinate(word: Option<&str>) -> Result<f32, ParseError> {
    let word = word.ok_or(ParseError::MissingArgument("coordinate"))?;
    word.parse()
        .map_err(|_| ParseError::BadArgument(word.to_string()))
}

fn log_status(view: &SessionView) {
    let mut standings: Vec<_> = view
        .room
        .players
        .values()
        .map(|player| format!("{}={}", player.name, player.points))
        .collect();
    standings.sort();
    info!(
        phase = %view.phase,
        host = view.is_host,
        round = view.round_number,
        x = view.body.x,
        y = view.body.y,
        disabled = ?view.disabled_items,
        pending = ?view.pending_claim,
        provisional = ?view.provisional,
        item_secs = ?view.item_seconds_left,
        placement_secs = ?view.placement_seconds_left,
        round_secs = ?view.round_seconds_left,
        standings = %standings.join(" "),
        "status"
    );
}

/// Feeds parsed lines into the session until it ends or input runs out.
pub async fn drive<R>(handle: SessionHandle, input: R) -> SessionExit
where
    R: AsyncBufRead + Unpin,
{
    let mut notices = handle.subscribe_notices();
    let notice_task = tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => info!(%notice, "notice"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notices dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = input.lines();
    loop {
        tokio::select! {
            _ = handle.intents.closed() => break,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("input closed; leaving room");
                        let _ = handle.intents.send(Intent::Leave).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read input; leaving room");
                        let _ = handle.intents.send(Intent::Leave).await;
                        break;
                    }
                };
                match parse_command(&line) {
                    Ok(ConsoleCommand::Intent(intent)) => {
                        if handle.intents.send(intent).await.is_err() {
                            break;
                        }
                    }
                    Ok(ConsoleCommand::Status) => log_status(&handle.view.borrow()),
                    Ok(ConsoleCommand::Quit) => {
                        let _ = handle.intents.send(Intent::Leave).await;
                        break;
                    }
                    Err(ParseError::Empty) => {}
                    Err(e) => warn!(error = %e, "ignoring command"),
                }
            }
        }
    }

    let exit = handle.finished().await;
    notice_task.abort();
    exit
}
