//! `moresh chat`: interactive chat with one peer.

use crate::ui;
use anyhow::Context;
use moresh_client::{open_session, ChatEvent, SessionUpdate, TcpNegotiatorFactory};
use moresh_types::config::MoreshConfig;
use moresh_types::ConnectionKey;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// What a line typed by the user asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Typing,
    Message(&'a str),
    Nothing,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "/quit" => Input::Quit,
        "/typing" => Input::Typing,
        "" => Input::Nothing,
        text => Input::Message(text),
    }
}

pub async fn run(
    config: MoreshConfig,
    key: String,
    peer: Option<String>,
    relay: Option<String>,
) -> anyhow::Result<()> {
    // Keys are checked before touching the network.
    let local = ConnectionKey::parse(&key).context("Invalid --key")?;
    let peer = peer
        .as_deref()
        .map(ConnectionKey::parse)
        .transpose()
        .context("Invalid --peer")?;
    let relay_url = relay.unwrap_or_else(|| config.client.relay_url.clone());

    let factory = Arc::new(TcpNegotiatorFactory::from_config(&config.client));
    let (handle, mut updates, task) = open_session(&relay_url, local.as_str(), factory).await?;

    ui::section("Moresh chat");
    ui::kv("Your key", local.as_str());
    ui::kv("Relay", &relay_url);
    match &peer {
        Some(peer) => {
            ui::kv("Peer", peer.as_str());
            handle.connect(peer.as_str())?;
        }
        None => ui::hint(&format!(
            "Waiting for a peer. They should run: moresh chat --key <theirs> --peer {local}"
        )),
    }

    let mut lines = spawn_stdin();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => render(update),
                None => break,
            },
            line = lines.recv(), if stdin_open => match line {
                Some(line) => match parse_input(&line) {
                    Input::Quit => {
                        let _ = handle.disconnect();
                    }
                    Input::Typing => {
                        let _ = handle.send_typing();
                    }
                    Input::Message(text) => {
                        let _ = handle.send_message(text);
                    }
                    Input::Nothing => {}
                },
                None => {
                    debug!("stdin closed, disconnecting");
                    stdin_open = false;
                    let _ = handle.disconnect();
                }
            },
        }
    }

    task.await?;
    Ok(())
}

fn render(update: SessionUpdate) {
    match update {
        SessionUpdate::State(state) => ui::state(state),
        SessionUpdate::Diagnostic(text) => ui::status(&text),
        SessionUpdate::Established {
            local_key,
            remote_key,
        } => {
            ui::success(&format!("Connected: {} <-> {}", local_key.short(), remote_key));
            ui::hint("Type a message and press Enter. /typing to nudge, /quit to leave.");
        }
        SessionUpdate::Sent(text) => ui::local_line(&text),
        SessionUpdate::Chat(ChatEvent::Message(text)) => ui::remote_line("peer", &text),
        SessionUpdate::Chat(ChatEvent::Closed) => ui::status("Peer left the chat"),
        // Typing is shown through RemoteTyping; errors arrive as diagnostics.
        SessionUpdate::Chat(ChatEvent::Typing | ChatEvent::Error(_)) => {}
        SessionUpdate::RemoteTyping(true) => ui::typing("peer"),
        SessionUpdate::RemoteTyping(false) => {}
    }
}

fn spawn_stdin() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("  /typing "), Input::Typing);
        assert_eq!(parse_input("   "), Input::Nothing);
        assert_eq!(parse_input(" hello there "), Input::Message("hello there"));
        assert_eq!(parse_input("/unknown"), Input::Message("/unknown"));
    }
}
