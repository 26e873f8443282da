//! Streaming connection to the speech-recognition provider (component C2):
//! fetches an ephemeral token, opens the provider's WebSocket, and surfaces
//! interim transcripts, completed turns, and transport errors on a channel.
//! Tokens are refreshed in the background before they expire, swapping the
//! upstream connection without the caller noticing.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use vg_domain::config::SttConfig;
use vg_domain::{Error, Result};

/// Interim transcript, a completed turn, a transport error, or the stream
/// ending. Completed turns and interim transcripts are distinguished so the
/// session orchestrator can treat `Turn` as "start a reply" and `Transcript`
/// as "just update the live caption".
#[derive(Debug, Clone)]
pub enum SttEvent {
    Transcript { text: String, is_final: bool },
    Turn { text: String },
    Error(String),
    Closed,
}

enum Command {
    Audio(Vec<i16>),
    Clear,
    Close,
}

/// A handle to a running STT connection. Dropping it does not close the
/// upstream socket; call `close()` explicitly.
pub struct SttStream {
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Begin {
        #[allow(dead_code)]
        id: String,
    },
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Turn {
        text: String,
        turn_is_formatted: bool,
    },
    Termination {},
    Error {
        error: String,
    },
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

impl SttStream {
    /// Fetch a token, open the upstream WebSocket (bounded by
    /// `config.connect_timeout_secs`), and spawn the background driver that
    /// owns the connection for the lifetime of the returned handle.
    pub async fn connect(
        config: SttConfig,
        api_key: String,
        events: mpsc::UnboundedSender<SttEvent>,
    ) -> Result<Self> {
        let client = reqwest::Client::new();
        let ws = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            connect_once(&client, &config, &api_key),
        )
        .await
        .map_err(|_| Error::Stt("connect timed out".into()))??;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(ws, client, config, api_key, commands_rx, events));

        Ok(Self { commands: commands_tx })
    }

    /// Best-effort send; silently dropped if the driver has already exited.
    pub fn send(&self, audio: &[i16]) {
        let _ = self.commands.send(Command::Audio(audio.to_vec()));
    }

    /// Ask the provider to finalize the in-progress utterance.
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn connect_once(
    client: &reqwest::Client,
    config: &SttConfig,
    api_key: &str,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>> {
    let token = fetch_token(client, config, api_key).await?;
    let ws_url = build_ws_url(config, &token);
    let (stream, _response) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| Error::Stt(format!("websocket connect failed: {e}")))?;
    Ok(stream)
}

async fn fetch_token(client: &reqwest::Client, config: &SttConfig, api_key: &str) -> Result<String> {
    let url = format!(
        "{}/v3/token?expires_in_seconds={}",
        config.base_url, config.token_ttl_secs
    );
    let response = client
        .get(&url)
        .header("Authorization", api_key)
        .send()
        .await
        .map_err(|e| Error::Stt(format!("token request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Stt(format!("token request returned {}", response.status())));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Stt(format!("malformed token response: {e}")))?;
    Ok(body.token)
}

fn build_ws_url(config: &SttConfig, token: &str) -> String {
    let ws_base = config
        .base_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!(
        "{}/v3/ws?sample_rate={}&speech_model={}&token={}&format_turns=true&min_end_of_turn_silence_when_confident={}&max_turn_silence={}",
        ws_base,
        config.sample_rate,
        config.speech_model,
        token,
        config.min_end_of_turn_silence_when_confident,
        config.max_turn_silence,
    )
}

async fn drive(
    mut ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    client: reqwest::Client,
    config: SttConfig,
    api_key: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SttEvent>,
) {
    let refresh_after = Duration::from_secs(
        (config.token_ttl_secs as f32 * config.refresh_at_fraction) as u64,
    );
    let mut refresh_deadline = Box::pin(tokio::time::sleep(refresh_after));

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Audio(samples)) => {
                        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                        if ws.send(WsMessage::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Clear) => {
                        let payload = serde_json::json!({"type": "ForceEndpoint"}).to_string();
                        let _ = ws.send(WsMessage::Text(payload)).await;
                    }
                    Some(Command::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            _ = &mut refresh_deadline => {
                match connect_once(&client, &config, &api_key).await {
                    Ok(fresh) => {
                        let _ = ws.close(None).await;
                        ws = fresh;
                        refresh_deadline = Box::pin(tokio::time::sleep(refresh_after));
                    }
                    Err(e) => {
                        let _ = events.send(SttEvent::Error(format!("token refresh failed: {e}")));
                        refresh_deadline = Box::pin(tokio::time::sleep(Duration::from_secs(5)));
                    }
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => handle_text(&text, &events),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        let _ = events.send(SttEvent::Closed);
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(SttEvent::Error(e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

fn handle_text(text: &str, events: &mpsc::UnboundedSender<SttEvent>) {
    let parsed: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("unparseable STT message: {e}");
            return;
        }
    };

    match parsed {
        ServerMessage::Begin { .. } => {}
        ServerMessage::Transcript { text, is_final } => {
            let _ = events.send(SttEvent::Transcript { text, is_final });
        }
        ServerMessage::Turn { text, turn_is_formatted } => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return;
            }
            if turn_is_formatted {
                let _ = events.send(SttEvent::Turn { text: trimmed.to_string() });
            } else {
                let _ = events.send(SttEvent::Transcript {
                    text: trimmed.to_string(),
                    is_final: false,
                });
            }
        }
        ServerMessage::Termination {} => {
            let _ = events.send(SttEvent::Closed);
        }
        ServerMessage::Error { error } => {
            let _ = events.send(SttEvent::Error(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_base_becomes_wss() {
        let config = SttConfig {
            base_url: "https://streaming.assemblyai.com".into(),
            ..Default::default()
        };
        let url = build_ws_url(&config, "tok");
        assert!(url.starts_with("wss://streaming.assemblyai.com/v3/ws"));
        assert!(url.contains("token=tok"));
    }

    #[test]
    fn unformatted_turn_with_text_becomes_interim_transcript() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg = serde_json::json!({
            "type": "Turn",
            "text": "hello there",
            "turn_is_formatted": false
        })
        .to_string();
        handle_text(&msg, &tx);
        match rx.try_recv().unwrap() {
            SttEvent::Transcript { text, is_final } => {
                assert_eq!(text, "hello there");
                assert!(!is_final);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn formatted_turn_emits_completed_turn() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg = serde_json::json!({
            "type": "Turn",
            "text": "what's the weather in NYC?",
            "turn_is_formatted": true
        })
        .to_string();
        handle_text(&msg, &tx);
        match rx.try_recv().unwrap() {
            SttEvent::Turn { text } => assert_eq!(text, "what's the weather in NYC?"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn empty_turn_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg = serde_json::json!({"type": "Turn", "text": "   ", "turn_is_formatted": true}).to_string();
        handle_text(&msg, &tx);
        assert!(rx.try_recv().is_err());
    }
}
