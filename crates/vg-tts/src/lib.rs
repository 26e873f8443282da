//! The TTS client pool (component C3). The upstream protocol is one-shot
//! per utterance: connect, send a JSON config frame, send each word as a
//! text frame, send the literal frame `__END__`, then read binary PCM16
//! chunks until the server closes the socket. A single warm connection is
//! kept ready so the first word of a reply doesn't pay connect latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use vg_domain::cancel::CancelToken;
use vg_domain::config::TtsConfig;
use vg_domain::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const END_MARKER: &str = "__END__";

/// A one-connection-deep pool: at most one idle ("warm") socket is kept
/// open at a time, handed off to whichever call to `synthesize` runs next.
pub struct TtsPool {
    config: TtsConfig,
    api_key: String,
    warm: Mutex<Option<WsStream>>,
    disposed: AtomicBool,
}

impl TtsPool {
    /// Opens the first warm connection eagerly. A failure here is not fatal:
    /// the pool falls back to opening a fresh connection on first use.
    pub async fn connect(config: TtsConfig, api_key: String) -> Self {
        let warm = match open_connection(&config, &api_key).await {
            Ok(ws) => Some(ws),
            Err(e) => {
                tracing::warn!("initial TTS warm connection failed: {e}");
                None
            }
        };
        Self {
            config,
            api_key,
            warm: Mutex::new(warm),
            disposed: AtomicBool::new(false),
        }
    }

    /// Synthesize `text`, delivering PCM16 chunks to `sink` as they arrive.
    /// Resolves (does not error) on cancellation or a normal close (code
    /// 1000/1005); any other close or transport failure is an error.
    pub async fn synthesize(
        self: &Arc<Self>,
        text: &str,
        sink: mpsc::UnboundedSender<Vec<u8>>,
        cancel: CancelToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let warm = self.warm.lock().take();
        let mut ws = match warm {
            Some(ws) => ws,
            None => open_connection(&self.config, &self.api_key).await?,
        };

        if let Err(e) = send_utterance(&mut ws, &self.config, text).await {
            let _ = ws.close(None).await;
            return Err(e);
        }

        let result = receive_until_done(&mut ws, &sink, &cancel).await;
        self.rewarm();
        result
    }

    pub fn close(&self) {
        self.disposed.store(true, Ordering::Release);
        if let Some(mut ws) = self.warm.lock().take() {
            tokio::spawn(async move {
                let _ = ws.close(None).await;
            });
        }
    }

    fn rewarm(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            match open_connection(&pool.config, &pool.api_key).await {
                Ok(ws) => {
                    if !pool.disposed.load(Ordering::Acquire) {
                        *pool.warm.lock() = Some(ws);
                    }
                }
                Err(e) => tracing::warn!("TTS re-warm failed: {e}"),
            }
        });
    }
}

async fn open_connection(config: &TtsConfig, api_key: &str) -> Result<WsStream> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = config
        .base_url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Tts(format!("invalid TTS url: {e}")))?;
    let auth_value = format!("Api-Key {api_key}")
        .parse()
        .map_err(|e| Error::Tts(format!("invalid TTS api key: {e}")))?;
    request.headers_mut().insert("Authorization", auth_value);

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::Tts(format!("connect failed: {e}")))?;
    Ok(ws)
}

async fn send_utterance(ws: &mut WsStream, config: &TtsConfig, text: &str) -> Result<()> {
    let config_frame = serde_json::json!({
        "voice": config.voice,
        "max_tokens": config.max_tokens,
        "buffer_size": config.buffer_size,
        "repetition_penalty": config.repetition_penalty,
        "temperature": config.temperature,
        "top_p": config.top_p,
    })
    .to_string();
    ws.send(WsMessage::Text(config_frame))
        .await
        .map_err(|e| Error::Tts(format!("send config failed: {e}")))?;

    for word in text.split_whitespace() {
        ws.send(WsMessage::Text(word.to_string()))
            .await
            .map_err(|e| Error::Tts(format!("send word failed: {e}")))?;
    }

    ws.send(WsMessage::Text(END_MARKER.to_string()))
        .await
        .map_err(|e| Error::Tts(format!("send end marker failed: {e}")))
}

async fn receive_until_done(
    ws: &mut WsStream,
    sink: &mpsc::UnboundedSender<Vec<u8>>,
    cancel: &CancelToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(());
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let _ = sink.send(bytes);
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        return match code {
                            None | Some(1000) | Some(1005) => Ok(()),
                            Some(other) => Err(Error::Tts(format!("unexpected close code {other}"))),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(Error::Tts(format!("transport error: {e}"))),
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthesize_returns_immediately_when_already_cancelled() {
        let config = TtsConfig::default();
        let pool = Arc::new(TtsPool {
            config,
            api_key: "k".into(),
            warm: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = pool.synthesize("hello world", tx, cancel).await;
        assert!(result.is_ok());
    }
}
