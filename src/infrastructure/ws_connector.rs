// WebSocket transport for telemetry channels
use crate::application::socket::{SocketConnector, SocketSession};
use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Opens real WebSocket connections and bridges them onto a `SocketSession`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<SocketSession> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("WebSocket connect to {} failed", url))?;

        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();

        // Writer ends when the session drops its sender
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        let target = url.to_string();
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = incoming_tx.closed() => break,
                    item = read.next() => item,
                };

                let frame = match item {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => {
                        String::from_utf8_lossy(&bytes).into_owned()
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(url = %target, error = %e, "WebSocket read failed");
                        break;
                    }
                };

                if incoming_tx.send(frame).is_err() {
                    break;
                }
            }
            tracing::debug!(url = %target, "WebSocket reader finished");
        });

        Ok(SocketSession { outgoing, incoming })
    }
}
