use async_trait::async_trait;
use fileops_api_models::{PushMessage, PushMessageKind};
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{ProgressTransport, PushConnection, TransportEvent, TransportKind};
use crate::error::{OrchestratorError, OrchestratorResult};

/// WebSocket connection to the push endpoint.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
    /// Connect to `endpoint` subscribing to `job_id`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Push`] when the handshake fails.
    pub async fn connect(mut endpoint: Url, job_id: &str, token: &str) -> OrchestratorResult<Self> {
        endpoint
            .query_pairs_mut()
            .append_pair("token", token)
            .append_pair("job_id", job_id);
        let (stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| OrchestratorError::push("open push channel", err))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn next_message(&mut self) -> Option<OrchestratorResult<PushMessage>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(err) => return Some(Err(OrchestratorError::push("read push message", err))),
            };
            let decoded = match frame {
                Message::Text(text) => serde_json::from_str(&text),
                Message::Binary(data) => serde_json::from_slice(&data),
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(decoded.map_err(|err| OrchestratorError::decode("read push message", err)));
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            tracing::debug!(error = %err, "push close failed");
        }
    }
}

/// Progress transport over a push connection.
pub struct PushTransport {
    connection: Box<dyn PushConnection>,
}

impl PushTransport {
    /// Transport over an open connection.
    #[must_use]
    pub fn new(connection: Box<dyn PushConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ProgressTransport for PushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let message = match self.connection.next_message().await {
                None => return TransportEvent::Closed,
                Some(Err(err)) => return TransportEvent::Failed(err),
                Some(Ok(message)) => message,
            };
            match (message.kind, message.job) {
                (PushMessageKind::Done, Some(job)) => return TransportEvent::Terminal(job),
                (PushMessageKind::Done, None) => {
                    return TransportEvent::Failed(OrchestratorError::protocol(
                        "read push message",
                        "terminal message without a job",
                    ));
                }
                (PushMessageKind::Init | PushMessageKind::Update, Some(job)) => {
                    if job.is_terminal() {
                        return TransportEvent::Terminal(job);
                    }
                    return TransportEvent::Snapshot(job);
                }
                (PushMessageKind::Error, _) => {
                    return TransportEvent::Failed(OrchestratorError::PushRefused {
                        message: message.message.unwrap_or_else(|| "error".to_string()),
                    });
                }
                (PushMessageKind::Init | PushMessageKind::Update | PushMessageKind::Unknown, _) => {}
            }
        }
    }

    async fn close(&mut self) {
        self.connection.close().await;
    }
}
