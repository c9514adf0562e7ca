use crate::protocol::{self, MessageType};
use backoff::backoff::Backoff;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_sdk::{build_exponential_backoff, RetryPolicy};
use url::Url;

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Keep-alive ping cadence; hubs drop clients silent for 30s by default.
const PING_INTERVAL: Duration = Duration::from_secs(15);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Outbound {
    pub topic: String,
    pub message: String,
}

/// Owns the websocket to one hub: connects, handshakes, forwards queued
/// invocations and reconnects with backoff.
pub(crate) struct HubSupervisor {
    url: Url,
    method: String,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    rx: mpsc::Receiver<Outbound>,
}

impl HubSupervisor {
    pub fn new(
        url: Url,
        method: String,
        retry_policy: RetryPolicy,
        cancel: CancellationToken,
        rx: mpsc::Receiver<Outbound>,
    ) -> Self {
        Self {
            url,
            method,
            retry_policy,
            cancel,
            rx,
        }
    }

    pub fn run(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut bo = build_exponential_backoff(&self.retry_policy);
            let mut attempt: u32 = 0;

            loop {
                if self.cancel.is_cancelled() {
                    break;
                }
                if self.retry_policy.exhausted(attempt) {
                    warn!(
                        url = %self.url,
                        max_attempts = ?self.retry_policy.max_attempts,
                        "Hub supervisor exhausted retry attempts"
                    );
                    self.cancel.cancel();
                    break;
                }
                attempt += 1;

                match self.connect().await {
                    Ok(ws) => {
                        info!(url = %self.url, "Hub connected");
                        bo.reset();
                        attempt = 0;
                        if let Err(e) = self.serve(ws).await {
                            warn!(url = %self.url, error = %e, "Hub connection lost");
                        }
                    }
                    Err(e) => warn!(url = %self.url, attempt, error = %e, "Hub connect failed"),
                }
                if self.cancel.is_cancelled() {
                    break;
                }

                match bo.next_backoff() {
                    Some(delay) => {
                        debug!(url = %self.url, delay_ms = delay.as_millis() as u64, "Hub reconnect backoff");
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        warn!(url = %self.url, "Hub reconnect backoff exhausted");
                        self.cancel.cancel();
                        break;
                    }
                }
            }
            info!(url = %self.url, "Hub supervisor terminated");
        })
    }

    async fn connect(&self) -> GatewayResult<HubStream> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| GatewayError::Publish(format!("websocket connect: {e}")))?;
        ws.send(Message::Text(protocol::handshake()?.into()))
            .await
            .map_err(|e| GatewayError::Publish(format!("handshake send: {e}")))?;

        let response = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => return Ok(text.as_str().to_string()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(GatewayError::Publish(format!("handshake read: {e}"))),
                }
            }
            Err(GatewayError::Publish("hub closed during handshake".into()))
        })
        .await
        .map_err(|_| GatewayError::Timeout(HANDSHAKE_TIMEOUT))??;

        match protocol::parse_records(&response).first() {
            Some(record) if record.error.is_some() => Err(GatewayError::Publish(format!(
                "hub refused handshake: {}",
                record.error.as_deref().unwrap_or_default()
            ))),
            Some(_) => Ok(ws),
            None => Err(GatewayError::Publish(format!(
                "unexpected handshake response {response:?}"
            ))),
        }
    }

    /// Pump messages until the connection fails or the supervisor stops.
    async fn serve(&mut self, mut ws: HubStream) -> GatewayResult<()> {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                msg = self.rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = ws.close(None).await;
                        return Ok(());
                    };
                    let text = protocol::invocation(&self.method, &msg.topic, &msg.message)?;
                    if let Err(e) = ws.send(Message::Text(text.into())).await {
                        warn!(url = %self.url, topic = %msg.topic, "Hub invocation dropped");
                        return Err(GatewayError::Publish(e.to_string()));
                    }
                }
                _ = ping.tick() => {
                    ws.send(Message::Text(protocol::ping()?.into()))
                        .await
                        .map_err(|e| GatewayError::Publish(e.to_string()))?;
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        for record in protocol::parse_records(text.as_str()) {
                            if record.kind == Some(MessageType::Close) {
                                return Err(GatewayError::Publish(format!(
                                    "hub closed the connection: {}",
                                    record.error.unwrap_or_default()
                                )));
                            }
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        return Err(GatewayError::Publish(format!("websocket closed: {reason:?}")));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(GatewayError::Publish(e.to_string())),
                    None => return Err(GatewayError::Publish("websocket stream ended".into())),
                },
            }
        }
    }
}
