use crate::{
    connection::{HubSupervisor, Outbound},
    protocol,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{fmt, sync::Mutex};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::settings;
use ua_gateway_sdk::{BrokerUrl, Publisher};

/// Publisher for one SignalR hub. Each message becomes an invocation of the
/// configured hub method with `[topic, message]`.
pub struct HubPublisher {
    broker: BrokerUrl,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HubPublisher {
    /// Start the connection supervisor. Requires a tokio runtime.
    pub fn spawn(broker: BrokerUrl, publisher: &settings::Publisher) -> GatewayResult<Self> {
        let url = protocol::websocket_url(broker.hub_endpoint()?)?;
        if url.scheme() == "wss" {
            // already installed by an earlier TLS hub
            let _ = rustls::crypto::ring::default_provider().install_default();
        }
        let (tx, rx) = mpsc::channel(publisher.queue_capacity.max(1));
        let cancel = CancellationToken::new();

        info!(broker = %broker, url = %url, method = %publisher.hub.method, "Starting hub publisher");
        let task = HubSupervisor::new(
            url,
            publisher.hub.method.clone(),
            publisher.hub.retry,
            cancel.clone(),
            rx,
        )
        .run();

        Ok(Self {
            broker,
            tx,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

impl fmt::Debug for HubPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubPublisher")
            .field("broker", &self.broker)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl Publisher for HubPublisher {
    fn broker(&self) -> &BrokerUrl {
        &self.broker
    }

    fn try_publish(&self, topic: &str, payload: Bytes) -> GatewayResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Publish(format!("{} is closed", self.broker)));
        }
        let message = String::from_utf8(payload.to_vec())
            .map_err(|e| GatewayError::Publish(format!("hub messages are text: {e}")))?;
        self.tx
            .try_send(Outbound {
                topic: topic.to_string(),
                message,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    GatewayError::Publish(format!("{} outbound queue is full", self.broker))
                }
                TrySendError::Closed(_) => GatewayError::Publish(format!("{} is closed", self.broker)),
            })
    }

    async fn close(&self) {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(broker = %self.broker, error = %e, "Hub task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    /// Accept one client, answer the handshake, and return the first
    /// invocation it sends.
    async fn hub_once(listener: TcpListener) -> anyhow::Result<String> {
        let (stream, _) = listener.accept().await?;
        let mut ws = accept_async(stream).await?;
        let handshake = ws.next().await.ok_or_else(|| anyhow::anyhow!("no handshake"))??;
        assert_eq!(handshake.to_text()?, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
        ws.send(Message::Text("{}\u{1e}".into())).await?;
        loop {
            let frame = ws.next().await.ok_or_else(|| anyhow::anyhow!("closed"))??;
            let text = frame.to_text()?.to_string();
            if text.contains("\"type\":1") {
                return Ok(text);
            }
        }
    }

    #[tokio::test]
    async fn test_invocation_reaches_hub() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(hub_once(listener));

        let broker: BrokerUrl = format!("signalr:http://{addr}/hub").parse()?;
        let publisher = HubPublisher::spawn(broker, &settings::Publisher::default())?;
        publisher.try_publish("plant/a", Bytes::from_static(b"{\"v\":1}"))?;

        let invocation = tokio::time::timeout(Duration::from_secs(5), server).await???;
        assert_eq!(
            invocation,
            "{\"type\":1,\"target\":\"Publish\",\"arguments\":[\"plant/a\",\"{\\\"v\\\":1}\"]}\u{1e}"
        );
        publisher.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_tls_hub_accepted() -> anyhow::Result<()> {
        for url in [
            "signalr:https://hub.example.com/data",
            "signalr:wss://hub.example.com/data",
        ] {
            let broker: BrokerUrl = url.parse()?;
            let publisher = HubPublisher::spawn(broker, &settings::Publisher::default())?;
            publisher.try_publish("plant/a", Bytes::from_static(b"1"))?;
            publisher.close().await;
            let err = publisher
                .try_publish("plant/a", Bytes::from_static(b"1"))
                .unwrap_err();
            assert!(matches!(err, GatewayError::Publish(_)), "{err}");
        }
        Ok(())
    }
}
