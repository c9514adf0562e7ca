use crate::{
    options::MqttConnectOptions,
    supervisor::{MqttSupervisor, SharedClient},
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::settings;
use ua_gateway_sdk::{BrokerUrl, Publisher, RetryPolicy};

struct Outbound {
    topic: String,
    payload: Bytes,
}

/// Publisher for one MQTT broker.
///
/// Messages go into a bounded queue drained by a sender task that waits for
/// the supervised connection; a full queue drops the message.
pub struct MqttPublisher {
    broker: BrokerUrl,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Start the connection supervisor and sender task. Requires a tokio runtime.
    pub fn spawn(broker: BrokerUrl, publisher: &settings::Publisher) -> GatewayResult<Self> {
        let options = MqttConnectOptions::new(&broker, &publisher.mqtt)?;
        Ok(Self::with_options(
            broker,
            options,
            publisher.mqtt.retry,
            publisher.queue_capacity,
        ))
    }

    pub fn with_options(
        broker: BrokerUrl,
        options: MqttConnectOptions,
        retry_policy: RetryPolicy,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let shared: SharedClient = Arc::new(crate::supervisor::ClientEntry::new());
        let qos = options.qos;

        info!(
            broker = %broker,
            client_id = %options.client_id,
            qos = ?qos,
            "Starting MQTT publisher"
        );
        let supervisor =
            MqttSupervisor::new(options, retry_policy, cancel.clone(), Arc::clone(&shared)).run();
        let sender = tokio::spawn(drain(rx, shared, qos, cancel.clone(), broker.to_string()));

        Self {
            broker,
            tx,
            cancel,
            tasks: Mutex::new(vec![supervisor, sender]),
        }
    }
}

/// Forward queued messages to whichever client is currently connected.
async fn drain(
    mut rx: mpsc::Receiver<Outbound>,
    shared: SharedClient,
    qos: QoS,
    cancel: CancellationToken,
    broker: String,
) {
    let mut connected = shared.subscribe();
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let client = loop {
            if let Some(client) = shared.client.load_full() {
                break client;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        };

        let topic = msg.topic;
        if let Err(e) = client
            .publish_bytes(topic.clone(), qos, false, msg.payload)
            .await
        {
            warn!(broker = %broker, topic = %topic, error = %e, "MQTT publish failed, message dropped");
        }
    }
    debug!(broker = %broker, "MQTT sender stopped");
}

impl fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("broker", &self.broker)
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn broker(&self) -> &BrokerUrl {
        &self.broker
    }

    fn try_publish(&self, topic: &str, payload: Bytes) -> GatewayResult<()> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Publish(format!("{} is closed", self.broker)));
        }
        self.tx
            .try_send(Outbound {
                topic: topic.to_string(),
                payload,
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
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(broker = %self.broker, error = %e, "MQTT task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_publisher(queue_capacity: usize) -> anyhow::Result<MqttPublisher> {
        let broker: BrokerUrl = "mqtt:127.0.0.1:1".parse()?;
        let options = MqttConnectOptions::new(&broker, &settings::Mqtt::default())?;
        let retry = RetryPolicy {
            initial_interval_ms: 50,
            ..Default::default()
        };
        Ok(MqttPublisher::with_options(broker, options, retry, queue_capacity))
    }

    #[tokio::test]
    async fn test_full_queue_drops() -> anyhow::Result<()> {
        let publisher = unreachable_publisher(1)?;

        // one message may sit in the sender waiting for a connection, one in
        // the queue; the third has nowhere to go
        let outcomes: Vec<bool> = (0..3)
            .map(|i| {
                publisher
                    .try_publish("t", Bytes::from(format!("{i}")))
                    .is_ok()
            })
            .collect();
        assert!(outcomes[0]);
        assert!(!outcomes[2]);

        publisher.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_publisher_rejects() -> anyhow::Result<()> {
        let publisher = unreachable_publisher(8)?;
        tokio::time::timeout(Duration::from_secs(5), publisher.close()).await?;

        let err = publisher
            .try_publish("t", Bytes::from_static(b"{}"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Publish(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() -> anyhow::Result<()> {
        let broker: BrokerUrl = "mqtt:127.0.0.1:1".parse()?;
        let options = MqttConnectOptions::new(&broker, &settings::Mqtt::default())?;
        let retry = RetryPolicy {
            initial_interval_ms: 10,
            ..RetryPolicy::with_max_attempts(2)
        };
        let publisher = MqttPublisher::with_options(broker, options, retry, 8);

        tokio::time::timeout(Duration::from_secs(5), publisher.cancel.cancelled()).await?;
        assert!(publisher.try_publish("t", Bytes::new()).is_err());
        publisher.close().await;
        Ok(())
    }
}
