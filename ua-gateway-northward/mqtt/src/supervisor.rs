use crate::options::MqttConnectOptions;
use arc_swap::ArcSwapOption;
use backoff::backoff::Backoff;
use rumqttc::{AsyncClient, Event, EventLoop, Packet};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ua_gateway_sdk::{build_exponential_backoff, RetryPolicy};

/// Client of the live connection, swapped by the supervisor on every
/// (re)connect and read lock-free by the sender.
pub(crate) struct ClientEntry {
    pub client: ArcSwapOption<AsyncClient>,
    connected: watch::Sender<bool>,
}

impl ClientEntry {
    pub fn new() -> Self {
        Self {
            client: ArcSwapOption::from(None),
            connected: watch::Sender::new(false),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn set_client(&self, client: Option<Arc<AsyncClient>>) {
        let up = client.is_some();
        self.client.store(client);
        self.connected.send_replace(up);
    }
}

pub(crate) type SharedClient = Arc<ClientEntry>;

/// Drives one broker connection, reconnecting with exponential backoff
/// until cancelled or the retry policy is exhausted.
pub(crate) struct MqttSupervisor {
    options: MqttConnectOptions,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    shared: SharedClient,
}

impl MqttSupervisor {
    pub fn new(
        options: MqttConnectOptions,
        retry_policy: RetryPolicy,
        cancel: CancellationToken,
        shared: SharedClient,
    ) -> Self {
        Self {
            options,
            retry_policy,
            cancel,
            shared,
        }
    }

    pub fn run(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let broker = format!("{}:{}", self.options.host, self.options.port);
            let mut bo = build_exponential_backoff(&self.retry_policy);
            let mut attempt: u32 = 0;

            loop {
                if self.cancel.is_cancelled() {
                    info!(broker = %broker, "MQTT supervisor cancelled");
                    break;
                }
                if self.retry_policy.exhausted(attempt) {
                    warn!(
                        broker = %broker,
                        max_attempts = ?self.retry_policy.max_attempts,
                        "MQTT supervisor exhausted retry attempts"
                    );
                    // stops the sender too; publishing now fails fast
                    self.cancel.cancel();
                    break;
                }

                attempt += 1;
                debug!(broker = %broker, attempt, "MQTT connecting");
                let (client, event_loop) = self.options.connect();
                let seen_active = self.run_event_loop(&broker, client, event_loop).await;
                if seen_active {
                    bo.reset();
                    attempt = 0;
                }
                if self.cancel.is_cancelled() {
                    break;
                }

                match bo.next_backoff() {
                    Some(delay) => {
                        info!(
                            broker = %broker,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "MQTT reconnect backoff"
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        warn!(broker = %broker, "MQTT reconnect backoff exhausted");
                        self.cancel.cancel();
                        break;
                    }
                }
            }

            self.shared.set_client(None);
            info!(broker = %broker, "MQTT supervisor terminated");
        })
    }

    /// Poll until the connection drops or the supervisor is cancelled.
    /// Returns whether a ConnAck was seen.
    async fn run_event_loop(&self, broker: &str, client: AsyncClient, mut event_loop: EventLoop) -> bool {
        let mut seen_active = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shared.set_client(None);
                    let _ = client.try_disconnect();
                    break;
                }
                result = event_loop.poll() => match result {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(broker, code = ?ack.code, "MQTT connected");
                        seen_active = true;
                        self.shared.set_client(Some(Arc::new(client.clone())));
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!(broker, "MQTT broker sent disconnect");
                        self.shared.set_client(None);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(broker, error = %e, "MQTT event loop error");
                        self.shared.set_client(None);
                        break;
                    }
                }
            }
        }
        seen_active
    }
}
