use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;
use ua_gateway_error::{GatewayError, GatewayResult};
use ua_gateway_models::settings;
use ua_gateway_sdk::BrokerUrl;
use uuid::Uuid;

/// rumqttc rejects keep-alive intervals under this.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
/// Brokers may reject longer client ids (MQTT 3.1).
const MAX_CLIENT_ID_LEN: usize = 23;
/// Requests buffered between the client handle and its event loop.
const REQUEST_CAPACITY: usize = 100;

/// Everything needed to (re)build a client for one broker.
#[derive(Debug, Clone)]
pub struct MqttConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub qos: QoS,
}

impl MqttConnectOptions {
    pub fn new(broker: &BrokerUrl, mqtt: &settings::Mqtt) -> GatewayResult<Self> {
        let (host, port) = broker.mqtt_host_port()?;
        let short = Uuid::new_v4().simple().to_string();
        Ok(Self {
            host,
            port,
            client_id: normalize_client_id(format!("{}-{}", mqtt.client_id_prefix, &short[..8])),
            keep_alive: Duration::from_secs(mqtt.keep_alive_secs).max(MIN_KEEP_ALIVE),
            qos: qos_from_level(mqtt.qos)?,
        })
    }

    pub(crate) fn connect(&self) -> (AsyncClient, EventLoop) {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        AsyncClient::new(options, REQUEST_CAPACITY)
    }
}

pub(crate) fn qos_from_level(level: u8) -> GatewayResult<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(GatewayError::InvalidArgument(format!(
            "mqtt qos must be 0, 1 or 2, got {other}"
        ))),
    }
}

/// Keep `[A-Za-z0-9_-]`, replace the rest with `-`, and truncate.
fn normalize_client_id<S: AsRef<str>>(input: S) -> String {
    input
        .as_ref()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_CLIENT_ID_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_is_sanitized() {
        assert_eq!(normalize_client_id("ua gw/1"), "ua-gw-1");
        assert_eq!(normalize_client_id("x".repeat(40)).len(), MAX_CLIENT_ID_LEN);
    }

    #[test]
    fn test_options_from_settings() -> anyhow::Result<()> {
        let broker: BrokerUrl = "mqtt:broker.local:8883".parse()?;
        let mqtt = settings::Mqtt {
            keep_alive_secs: 1,
            qos: 2,
            ..Default::default()
        };
        let opts = MqttConnectOptions::new(&broker, &mqtt)?;
        assert_eq!(opts.host, "broker.local");
        assert_eq!(opts.port, 8883);
        assert_eq!(opts.qos, QoS::ExactlyOnce);
        assert_eq!(opts.keep_alive, MIN_KEEP_ALIVE);
        assert!(opts.client_id.starts_with("ua-gateway-"));
        assert!(opts.client_id.len() <= MAX_CLIENT_ID_LEN);
        Ok(())
    }

    #[test]
    fn test_invalid_qos() {
        assert!(matches!(qos_from_level(3), Err(GatewayError::InvalidArgument(_))));
    }
}
