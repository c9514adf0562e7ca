use std::sync::Arc;
use ua_gateway_error::GatewayResult;
use ua_gateway_hub::HubPublisherFactory;
use ua_gateway_models::settings;
use ua_gateway_mqtt::MqttPublisherFactory;
use ua_gateway_sdk::{BrokerScheme, BrokerUrl, Publisher, PublisherFactory};

/// Routes each broker URL to the publisher family its scheme names.
pub struct SchemePublisherFactory {
    mqtt: MqttPublisherFactory,
    hub: HubPublisherFactory,
}

impl SchemePublisherFactory {
    pub fn new(publisher: &settings::Publisher) -> Self {
        Self {
            mqtt: MqttPublisherFactory::new(publisher.clone()),
            hub: HubPublisherFactory::new(publisher.clone()),
        }
    }
}

impl PublisherFactory for SchemePublisherFactory {
    fn create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>> {
        match broker.scheme() {
            BrokerScheme::Mqtt => self.mqtt.create(broker),
            BrokerScheme::Hub => self.hub.create(broker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheme_dispatch() -> anyhow::Result<()> {
        let factory = SchemePublisherFactory::new(&settings::Publisher::default());

        let mqtt = factory.create(&"mqtt:127.0.0.1:1".parse()?)?;
        assert_eq!(mqtt.broker().scheme(), BrokerScheme::Mqtt);
        mqtt.close().await;

        let hub = factory.create(&"signalr:http://127.0.0.1:1/hub".parse()?)?;
        assert_eq!(hub.broker().scheme(), BrokerScheme::Hub);
        hub.close().await;

        let secure = factory.create(&"signalr:https://hub.example.com/data".parse()?)?;
        assert_eq!(secure.broker().scheme(), BrokerScheme::Hub);
        secure.close().await;
        Ok(())
    }
}
