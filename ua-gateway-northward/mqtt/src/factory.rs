use crate::publisher::MqttPublisher;
use std::sync::Arc;
use ua_gateway_error::GatewayResult;
use ua_gateway_models::settings;
use ua_gateway_sdk::{BrokerUrl, Publisher, PublisherFactory};

#[derive(Debug, Clone, Default)]
pub struct MqttPublisherFactory {
    settings: settings::Publisher,
}

impl MqttPublisherFactory {
    pub fn new(settings: settings::Publisher) -> Self {
        Self { settings }
    }
}

impl PublisherFactory for MqttPublisherFactory {
    fn create(&self, broker: &BrokerUrl) -> GatewayResult<Arc<dyn Publisher>> {
        Ok(Arc::new(MqttPublisher::spawn(broker.clone(), &self.settings)?))
    }
}
