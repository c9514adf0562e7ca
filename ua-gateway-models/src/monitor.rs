use serde::{Deserialize, Serialize};
use ua_gateway_sdk::DeadbandType;

/// Body of a monitor request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRequest {
    pub topic: String,
    pub broker_url: String,
    pub monitorable_nodes: Vec<MonitorableNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorableNode {
    pub node_id: String,
    /// Milliseconds, must be positive
    pub sampling_interval: f64,
    pub dead_band: DeadbandType,
    pub dead_band_value: f64,
}

/// Body of a stop-monitor request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMonitorRequest {
    pub broker_url: String,
    pub topic: String,
}
