mod dataset;
mod monitor;
mod node;
pub mod settings;

pub use dataset::{DataSet, ServerRegistry};
pub use monitor::{MonitorRequest, MonitorableNode, StopMonitorRequest};
pub use node::{NodeDescriptor, NodeEdge, NodeType};
pub use settings::Settings;
