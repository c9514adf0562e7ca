//! OPC UA client transport built on `async-opcua`.
//!
//! Implements the [`ua_gateway_sdk::UaConnector`] / [`ua_gateway_sdk::UaSession`]
//! seam: endpoint discovery, session activation and the services the gateway
//! core calls. Reconnection policy stays in the core; a session that loses its
//! transport simply starts failing.
mod connector;
mod convert;
mod session;

pub use connector::OpcUaConnector;
pub use session::OpcUaSession;
