//! Connection layer.
//!
//! The WebSocket gateway and the wire protocol it speaks.

pub mod gateway;
pub mod protocol;

pub use gateway::{ConnectionGateway, GatewayConfig, GatewayError};
pub use protocol::{ClientFrame, ServerFrame};
