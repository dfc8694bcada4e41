//! Reliable delivery core of a QUIC endpoint: sent packet tracking, loss
//! detection, probe timeouts and the decision of what may be sent next.

pub mod config;
pub mod handler;
pub mod history;
pub mod mode;
pub mod packet;
pub mod space;

pub use config::{ConfigError, RecoveryConfig};
pub use handler::SentPacketHandler;
pub use mode::SendMode;
pub use packet::SentPacket;
