use std::time::Duration;

use derive_builder::Builder;
use getset::{CopyGetters, Setters};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs of loss detection.
#[derive(
    Builder, CopyGetters, Setters, Debug, Clone, Copy, PartialEq, Serialize, Deserialize,
)]
#[builder(default, setter(into), build_fn(skip))]
#[serde(default)]
pub struct RecoveryConfig {
    /// A packet is lost once a packet this many packet numbers later has been acknowledged.
    #[getset(get_copy = "pub", set = "pub")]
    packet_threshold: u64,
    /// A packet is lost once a later packet has been acknowledged and this
    /// multiple of the RTT has passed since it was sent.
    #[getset(get_copy = "pub", set = "pub")]
    time_threshold: f32,
    /// Lower bound of the loss delay.
    #[getset(get_copy = "pub", set = "pub")]
    granularity: Duration,
    /// Hard cap: only ACKs are sent while this many packets are tracked,
    /// counting queued retransmissions.
    #[getset(get_copy = "pub", set = "pub")]
    max_tracked_packets: usize,
    /// No new data is sent while this many packets are tracked, retransmissions
    /// and probes still go out.
    #[getset(get_copy = "pub", set = "pub")]
    max_outstanding_packets: usize,
    /// The peer's max_ack_delay transport parameter.
    #[getset(get_copy = "pub", set = "pub")]
    max_ack_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            packet_threshold: 10,
            time_threshold: 9.0 / 8.0,
            granularity: Duration::from_millis(1),
            max_tracked_packets: 2500,
            max_outstanding_packets: 2000,
            max_ack_delay: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("packet threshold must be at least 1")]
    PacketThreshold,
    #[error("time threshold {0} must be at least 1")]
    TimeThreshold(f32),
    #[error("{outstanding} outstanding packets exceed the {tracked} tracked packets cap")]
    OutstandingPackets { outstanding: usize, tracked: usize },
}

impl RecoveryConfig {
    pub fn builder() -> RecoveryConfigBuilder {
        RecoveryConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_threshold == 0 {
            return Err(ConfigError::PacketThreshold);
        }
        if self.time_threshold.is_nan() || self.time_threshold < 1.0 {
            return Err(ConfigError::TimeThreshold(self.time_threshold));
        }
        if self.max_outstanding_packets > self.max_tracked_packets {
            return Err(ConfigError::OutstandingPackets {
                outstanding: self.max_outstanding_packets,
                tracked: self.max_tracked_packets,
            });
        }
        Ok(())
    }
}

impl RecoveryConfigBuilder {
    pub fn build(&self) -> Result<RecoveryConfig, ConfigError> {
        let default = RecoveryConfig::default();
        let config = RecoveryConfig {
            packet_threshold: self.packet_threshold.unwrap_or(default.packet_threshold),
            time_threshold: self.time_threshold.unwrap_or(default.time_threshold),
            granularity: self.granularity.unwrap_or(default.granularity),
            max_tracked_packets: self
                .max_tracked_packets
                .unwrap_or(default.max_tracked_packets),
            max_outstanding_packets: self
                .max_outstanding_packets
                .unwrap_or(default.max_outstanding_packets),
            max_ack_delay: self.max_ack_delay.unwrap_or(default.max_ack_delay),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = RecoveryConfig::builder().build().unwrap();
        assert_eq!(config, RecoveryConfig::default());
        assert_eq!(config.packet_threshold(), 10);
        assert_eq!(config.max_ack_delay(), Duration::from_millis(25));
    }

    #[test]
    fn test_builder_override() {
        let config = RecoveryConfig::builder()
            .packet_threshold(3u64)
            .max_tracked_packets(20usize)
            .max_outstanding_packets(10usize)
            .build()
            .unwrap();
        assert_eq!(config.packet_threshold(), 3);
        assert_eq!(config.max_outstanding_packets(), 10);
        assert_eq!(config.time_threshold(), 9.0 / 8.0);
    }

    #[test]
    fn test_builder_validation() {
        assert_eq!(
            RecoveryConfig::builder().packet_threshold(0u64).build(),
            Err(ConfigError::PacketThreshold)
        );
        assert_eq!(
            RecoveryConfig::builder().time_threshold(0.5f32).build(),
            Err(ConfigError::TimeThreshold(0.5))
        );
        assert!(matches!(
            RecoveryConfig::builder().max_outstanding_packets(3000usize).build(),
            Err(ConfigError::OutstandingPackets { outstanding: 3000, .. })
        ));
    }
}
