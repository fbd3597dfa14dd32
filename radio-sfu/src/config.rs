//! Relay configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// STUN/TURN URLs handed to every server-side peer connection
    pub ice_servers: Vec<String>,
    /// Upper bound on waiting for ICE gathering during offer/answer (seconds)
    pub ice_gathering_timeout_secs: u64,
    /// Capacity of each participant's outbound signal queue
    pub signal_queue_capacity: usize,
    /// Maximum participants per room (0 = unlimited)
    pub max_participants_per_room: usize,
    /// Lower bound of the UDP port range used for ICE (0 = OS chosen)
    pub udp_port_min: u16,
    /// Upper bound of the UDP port range used for ICE (0 = OS chosen)
    pub udp_port_max: u16,
    /// Public IPs advertised as host candidates (NAT 1:1 mapping)
    pub public_ips: Vec<String>,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_gathering_timeout_secs: 10,
            signal_queue_capacity: 256,
            max_participants_per_room: 0,
            udp_port_min: 0,
            udp_port_max: 0,
            public_ips: Vec::new(),
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_secs(self.ice_gathering_timeout_secs)
    }

    /// Check the relay settings, returning one message per problem
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ice_gathering_timeout_secs == 0 {
            errors.push("sfu.ice_gathering_timeout_secs must be greater than 0".to_string());
        }
        if self.signal_queue_capacity == 0 {
            errors.push("sfu.signal_queue_capacity must be greater than 0".to_string());
        }
        if (self.udp_port_min == 0) != (self.udp_port_max == 0) {
            errors.push("sfu.udp_port_min and sfu.udp_port_max must be set together".to_string());
        } else if self.udp_port_min > self.udp_port_max {
            errors.push(format!(
                "sfu.udp_port_min ({}) must not exceed sfu.udp_port_max ({})",
                self.udp_port_min, self.udp_port_max
            ));
        }
        for url in &self.ice_servers {
            if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
                errors.push(format!("sfu.ice_servers entry '{url}' is not a stun:/turn: URL"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
