use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Consensus-chain timing parameters used to stamp frames with the
/// wall-clock slot and epoch in effect when they were captured.
#[derive(Debug, Clone, Deserialize)]
pub struct EthereumNetworkConfig {
    /// Unix timestamp of the network's genesis.
    #[serde(default = "default_genesis_time")]
    pub genesis_time: u64,
    #[serde(default = "default_seconds_per_slot")]
    pub seconds_per_slot: u64,
    #[serde(default = "default_slots_per_epoch")]
    pub slots_per_epoch: u64,
}

fn default_genesis_time() -> u64 {
    // Mainnet.
    1_606_824_023
}

fn default_seconds_per_slot() -> u64 {
    12
}

fn default_slots_per_epoch() -> u64 {
    32
}

impl Default for EthereumNetworkConfig {
    fn default() -> Self {
        Self {
            genesis_time: default_genesis_time(),
            seconds_per_slot: default_seconds_per_slot(),
            slots_per_epoch: default_slots_per_epoch(),
        }
    }
}

impl EthereumNetworkConfig {
    /// Slot in effect at `at`. Saturates to 0 before genesis.
    pub fn wall_clock_slot(&self, at: DateTime<Utc>) -> u64 {
        let elapsed = (at.timestamp().max(0) as u64).saturating_sub(self.genesis_time);

        elapsed / self.seconds_per_slot
    }

    /// Epoch in effect at `at`.
    pub fn wall_clock_epoch(&self, at: DateTime<Utc>) -> u64 {
        self.wall_clock_slot(at) / self.slots_per_epoch
    }
}
