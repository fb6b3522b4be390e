use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default receive ring size used by the mux task.
pub const DEFAULT_RX_RING: usize = 512;
/// Default transmit ring size.
pub const DEFAULT_TX_RING: usize = 512;

/// Serial link tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Receive ring length in bytes.
    pub rx_ring: usize,
    /// Transmit ring length in bytes.
    pub tx_ring: usize,
    /// Longest a writer waits for ring space before giving up.
    #[serde(with = "millis")]
    pub drain_timeout: Duration,
    /// Sleep between checks while waiting for ring space.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rx_ring: DEFAULT_RX_RING,
            tx_ring: DEFAULT_TX_RING,
            drain_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
