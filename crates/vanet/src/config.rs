use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vanet_mux::MuxConfig;
use vanet_pool::PoolConfig;
use vanet_tkvs::{BusConfig, DEFAULT_TICK_HZ};
use vanet_transport::LinkConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

/// Board configuration file. Every section is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub tick_hz: u32,
    pub pools: PoolConfig,
    pub bus: BusConfig,
    pub link: LinkConfig,
    pub mux: MuxConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            pools: PoolConfig::default(),
            bus: BusConfig::default(),
            link: LinkConfig::default(),
            mux: MuxConfig::default(),
        }
    }
}

impl BoardConfig {
    /// Load from a JSON file, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        serde_json::from_str(&text).map_err(|err| {
            CliError::new(
                DATA_INVALID,
                format!("invalid config {}: {err}", path.display()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        assert_eq!(BoardConfig::load(None).unwrap(), BoardConfig::default());
    }

    #[test]
    fn sections_are_optional() {
        let cfg: BoardConfig =
            serde_json::from_str(r#"{"mux":{"echo":false},"bus":{"max_subscriptions":8}}"#).unwrap();
        assert!(!cfg.mux.echo);
        assert_eq!(cfg.bus.max_subscriptions, 8);
        assert_eq!(cfg.pools, PoolConfig::default());
        assert_eq!(cfg.tick_hz, 32);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let err = BoardConfig::load(Some(Path::new("/nonexistent/vanet.json"))).unwrap_err();
        assert_eq!(err.code, crate::exit::FAILURE);
    }
}
