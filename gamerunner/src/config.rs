//! Runtime configuration, following `gamecore::config::GameConfig`'s shape: a
//! `[server]` section and a `[game]` section loaded from a single TOML file, with a
//! `Default` impl so the demonstration binary runs without any config staged at all.

use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:28008";

#[derive(Serialize, Deserialize)]
pub struct Server {
    pub address: String,
    pub max_clients: usize,
    pub batch_interval_ms: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Game {
    pub tick_rate_hz: u64,
}

#[derive(Serialize, Deserialize)]
pub struct GameConfig {
    pub server: Server,
    pub game: Game,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            server: Server {
                address: DEFAULT_BIND_ADDRESS.to_string(),
                max_clients: 256,
                batch_interval_ms: 10,
            },
            game: Game { tick_rate_hz: 60 },
        }
    }
}

impl GameConfig {
    /// Loads a config file, failing fast with a descriptive message: misconfiguration
    /// at startup gets no retry, unlike the codec's recoverable per-call failures.
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path).expect("error loading game configuration file")
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.server.batch_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.game.tick_rate_hz.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let toml = serdeconv::to_toml_string(&GameConfig::default()).unwrap();
        let reloaded: GameConfig = serdeconv::from_toml_str(&toml).unwrap();
        assert_eq!(reloaded.server.address, DEFAULT_BIND_ADDRESS);
        assert_eq!(reloaded.game.tick_rate_hz, 60);
    }
}
