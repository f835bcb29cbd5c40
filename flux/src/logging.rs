use sloggers::{Config, LoggerConfig};
use std::path::Path;

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Build a logger from a TOML config file, falling back to a terminal drain at `debug`
/// level when the file is missing so the crate runs without any config staged.
pub fn init<P: AsRef<Path>>(config_path: P) -> slog::Logger {
    let raw = std::fs::read_to_string(config_path).unwrap_or_else(|_| DEFAULT_CONFIG.to_string());

    let config: LoggerConfig =
        serdeconv::from_toml_str(&raw).expect("malformed logging configuration");

    config.build_logger().expect("failed to build logger")
}

/// Build the default terminal logger, for binaries that don't stage a config file at all.
pub fn init_default() -> slog::Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_str(DEFAULT_CONFIG).expect("malformed default logging configuration");

    config.build_logger().expect("failed to build logger")
}
