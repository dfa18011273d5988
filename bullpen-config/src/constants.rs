//! Defaults and environment variable names.

use std::time::Duration;

/// Listener host when neither environment nor file sets one.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
/// Listener port when neither environment nor file sets one.
pub const DEFAULT_SERVER_PORT: u16 = 7712;

/// Upper bound on a single board's queue discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on establishing an adapter's Redis connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// `SCAN ... COUNT` hint used during discovery.
pub const DEFAULT_SCAN_COUNT: usize = 500;

/// `(mount path, db)` of the boards served when none are configured.
pub const DEFAULT_BOARDS: [(&str, u32); 2] = [("/board1", 1), ("/board2", 2)];

/// Environment variable names.
pub mod env {
    /// Path to a TOML configuration file.
    pub const CONFIG_PATH: &str = "BULLPEN_CONFIG";
    /// Listener host.
    pub const SERVER_HOST: &str = "SERVER_HOST";
    /// Listener port.
    pub const SERVER_PORT: &str = "SERVER_PORT";
    /// Redis host inherited by boards that do not set one.
    pub const REDIS_HOST: &str = "REDIS_HOST";
    /// Redis port inherited by boards that do not set one.
    pub const REDIS_PORT: &str = "REDIS_PORT";
    /// Discovery timeout, humantime format (`5s`, `1500ms`).
    pub const DISCOVERY_TIMEOUT: &str = "DISCOVERY_TIMEOUT";
    /// Adapter connect timeout, humantime format.
    pub const REDIS_CONNECT_TIMEOUT: &str = "REDIS_CONNECT_TIMEOUT";
    /// `SCAN` batch size hint.
    pub const DISCOVERY_SCAN_COUNT: &str = "DISCOVERY_SCAN_COUNT";

    /// Name of field `field` of board entry `index`, e.g. `BOARD_2_REDIS_DB`.
    pub fn board_var(index: u32, field: &str) -> String {
        format!("BOARD_{index}_{field}")
    }
}
