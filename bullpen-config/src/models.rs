use std::{path::PathBuf, time::Duration};

use bullpen_core::ConnectionDescriptor;

use crate::constants::{
    DEFAULT_BOARDS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT,
    DEFAULT_SCAN_COUNT, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
};

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// Discovery and connection tuning.
    pub discovery: DiscoveryConfig,
    /// Boards in load order.
    pub boards: Vec<BoardConfig>,
    /// Where the values came from.
    pub metadata: ConfigMetadata,
}

/// The single process-wide listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
}

impl ServerConfig {
    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Timeouts and batch sizes for talking to Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Bound on one board's discovery call.
    pub timeout: Duration,
    /// Bound on an adapter's first connect.
    pub connect_timeout: Duration,
    /// `SCAN ... COUNT` hint.
    pub scan_count: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

/// One dashboard to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// URL path the dashboard is served under, as configured.
    pub mount_path: String,
    /// Backend holding the board's queues.
    pub connection: ConnectionDescriptor,
    /// Refuse mutating operations.
    pub read_only: bool,
}

impl BoardConfig {
    /// Read-write board at `mount_path` on `connection`.
    pub fn new(
        mount_path: impl Into<String>,
        connection: ConnectionDescriptor,
    ) -> Self {
        Self {
            mount_path: mount_path.into(),
            connection,
            read_only: false,
        }
    }

    /// Set the read-only flag.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// `/board1` on db 1 and `/board2` on db 2, read-write, on the given
    /// backend.
    pub fn defaults_on(host: &str, port: u16) -> Vec<BoardConfig> {
        DEFAULT_BOARDS
            .iter()
            .map(|(path, db)| {
                BoardConfig::new(*path, ConnectionDescriptor::new(host, port, *db))
            })
            .collect()
    }
}

/// Where the board list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardsSource {
    /// Indexed `BOARD_{i}_*` variables.
    Environment,
    /// `[[boards]]` tables in the config file.
    File,
    /// Nothing configured; the two built-in boards.
    #[default]
    Defaults,
}

impl BoardsSource {
    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            BoardsSource::Environment => "environment",
            BoardsSource::File => "file",
            BoardsSource::Defaults => "defaults",
        }
    }
}

/// Provenance of a loaded [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// Config file that was read, if any.
    pub config_path: Option<PathBuf>,
    /// Whether a `.env` file was applied.
    pub env_file_loaded: bool,
    /// Where the boards came from.
    pub boards_source: BoardsSource,
    /// Board indices defined past the first gap and therefore not loaded.
    pub ignored_board_indices: Vec<u32>,
}
