//! Precedence and composition.
//!
//! The `.env` file only fills variables the process does not already have.
//! Environment values win over the TOML file, which wins over built-in
//! defaults. Anything dropped or ignored along the way becomes a
//! [`ConfigWarning`](crate::ConfigWarning) instead of an error. A config
//! file that is named but missing, or that cannot be read or parsed, fails
//! the load.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use bullpen_core::{
    ConnectionDescriptor,
    descriptor::{DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT},
};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::debug;

use crate::{
    constants::{
        DEFAULT_CONNECT_TIMEOUT, DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_SCAN_COUNT,
        DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, env,
    },
    models::{
        BoardConfig, BoardsSource, Config, ConfigMetadata, DiscoveryConfig,
        ServerConfig,
    },
    sources::{EnvBoard, EnvConfig, FileBoardConfig, FileConfig},
    validation::ConfigWarnings,
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("bullpen.toml"),
        PathBuf::from("config/bullpen.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
struct ConfigLoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

/// Resolves a [`Config`] from `.env`, the environment and an optional TOML
/// file.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// A loaded configuration together with everything worth telling the
/// operator about it.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// Resolved configuration.
    pub config: Config,
    /// Dropped, ignored or unusable inputs, in discovery order.
    pub warnings: ConfigWarnings,
}

/// Failures that stop the process before any board is provisioned.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The `.env` file exists but could not be read or parsed.
    #[error("failed to read environment file: {0}")]
    EnvFile(#[from] dotenvy::Error),
    /// An explicitly requested config file is missing.
    #[error("configuration file {path} does not exist")]
    MissingConfig {
        /// Requested path.
        path: PathBuf,
    },
    /// The config file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`FileConfig`].
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser error with line and column.
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigLoader {
    /// Loader using the default `.env` and config file lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this TOML file instead of searching the default locations.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Read this file instead of `./.env`.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Apply the `.env` file, snapshot the process environment and compose.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose from an explicit environment snapshot. Does not read `.env`.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        Ok(compose_config(file_config, env, config_path))
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // A path the operator named must exist; the default locations are
        // only used when present.
        let named = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match named {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> ConfigLoad {
    let mut warnings = ConfigWarnings::default();

    for rejected in &env.rejected {
        warnings.push_with_hint(
            format!(
                "{} has unusable value {:?}; falling back to the default",
                rejected.name, rejected.value
            ),
            format!("Set {} to {}", rejected.name, rejected.expected),
        );
    }

    let FileConfig {
        server: file_server,
        discovery: file_discovery,
        redis: file_redis,
        boards: file_boards,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(DEFAULT_SERVER_PORT),
    };

    let discovery = DiscoveryConfig {
        timeout: resolve_duration(
            env::DISCOVERY_TIMEOUT,
            env.discovery_timeout.as_deref(),
            file_discovery.timeout.as_deref(),
            DEFAULT_DISCOVERY_TIMEOUT,
            &mut warnings,
        ),
        connect_timeout: resolve_duration(
            env::REDIS_CONNECT_TIMEOUT,
            env.connect_timeout.as_deref(),
            file_discovery.connect_timeout.as_deref(),
            DEFAULT_CONNECT_TIMEOUT,
            &mut warnings,
        ),
        scan_count: match env.scan_count.or(file_discovery.scan_count) {
            Some(0) => {
                warnings.push(format!(
                    "{} must be positive; using {DEFAULT_SCAN_COUNT}",
                    env::DISCOVERY_SCAN_COUNT
                ));
                DEFAULT_SCAN_COUNT
            }
            Some(count) => count,
            None => DEFAULT_SCAN_COUNT,
        },
    };

    let fallback_host = env
        .redis_host
        .clone()
        .or(file_redis.host)
        .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
    let fallback_port =
        env.redis_port.or(file_redis.port).unwrap_or(DEFAULT_REDIS_PORT);

    if !env.ignored_board_indices.is_empty() {
        let first_gap = env.boards.len() + 1;
        let ignored = env
            .ignored_board_indices
            .iter()
            .map(|index| format!("BOARD_{index}_PATH"))
            .collect::<Vec<_>>()
            .join(", ");
        warnings.push_with_hint(
            format!(
                "BOARD_{first_gap}_PATH is not set; ignoring {ignored}"
            ),
            "Number board entries contiguously from 1",
        );
    }

    let (boards, boards_source) = if !env.boards.is_empty() {
        if !file_boards.is_empty() {
            warnings.push(format!(
                "{} [[boards]] entries in the configuration file are ignored \
                 because BOARD_1_PATH is set",
                file_boards.len()
            ));
        }
        let boards = env
            .boards
            .iter()
            .map(|entry| env_board(entry, &fallback_host, fallback_port))
            .collect();
        (boards, BoardsSource::Environment)
    } else if !file_boards.is_empty() {
        let boards = file_boards
            .iter()
            .map(|entry| file_board(entry, &fallback_host, fallback_port))
            .collect();
        (boards, BoardsSource::File)
    } else {
        warnings.push_with_hint(
            "No boards configured; serving /board1 (db 1) and /board2 (db 2)",
            "Set BOARD_1_PATH and friends, or add [[boards]] to bullpen.toml",
        );
        (
            BoardConfig::defaults_on(&fallback_host, fallback_port),
            BoardsSource::Defaults,
        )
    };

    let config = Config {
        server,
        discovery,
        boards,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
            boards_source,
            ignored_board_indices: env.ignored_board_indices.clone(),
        },
    };

    ConfigLoad { config, warnings }
}

fn resolve_duration(
    name: &str,
    from_env: Option<&str>,
    from_file: Option<&str>,
    default: Duration,
    warnings: &mut ConfigWarnings,
) -> Duration {
    let Some(raw) = from_env.or(from_file) else {
        return default;
    };
    match humantime::parse_duration(raw.trim()) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            warnings.push(format!(
                "{name} must be greater than zero; using {}",
                humantime::format_duration(default)
            ));
            default
        }
        Err(err) => {
            warnings.push_with_hint(
                format!(
                    "{name} has unusable value {raw:?} ({err}); using {}",
                    humantime::format_duration(default)
                ),
                "Use a duration such as 5s or 1500ms",
            );
            default
        }
    }
}

fn descriptor(
    host: Option<&str>,
    port: Option<u16>,
    db: u32,
    username: Option<&str>,
    password: Option<&str>,
    fallback_host: &str,
    fallback_port: u16,
) -> ConnectionDescriptor {
    let mut descriptor = ConnectionDescriptor::new(
        host.unwrap_or(fallback_host),
        port.unwrap_or(fallback_port),
        db,
    );
    if let Some(username) = username {
        descriptor = descriptor.with_username(username);
    }
    if let Some(password) = password {
        descriptor = descriptor.with_password(password);
    }
    descriptor
}

fn env_board(
    entry: &EnvBoard,
    fallback_host: &str,
    fallback_port: u16,
) -> BoardConfig {
    let connection = descriptor(
        entry.host.as_deref(),
        entry.port,
        entry.db.unwrap_or(0),
        entry.username.as_deref(),
        entry.password.as_deref(),
        fallback_host,
        fallback_port,
    );
    BoardConfig::new(entry.path.clone(), connection)
        .read_only(entry.read_only.unwrap_or(false))
}

fn file_board(
    entry: &FileBoardConfig,
    fallback_host: &str,
    fallback_port: u16,
) -> BoardConfig {
    let connection = descriptor(
        entry.host.as_deref(),
        entry.port,
        entry.db,
        entry.username.as_deref(),
        entry.password.as_deref(),
        fallback_host,
        fallback_port,
    );
    BoardConfig::new(entry.path.trim(), connection).read_only(entry.read_only)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> EnvConfig {
        EnvConfig::from_vars(vars.iter().copied())
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn no_entries_yield_exactly_the_two_defaults() {
        let load = ConfigLoader::new().load_with_env(env(&[])).expect("load");

        let boards = &load.config.boards;
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].mount_path, "/board1");
        assert_eq!(boards[0].connection.db(), 1);
        assert_eq!(boards[1].mount_path, "/board2");
        assert_eq!(boards[1].connection.db(), 2);
        for board in boards {
            assert!(!board.read_only);
            assert_eq!(board.connection.host(), "localhost");
            assert_eq!(board.connection.port(), 6379);
        }
        assert_eq!(load.config.metadata.boards_source, BoardsSource::Defaults);
        assert_eq!(load.config.server.port, 7712);
        assert_eq!(load.config.server.host, "0.0.0.0");
    }

    #[test]
    fn indexed_entries_replace_the_defaults() {
        let load = ConfigLoader::new()
            .load_with_env(env(&[
                ("BOARD_1_PATH", "/orders"),
                ("BOARD_1_REDIS_HOST", "redis-a"),
                ("BOARD_1_REDIS_PORT", "6380"),
                ("BOARD_1_REDIS_DB", "3"),
                ("BOARD_1_REDIS_USERNAME", "ops"),
                ("BOARD_1_REDIS_PASSWORD", "s3cret"),
                ("BOARD_1_READ_ONLY", "true"),
                ("BOARD_2_PATH", "/mail"),
            ]))
            .expect("load");

        let boards = &load.config.boards;
        assert_eq!(boards.len(), 2);

        let orders = &boards[0];
        assert_eq!(orders.mount_path, "/orders");
        assert!(orders.read_only);
        assert_eq!(orders.connection.host(), "redis-a");
        assert_eq!(orders.connection.port(), 6380);
        assert_eq!(orders.connection.db(), 3);
        assert_eq!(orders.connection.username(), Some("ops"));
        assert!(orders.connection.has_password());

        let mail = &boards[1];
        assert_eq!(mail.connection.host(), "localhost");
        assert_eq!(mail.connection.db(), 0);
        assert!(!mail.read_only);

        assert_eq!(
            load.config.metadata.boards_source,
            BoardsSource::Environment
        );
        assert!(load.warnings.is_empty());
    }

    #[test]
    fn gap_truncates_with_a_warning() {
        let load = ConfigLoader::new()
            .load_with_env(env(&[
                ("BOARD_1_PATH", "/a"),
                ("BOARD_2_PATH", "/b"),
                ("BOARD_4_PATH", "/d"),
            ]))
            .expect("load");

        let paths: Vec<_> = load
            .config
            .boards
            .iter()
            .map(|b| b.mount_path.as_str())
            .collect();
        assert_eq!(paths, ["/a", "/b"]);
        assert_eq!(load.config.metadata.ignored_board_indices, vec![4]);
        assert!(load.warnings.mentions("BOARD_4_PATH"));
    }

    #[test]
    fn global_redis_host_is_inherited() {
        let load = ConfigLoader::new()
            .load_with_env(env(&[
                ("REDIS_HOST", "redis.internal"),
                ("REDIS_PORT", "6390"),
                ("BOARD_1_PATH", "/a"),
            ]))
            .expect("load");
        let connection = &load.config.boards[0].connection;
        assert_eq!(connection.host(), "redis.internal");
        assert_eq!(connection.port(), 6390);
    }

    #[test]
    fn unusable_values_fall_back_with_warnings() {
        let load = ConfigLoader::new()
            .load_with_env(env(&[
                ("SERVER_PORT", "http"),
                ("DISCOVERY_TIMEOUT", "soon"),
                ("REDIS_CONNECT_TIMEOUT", "0s"),
                ("DISCOVERY_SCAN_COUNT", "0"),
            ]))
            .expect("load");

        assert_eq!(load.config.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(load.config.discovery, DiscoveryConfig::default());
        assert!(load.warnings.mentions("SERVER_PORT"));
        assert!(load.warnings.mentions("DISCOVERY_TIMEOUT"));
        assert!(load.warnings.mentions("REDIS_CONNECT_TIMEOUT"));
        assert!(load.warnings.mentions("DISCOVERY_SCAN_COUNT"));
    }

    #[test]
    fn durations_accept_humantime() {
        let load = ConfigLoader::new()
            .load_with_env(env(&[
                ("DISCOVERY_TIMEOUT", "1500ms"),
                ("REDIS_CONNECT_TIMEOUT", "2s"),
            ]))
            .expect("load");
        assert_eq!(load.config.discovery.timeout, Duration::from_millis(1500));
        assert_eq!(load.config.discovery.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn file_boards_and_server_settings_are_used() {
        let file = write_config(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [discovery]
            timeout = "2s"

            [redis]
            host = "shared-redis"

            [[boards]]
            path = "/reports"
            db = 5
            read_only = true

            [[boards]]
            path = "/billing"
            host = "billing-redis"
            port = 6381
            "#,
        );

        let load = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env(&[]))
            .expect("load");
        let config = &load.config;

        assert_eq!(config.server.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.discovery.timeout, Duration::from_secs(2));
        assert_eq!(config.metadata.boards_source, BoardsSource::File);
        assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));

        assert_eq!(config.boards[0].mount_path, "/reports");
        assert_eq!(config.boards[0].connection.host(), "shared-redis");
        assert_eq!(config.boards[0].connection.db(), 5);
        assert!(config.boards[0].read_only);
        assert_eq!(config.boards[1].connection.host(), "billing-redis");
        assert_eq!(config.boards[1].connection.port(), 6381);
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config(
            r#"
            [server]
            port = 9000

            [[boards]]
            path = "/from-file"
            "#,
        );

        let load = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env(&[
                ("SERVER_PORT", "9100"),
                ("BOARD_1_PATH", "/from-env"),
            ]))
            .expect("load");

        assert_eq!(load.config.server.port, 9100);
        assert_eq!(load.config.boards.len(), 1);
        assert_eq!(load.config.boards[0].mount_path, "/from-env");
        assert!(load.warnings.mentions("[[boards]]"));
    }

    #[test]
    fn config_path_from_environment_is_honoured() {
        let file = write_config("[server]\nport = 9200\n");
        let path = file.path().to_string_lossy().into_owned();

        let load = ConfigLoader::new()
            .load_with_env(env(&[("BULLPEN_CONFIG", path.as_str())]))
            .expect("load");
        assert_eq!(load.config.server.port, 9200);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = ConfigLoader::new()
            .with_config_path(dir.path().join("absent.toml"))
            .load_with_env(env(&[]))
            .expect_err("missing file");
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[[boards]]\ndb = \"one\"\n");
        let err = ConfigLoader::new()
            .with_config_path(file.path())
            .load_with_env(env(&[]))
            .expect_err("malformed file");
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }
}
