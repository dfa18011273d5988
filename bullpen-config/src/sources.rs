//! Raw configuration sources: the TOML file and the process environment.
//!
//! Nothing here applies defaults or precedence; that is the loader's job.
//! Values that cannot be parsed are kept aside as [`RejectedVar`]s so the
//! loader can warn about them instead of guessing.

use std::{
    collections::HashMap, ffi::OsString, fmt, path::PathBuf, str::FromStr,
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::constants::env;

static BOARD_PATH_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^BOARD_([0-9]+)_PATH$").expect("static regex compiles")
});

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    /// `[server]` table.
    #[serde(default)]
    pub server: FileServerConfig,
    /// `[discovery]` table.
    #[serde(default)]
    pub discovery: FileDiscoveryConfig,
    /// `[redis]` table.
    #[serde(default)]
    pub redis: FileRedisConfig,
    /// `[[boards]]` entries in file order.
    #[serde(default)]
    pub boards: Vec<FileBoardConfig>,
}

/// `[server]` table.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileServerConfig {
    /// Interface to bind.
    pub host: Option<String>,
    /// Port to bind.
    pub port: Option<u16>,
}

/// Durations are humantime strings (`"5s"`, `"750ms"`).
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileDiscoveryConfig {
    /// Bound on one board's discovery call.
    pub timeout: Option<String>,
    /// Bound on an adapter's first connect.
    pub connect_timeout: Option<String>,
    /// `SCAN ... COUNT` hint.
    pub scan_count: Option<usize>,
}

/// Backend defaults inherited by boards that leave host or port unset.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileRedisConfig {
    /// Fallback Redis host.
    pub host: Option<String>,
    /// Fallback Redis port.
    pub port: Option<u16>,
}

/// One `[[boards]]` entry.
#[derive(Clone, Deserialize)]
pub struct FileBoardConfig {
    /// Mount path.
    pub path: String,
    /// Redis host; `[redis].host` when unset.
    pub host: Option<String>,
    /// Redis port; `[redis].port` when unset.
    pub port: Option<u16>,
    /// Logical database.
    #[serde(default)]
    pub db: u32,
    /// ACL username.
    pub username: Option<String>,
    /// Redis password. Redacted from `Debug`.
    pub password: Option<String>,
    /// Refuse mutating operations.
    #[serde(default)]
    pub read_only: bool,
}

impl fmt::Debug for FileBoardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBoardConfig")
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// An environment variable whose value could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedVar {
    /// Variable name.
    pub name: String,
    /// Value as found, lossily decoded when it was not Unicode.
    pub value: String,
    /// What a valid value looks like.
    pub expected: &'static str,
}

/// One `BOARD_{index}_*` entry.
#[derive(Clone, Default)]
pub struct EnvBoard {
    /// 1-based index from the variable names.
    pub index: u32,
    /// `BOARD_{i}_PATH`, trimmed.
    pub path: String,
    /// `BOARD_{i}_REDIS_HOST`.
    pub host: Option<String>,
    /// `BOARD_{i}_REDIS_PORT`.
    pub port: Option<u16>,
    /// `BOARD_{i}_REDIS_DB`.
    pub db: Option<u32>,
    /// `BOARD_{i}_REDIS_USERNAME`.
    pub username: Option<String>,
    /// `BOARD_{i}_REDIS_PASSWORD`. Redacted from `Debug`.
    pub password: Option<String>,
    /// `BOARD_{i}_READ_ONLY`.
    pub read_only: Option<bool>,
}

impl fmt::Debug for EnvBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvBoard")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// `BULLPEN_CONFIG`.
    pub config_path: Option<PathBuf>,
    /// `SERVER_HOST`.
    pub server_host: Option<String>,
    /// `SERVER_PORT`.
    pub server_port: Option<u16>,
    /// `REDIS_HOST`.
    pub redis_host: Option<String>,
    /// `REDIS_PORT`.
    pub redis_port: Option<u16>,
    /// `DISCOVERY_TIMEOUT`, unparsed.
    pub discovery_timeout: Option<String>,
    /// `REDIS_CONNECT_TIMEOUT`, unparsed.
    pub connect_timeout: Option<String>,
    /// `DISCOVERY_SCAN_COUNT`.
    pub scan_count: Option<usize>,
    /// Contiguous entries starting at index 1.
    pub boards: Vec<EnvBoard>,
    /// Indices that define `BOARD_{i}_PATH` past the first gap, ascending.
    pub ignored_board_indices: Vec<u32>,
    /// Variables that were set but unusable.
    pub rejected: Vec<RejectedVar>,
}

/// Whether `name` is a variable this crate reads.
fn is_recognized(name: &str) -> bool {
    name.starts_with("BOARD_")
        || [
            env::CONFIG_PATH,
            env::SERVER_HOST,
            env::SERVER_PORT,
            env::REDIS_HOST,
            env::REDIS_PORT,
            env::DISCOVERY_TIMEOUT,
            env::REDIS_CONNECT_TIMEOUT,
            env::DISCOVERY_SCAN_COUNT,
        ]
        .contains(&name)
}

impl EnvConfig {
    /// Snapshot of the process environment.
    pub fn gather() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Build from raw OS pairs. Pairs that are not Unicode are skipped; when
    /// the name is one of ours the value is recorded as rejected.
    pub fn from_os_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut unusable = Vec::new();
        let usable: Vec<(String, String)> = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.into_string().ok()?;
                match value.into_string() {
                    Ok(value) => Some((name, value)),
                    Err(raw) => {
                        if is_recognized(&name) {
                            unusable.push(RejectedVar {
                                name,
                                value: raw.to_string_lossy().into_owned(),
                                expected: "valid UTF-8",
                            });
                        }
                        None
                    }
                }
            })
            .collect();

        let mut env_config = Self::from_vars(usable);
        unusable.append(&mut env_config.rejected);
        env_config.rejected = unusable;
        env_config
    }

    /// Build from explicit `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut reader = VarReader {
            vars: &vars,
            rejected: Vec::new(),
        };

        let mut env_config = Self {
            config_path: reader.string(env::CONFIG_PATH).map(PathBuf::from),
            server_host: reader.string(env::SERVER_HOST),
            server_port: reader.parsed(env::SERVER_PORT, "a port number"),
            redis_host: reader.string(env::REDIS_HOST),
            redis_port: reader.parsed(env::REDIS_PORT, "a port number"),
            discovery_timeout: reader.string(env::DISCOVERY_TIMEOUT),
            connect_timeout: reader.string(env::REDIS_CONNECT_TIMEOUT),
            scan_count: reader
                .parsed(env::DISCOVERY_SCAN_COUNT, "a positive integer"),
            ..Self::default()
        };

        // Entries are read in index order and stop at the first missing
        // BOARD_{i}_PATH.
        let mut index = 1;
        while let Some(path) = vars.get(&env::board_var(index, "PATH")) {
            env_config.boards.push(EnvBoard {
                index,
                path: path.trim().to_string(),
                host: reader.string(&env::board_var(index, "REDIS_HOST")),
                port: reader.parsed(
                    &env::board_var(index, "REDIS_PORT"),
                    "a port number",
                ),
                db: reader.parsed(
                    &env::board_var(index, "REDIS_DB"),
                    "a database number",
                ),
                username: reader
                    .string(&env::board_var(index, "REDIS_USERNAME")),
                password: reader
                    .raw(&env::board_var(index, "REDIS_PASSWORD"))
                    .filter(|value| !value.is_empty()),
                read_only: reader.flag(&env::board_var(index, "READ_ONLY")),
            });
            index += 1;
        }

        let mut ignored: Vec<u32> = vars
            .keys()
            .filter_map(|name| BOARD_PATH_VAR.captures(name))
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .filter(|found| *found > index)
            .collect();
        ignored.sort_unstable();
        env_config.ignored_board_indices = ignored;

        env_config.rejected = reader.rejected;
        env_config
    }
}

struct VarReader<'a> {
    vars: &'a HashMap<String, String>,
    rejected: Vec<RejectedVar>,
}

impl VarReader<'_> {
    fn raw(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    /// Trimmed value; blank counts as unset.
    fn string(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .map(|raw| raw.trim())
            .filter(|trimmed| !trimmed.is_empty())
            .map(str::to_string)
    }

    fn parsed<T: FromStr>(
        &mut self,
        name: &str,
        expected: &'static str,
    ) -> Option<T> {
        let raw = self.string(name)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.reject(name, raw, expected);
                None
            }
        }
    }

    fn flag(&mut self, name: &str) -> Option<bool> {
        let raw = self.string(name)?;
        match parse_bool(&raw) {
            Some(value) => Some(value),
            None => {
                self.reject(name, raw, "true/false, yes/no, on/off or 1/0");
                None
            }
        }
    }

    fn reject(&mut self, name: &str, value: String, expected: &'static str) {
        self.rejected.push(RejectedVar {
            name: name.to_string(),
            value,
            expected,
        });
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
