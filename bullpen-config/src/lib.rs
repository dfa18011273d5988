//! Configuration loading for Bullpen.
//!
//! Boards are described by indexed `BOARD_{i}_*` environment variables, by
//! `[[boards]]` tables in `bullpen.toml`, or fall back to two built-in
//! boards. [`ConfigLoader`] resolves all of it into a [`Config`] plus the
//! [`ConfigWarnings`] worth logging at startup.

pub mod constants;
pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    BoardConfig, BoardsSource, Config, ConfigMetadata, DiscoveryConfig,
    ServerConfig,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
