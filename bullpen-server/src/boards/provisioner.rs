//! Turns one board configuration into a mounted dashboard.
//!
//! Per board the provisioner walks `Idle -> Discovering -> Adapting ->
//! Mounted`. Any step may fail the board; the phase it failed in is kept on
//! the [`BoardFailure`] so the startup summary can say where it went wrong.

use std::{fmt, sync::Arc};

use axum::Router;
use bullpen_config::BoardConfig;
use bullpen_core::{
    AdapterFactory, DescriptorError, DiscoveryError, QueueAdapter,
    QueueDiscovery,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    dashboard::Dashboard,
    mount::{InvalidMountPath, normalize_mount_path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardPhase {
    Idle,
    Discovering,
    Adapting,
    Mounted,
    Failed,
}

impl fmt::Display for BoardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoardPhase::Idle => "idle",
            BoardPhase::Discovering => "discovering",
            BoardPhase::Adapting => "adapting",
            BoardPhase::Mounted => "mounted",
            BoardPhase::Failed => "failed",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidMountPath(#[from] InvalidMountPath),

    #[error("mount path {path} conflicts with {existing}")]
    MountConflict { path: String, existing: String },

    #[error("queue discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("could not build adapter for queue {queue}: {source}")]
    Adapter {
        queue: String,
        #[source]
        source: DescriptorError,
    },
}

/// A board that did not mount.
#[derive(Debug)]
pub struct BoardFailure {
    pub mount_path: String,
    /// Phase the board was in when it failed.
    pub phase: BoardPhase,
    pub error: ProvisionError,
}

/// A board ready to be nested into the application router.
#[derive(Debug, Clone)]
pub struct MountedBoard {
    pub dashboard: Arc<Dashboard>,
}

impl MountedBoard {
    pub fn mount_path(&self) -> &str {
        self.dashboard.mount_path()
    }

    pub fn read_only(&self) -> bool {
        self.dashboard.read_only()
    }

    pub fn router(&self) -> Router {
        self.dashboard.router()
    }
}

#[derive(Debug, Clone)]
pub struct BoardProvisioner {
    discovery: QueueDiscovery,
    factory: Arc<dyn AdapterFactory>,
}

impl BoardProvisioner {
    pub fn new(discovery: QueueDiscovery, factory: Arc<dyn AdapterFactory>) -> Self {
        Self { discovery, factory }
    }

    pub async fn provision(
        &self,
        config: &BoardConfig,
    ) -> Result<MountedBoard, BoardFailure> {
        let mut phase = BoardPhase::Idle;
        match self.advance(config, &mut phase).await {
            Ok(board) => {
                enter(board.mount_path(), &mut phase, BoardPhase::Mounted);
                Ok(board)
            }
            Err(error) => {
                let failed_in = phase;
                enter(&config.mount_path, &mut phase, BoardPhase::Failed);
                Err(BoardFailure {
                    mount_path: config.mount_path.clone(),
                    phase: failed_in,
                    error,
                })
            }
        }
    }

    async fn advance(
        &self,
        config: &BoardConfig,
        phase: &mut BoardPhase,
    ) -> Result<MountedBoard, ProvisionError> {
        let mount_path = normalize_mount_path(&config.mount_path)?;

        enter(&mount_path, phase, BoardPhase::Discovering);
        let queues = self.discovery.discover(&config.connection).await?;

        enter(&mount_path, phase, BoardPhase::Adapting);
        let mut adapters: Vec<Arc<dyn QueueAdapter>> =
            Vec::with_capacity(queues.len());
        for queue in &queues {
            let adapter = self
                .factory
                .make_adapter(queue, &config.connection, config.read_only)
                .map_err(|source| ProvisionError::Adapter {
                    queue: queue.clone(),
                    source,
                })?;
            adapters.push(adapter);
        }

        if queues.is_empty() {
            warn!(
                mount_path = %mount_path,
                backend = %config.connection,
                "no queues found; mounting an empty board"
            );
        } else {
            info!(
                mount_path = %mount_path,
                queue_count = queues.len(),
                queues = ?queues,
                "queues discovered"
            );
        }

        let dashboard = Dashboard::new(mount_path, config.read_only, adapters);
        Ok(MountedBoard {
            dashboard: Arc::new(dashboard),
        })
    }
}

fn enter(mount_path: &str, phase: &mut BoardPhase, next: BoardPhase) {
    debug!(mount_path, from = %phase, to = %next, "board phase changed");
    *phase = next;
}
