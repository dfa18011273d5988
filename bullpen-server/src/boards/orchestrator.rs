//! Provisions every configured board and assembles the application router.

use axum::Router;
use bullpen_config::BoardConfig;
use tracing::{error, info, warn};

use super::{
    mount::{mount_paths_overlap, normalize_mount_path},
    provisioner::{
        BoardFailure, BoardPhase, BoardProvisioner, MountedBoard, ProvisionError,
    },
};
use crate::{handlers::health::HealthState, infra::HEALTH_PATH, routes};

/// Outcome of one provisioning pass.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Boards in configuration order.
    pub mounted: Vec<MountedBoard>,
    pub failures: Vec<BoardFailure>,
}

impl ProvisionReport {
    pub fn board(&self, mount_path: &str) -> Option<&MountedBoard> {
        self.mounted.iter().find(|board| board.mount_path() == mount_path)
    }

    pub fn log_summary(&self) {
        info!(
            boards_mounted = self.mounted.len(),
            boards_failed = self.failures.len(),
            "board provisioning finished"
        );
        for board in &self.mounted {
            info!(
                mount_path = board.mount_path(),
                read_only = board.read_only(),
                queue_count = board.dashboard.len(),
                "board mounted"
            );
        }
        for failure in &self.failures {
            error!(
                mount_path = %failure.mount_path,
                phase = %failure.phase,
                error = %failure.error,
                "board not mounted"
            );
        }
    }

    /// Every mounted board nested at its path, plus the health endpoint.
    pub fn into_router(self) -> Router {
        let health = HealthState {
            boards_mounted: self.mounted.len(),
            boards_failed: self.failures.len(),
        };

        let mut app = Router::new();
        for board in &self.mounted {
            app = app.nest(board.mount_path(), board.router());
        }
        app.merge(routes::health_router(health))
    }
}

#[derive(Debug, Clone)]
pub struct BoardOrchestrator {
    provisioner: BoardProvisioner,
}

impl BoardOrchestrator {
    pub fn new(provisioner: BoardProvisioner) -> Self {
        Self { provisioner }
    }

    /// Provision `configs` one after another. A failed board is recorded and
    /// the pass moves on.
    pub async fn run(&self, configs: &[BoardConfig]) -> ProvisionReport {
        let mut report = ProvisionReport::default();

        for config in configs {
            if let Some(error) = conflict(config, &report.mounted) {
                warn!(
                    mount_path = %config.mount_path,
                    error = %error,
                    "skipping board"
                );
                report.failures.push(BoardFailure {
                    mount_path: config.mount_path.clone(),
                    phase: BoardPhase::Idle,
                    error,
                });
                continue;
            }

            match self.provisioner.provision(config).await {
                Ok(board) => report.mounted.push(board),
                Err(failure) => {
                    error!(
                        mount_path = %failure.mount_path,
                        phase = %failure.phase,
                        error = %failure.error,
                        "board provisioning failed"
                    );
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}

/// A mount path that collides with the health endpoint or an already mounted board.
/// Malformed paths are left for the provisioner to reject.
fn conflict(
    config: &BoardConfig,
    mounted: &[MountedBoard],
) -> Option<ProvisionError> {
    let path = normalize_mount_path(&config.mount_path).ok()?;

    std::iter::once(HEALTH_PATH)
        .chain(mounted.iter().map(MountedBoard::mount_path))
        .find(|existing| mount_paths_overlap(&path, existing))
        .map(|existing| ProvisionError::MountConflict {
            path: path.clone(),
            existing: existing.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bullpen_core::{
        ConnectionDescriptor, QueueDiscovery,
        testing::{InMemoryAdapterFactory, InMemoryKeyScanner},
    };
    use std::{collections::HashSet, sync::Arc, time::Duration};

    fn orchestrator(
        scanner: &Arc<InMemoryKeyScanner>,
        factory: &InMemoryAdapterFactory,
    ) -> BoardOrchestrator {
        BoardOrchestrator::new(BoardProvisioner::new(
            QueueDiscovery::new(scanner.clone(), Duration::from_millis(200)),
            Arc::new(factory.clone()),
        ))
    }

    #[tokio::test]
    async fn failures_do_not_stop_later_boards() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let factory = InMemoryAdapterFactory::new();
        let good = ConnectionDescriptor::new("memory", 6379, 1);
        scanner.with_keys(&good, ["bull:jobs:1"]);

        let report = orchestrator(&scanner, &factory)
            .run(&[
                BoardConfig::new("/a", ConnectionDescriptor::new("", 6379, 0)),
                BoardConfig::new("/b", good),
            ])
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].mount_path, "/a");
        assert_eq!(report.mounted.len(), 1);
        assert_eq!(
            report.board("/b").expect("b mounted").dashboard.queue_names(),
            ["jobs"]
        );
    }

    #[tokio::test]
    async fn overlapping_and_reserved_paths_conflict() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let factory = InMemoryAdapterFactory::new();
        let descriptor = ConnectionDescriptor::new("memory", 6379, 0);

        let report = orchestrator(&scanner, &factory)
            .run(&[
                BoardConfig::new("/ops", descriptor.clone()),
                BoardConfig::new("/ops/", descriptor.clone()),
                BoardConfig::new("/ops/mail", descriptor.clone()),
                BoardConfig::new("/health", descriptor.clone()),
                BoardConfig::new("/opsx", descriptor),
            ])
            .await;

        let mounted: Vec<_> =
            report.mounted.iter().map(MountedBoard::mount_path).collect();
        assert_eq!(mounted, ["/ops", "/opsx"]);
        assert_eq!(report.failures.len(), 3);
        for failure in &report.failures {
            assert_eq!(failure.phase, BoardPhase::Idle);
            assert!(matches!(
                failure.error,
                ProvisionError::MountConflict { .. }
            ));
        }
    }

    #[tokio::test]
    async fn boards_on_the_same_backend_share_no_connections() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let factory = InMemoryAdapterFactory::new();
        let descriptor = ConnectionDescriptor::new("memory", 6379, 1);
        scanner.with_keys(&descriptor, ["bull:a:1", "bull:b:1"]);

        let report = orchestrator(&scanner, &factory)
            .run(&[
                BoardConfig::new("/one", descriptor.clone()),
                BoardConfig::new("/two", descriptor).read_only(true),
            ])
            .await;

        let ids = |path: &str| -> HashSet<_> {
            report
                .board(path)
                .expect("mounted")
                .dashboard
                .connection_ids()
                .into_iter()
                .collect()
        };
        let one = ids("/one");
        let two = ids("/two");
        assert_eq!(one.len(), 2);
        assert_eq!(two.len(), 2);
        assert!(one.is_disjoint(&two));
    }
}
