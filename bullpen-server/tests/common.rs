use std::{sync::Arc, time::Duration};

use axum_test::TestServer;
use bullpen_config::BoardConfig;
use bullpen_core::{
    ConnectionDescriptor, QueueDiscovery,
    testing::{InMemoryAdapterFactory, InMemoryKeyScanner},
};
use bullpen_server::{
    boards::{BoardOrchestrator, BoardProvisioner, ProvisionReport},
    routes::create_app,
};

/// In-memory backends plus helpers to provision boards over them.
// Code is used by test modules, but not in every one
#[allow(unused)]
#[derive(Debug, Default)]
pub struct TestBackends {
    pub scanner: Arc<InMemoryKeyScanner>,
    pub factory: InMemoryAdapterFactory,
}

#[allow(unused)]
impl TestBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(db: u32) -> ConnectionDescriptor {
        ConnectionDescriptor::new("memory", 6379, db)
    }

    /// Make `queue` discoverable on `descriptor`.
    pub fn add_queue(&self, descriptor: &ConnectionDescriptor, queue: &str) {
        self.scanner
            .with_keys(descriptor, [format!("bull:{queue}:meta")]);
    }

    pub fn orchestrator(&self) -> BoardOrchestrator {
        BoardOrchestrator::new(BoardProvisioner::new(
            QueueDiscovery::new(self.scanner.clone(), Duration::from_millis(200)),
            Arc::new(self.factory.clone()),
        ))
    }

    pub async fn provision(&self, boards: &[BoardConfig]) -> ProvisionReport {
        self.orchestrator().run(boards).await
    }

    pub async fn server(&self, boards: &[BoardConfig]) -> TestServer {
        let report = self.provision(boards).await;
        TestServer::new(create_app(report)).expect("test server")
    }
}
