//! # Bullpen Server
//!
//! Serves one web dashboard per configured board over BullMQ queues in Redis.
//!
//! At startup every board is provisioned in configuration order: its Redis
//! database is scanned for `bull:<queue>:*` keys, one adapter is built per
//! queue, and the resulting dashboard is nested under the board's mount path.
//! A board that cannot be provisioned is logged and skipped; the others keep
//! serving, and `/health` answers regardless.

pub mod boards;
pub mod handlers;
pub mod infra;
pub mod routes;

use std::sync::Arc;

use bullpen_config::Config;
use bullpen_core::{BullAdapterFactory, QueueDiscovery};

use boards::{BoardOrchestrator, BoardProvisioner};

/// Orchestrator wired to live Redis using the discovery settings in `config`.
pub fn redis_orchestrator(config: &Config) -> BoardOrchestrator {
    let discovery = QueueDiscovery::redis(
        config.discovery.scan_count,
        config.discovery.timeout,
    );
    let factory = BullAdapterFactory::new(config.discovery.connect_timeout);
    BoardOrchestrator::new(BoardProvisioner::new(discovery, Arc::new(factory)))
}
