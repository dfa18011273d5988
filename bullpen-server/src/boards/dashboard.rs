use std::{collections::BTreeMap, sync::Arc};

use axum::Router;
use bullpen_core::{ConnectionId, QueueAdapter};

use crate::routes::board_router;

/// One board's adapters, keyed and ordered by queue name.
///
/// The adapter set is fixed at construction; queues created in the backend
/// later are not picked up.
#[derive(Debug)]
pub struct Dashboard {
    mount_path: String,
    read_only: bool,
    adapters: BTreeMap<String, Arc<dyn QueueAdapter>>,
}

impl Dashboard {
    pub fn new(
        mount_path: impl Into<String>,
        read_only: bool,
        adapters: impl IntoIterator<Item = Arc<dyn QueueAdapter>>,
    ) -> Self {
        Self {
            mount_path: mount_path.into(),
            read_only,
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.name().to_string(), adapter))
                .collect(),
        }
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn adapter(&self, queue: &str) -> Option<&Arc<dyn QueueAdapter>> {
        self.adapters.get(queue)
    }

    /// Adapters in queue-name order.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn QueueAdapter>> {
        self.adapters.values()
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Connections held by this board's adapters.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.adapters().map(|adapter| adapter.connection_id()).collect()
    }

    /// Routes relative to the mount path.
    pub fn router(self: &Arc<Self>) -> Router {
        board_router(Arc::clone(self))
    }
}
