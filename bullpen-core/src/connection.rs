//! Long-lived Redis connections owned by queue adapters.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::adapter::AdapterError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one logical backend connection.
///
/// Two adapters report the same id only when they share a connection, which
/// never happens across boards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Redis connection that is established on first use.
///
/// Creating one performs no I/O, so adapters can be built for backends that
/// are down; the failure surfaces on the first operation instead. Once
/// connected, the [`ConnectionManager`] reconnects on its own and lives until
/// the owner is dropped.
pub struct LazyConnection {
    id: ConnectionId,
    client: redis::Client,
    connect_timeout: Duration,
    manager: OnceCell<ConnectionManager>,
}

impl fmt::Debug for LazyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyConnection")
            .field("id", &self.id)
            .field("connected", &self.manager.initialized())
            .finish()
    }
}

impl LazyConnection {
    /// Wrap `client`; connecting is deferred until [`LazyConnection::get`].
    pub fn new(client: redis::Client, connect_timeout: Duration) -> Self {
        Self {
            id: ConnectionId::next(),
            client,
            connect_timeout,
            manager: OnceCell::new(),
        }
    }

    /// Identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the first connect has succeeded.
    pub fn is_connected(&self) -> bool {
        self.manager.initialized()
    }

    /// Connection handle, connecting first if needed.
    pub async fn get(&self) -> Result<ConnectionManager, AdapterError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.connect_timeout, connect).await
                {
                    Ok(Ok(manager)) => {
                        debug!(connection = %self.id, "redis connection established");
                        Ok(manager)
                    }
                    Ok(Err(err)) => {
                        warn!(connection = %self.id, error = %err, "redis connection failed");
                        Err(AdapterError::Unavailable(err.to_string()))
                    }
                    Err(_) => {
                        warn!(
                            connection = %self.id,
                            timeout = ?self.connect_timeout,
                            "redis connection timed out"
                        );
                        Err(AdapterError::Unavailable(format!(
                            "connection attempt timed out after {:?}",
                            self.connect_timeout
                        )))
                    }
                }
            })
            .await?;

        Ok(manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn construction_does_not_connect() {
        let client =
            redis::Client::open("redis://127.0.0.1:1/0").expect("valid url");
        let connection = LazyConnection::new(client, Duration::from_millis(10));
        assert!(!connection.is_connected());
    }
}
