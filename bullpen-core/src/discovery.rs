//! Queue discovery.
//!
//! A backend's queues are whatever `bull:<name>:*` keys currently exist in
//! its database. Discovery is forgiving: an unreachable or
//! misbehaving backend yields an empty queue set so the board still mounts.
//! Only a descriptor that cannot describe a backend at all is an error.

use std::{collections::BTreeSet, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    descriptor::{ConnectionDescriptor, DescriptorError},
    keys::{queue_name_from_key, queue_scan_pattern},
};

/// Failures raised while enumerating a backend's keys.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection could be established.
    #[error("backend {backend} unreachable: {reason}")]
    Unreachable {
        /// Redacted descriptor.
        backend: String,
        /// Client error text.
        reason: String,
    },

    /// The connection was established but enumeration failed.
    #[error("key scan on {backend} failed: {reason}")]
    Scan {
        /// Redacted descriptor.
        backend: String,
        /// Client error text.
        reason: String,
    },

    /// The descriptor could not be turned into a client.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Errors that fail a board during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The descriptor does not describe a connectable backend.
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

/// Walks the keys of one backend that match a glob pattern and reports the
/// queue names they belong to.
///
/// Implementations open whatever connection they need inside the call and
/// release it before returning, on every path. Keys are reduced to names as
/// they arrive; the full key list is never held.
#[async_trait]
pub trait KeyScanner: Send + Sync + fmt::Debug {
    /// Distinct queue names among the keys in `descriptor`'s database
    /// matching `pattern`.
    async fn scan_queues(
        &self,
        descriptor: &ConnectionDescriptor,
        pattern: &str,
    ) -> Result<BTreeSet<String>, StoreError>;
}

/// [`KeyScanner`] over a live Redis server using cursor `SCAN`.
#[derive(Debug, Clone)]
pub struct RedisKeyScanner {
    batch_size: usize,
}

impl RedisKeyScanner {
    /// `COUNT` hint used by [`RedisKeyScanner::default`].
    pub const DEFAULT_BATCH_SIZE: usize = 500;

    /// Scanner that asks for roughly `batch_size` keys per round trip.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }
}

impl Default for RedisKeyScanner {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BATCH_SIZE)
    }
}

#[async_trait]
impl KeyScanner for RedisKeyScanner {
    async fn scan_queues(
        &self,
        descriptor: &ConnectionDescriptor,
        pattern: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let client = descriptor.client()?;
        // Scoped to this call; dropping it closes the socket.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StoreError::Unreachable {
                backend: descriptor.to_string(),
                reason: err.to_string(),
            })?;

        let mut names = BTreeSet::new();
        let mut scanned = 0usize;
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.batch_size)
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Scan {
                    backend: descriptor.to_string(),
                    reason: err.to_string(),
                })?;

            scanned += batch.len();
            names.extend(queue_names(batch.iter().map(String::as_str)));
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(
            backend = %descriptor,
            keys = scanned,
            queues = names.len(),
            "key scan finished"
        );
        Ok(names)
    }
}

/// Distinct queue names present in `keys`, sorted.
pub fn queue_names<'a>(
    keys: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    keys.into_iter()
        .filter_map(queue_name_from_key)
        .map(str::to_owned)
        .collect()
}

/// Finds the queues that exist in a backend.
#[derive(Debug, Clone)]
pub struct QueueDiscovery {
    scanner: Arc<dyn KeyScanner>,
    timeout: Duration,
}

impl QueueDiscovery {
    /// Upper bound on one discovery call used by [`QueueDiscovery::redis`].
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Discovery over `scanner`, giving up after `timeout`.
    pub fn new(scanner: Arc<dyn KeyScanner>, timeout: Duration) -> Self {
        Self { scanner, timeout }
    }

    /// Discovery against live Redis servers.
    pub fn redis(batch_size: usize, timeout: Duration) -> Self {
        Self::new(Arc::new(RedisKeyScanner::new(batch_size)), timeout)
    }

    /// Queue names present in `descriptor`'s database.
    ///
    /// Unreachable backends, scan failures and timeouts are logged and
    /// reported as an empty set. An invalid descriptor is an error.
    pub async fn discover(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<BTreeSet<String>, DiscoveryError> {
        descriptor.validate()?;

        let pattern = queue_scan_pattern();
        let scan = self.scanner.scan_queues(descriptor, &pattern);

        match tokio::time::timeout(self.timeout, scan).await {
            Ok(Ok(names)) => {
                info!(
                    backend = %descriptor,
                    queue_count = names.len(),
                    "queue discovery finished"
                );
                Ok(names)
            }
            Ok(Err(StoreError::Descriptor(err))) => Err(err.into()),
            Ok(Err(err)) => {
                error!(
                    backend = %descriptor,
                    error = %err,
                    "queue discovery failed; continuing with no queues"
                );
                Ok(BTreeSet::new())
            }
            Err(_) => {
                error!(
                    backend = %descriptor,
                    timeout = ?self.timeout,
                    "queue discovery timed out; continuing with no queues"
                );
                Ok(BTreeSet::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryKeyScanner;

    fn descriptor(db: u32) -> ConnectionDescriptor {
        ConnectionDescriptor::new("memory", 6379, db)
    }

    fn discovery(scanner: &Arc<InMemoryKeyScanner>) -> QueueDiscovery {
        QueueDiscovery::new(scanner.clone(), Duration::from_millis(200))
    }

    #[test]
    fn names_are_deduplicated_and_sorted() {
        let names = queue_names(["bull:B:1", "bull:A:2", "bull:A:1"]);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn malformed_keys_are_ignored() {
        let names =
            queue_names(["bull::1", "bull", "session:abc", "bull:ok:meta"]);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test]
    async fn discovers_queues_in_the_configured_database() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        scanner.with_keys(
            &descriptor(1),
            ["bull:A:1", "bull:B:1", "bull:A:2", "unrelated"],
        );
        scanner.with_keys(&descriptor(2), ["bull:C:1"]);

        let names = discovery(&scanner)
            .discover(&descriptor(1))
            .await
            .expect("discovery");

        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn scanner_reports_each_queue_once() {
        let scanner = InMemoryKeyScanner::new();
        scanner.with_keys(
            &descriptor(1),
            (1..=50).flat_map(|id| {
                [
                    format!("bull:mail:{id}"),
                    format!("bull:mail:{id}:logs"),
                    format!("bull:billing:{id}"),
                ]
            }),
        );

        let names = scanner
            .scan_queues(&descriptor(1), &queue_scan_pattern())
            .await
            .expect("scan");

        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["billing", "mail"]
        );
    }

    #[tokio::test]
    async fn empty_backend_is_not_an_error() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let names = discovery(&scanner)
            .discover(&descriptor(3))
            .await
            .expect("discovery");
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_yields_empty_set() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let down = ConnectionDescriptor::new("down.internal", 6379, 0);
        scanner.refuse_host("down.internal");

        let names = discovery(&scanner)
            .discover(&down)
            .await
            .expect("discovery");
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn stalled_backend_times_out_to_empty_set() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let slow = ConnectionDescriptor::new("slow.internal", 6379, 0);
        scanner.stall_host("slow.internal");

        let names = QueueDiscovery::new(
            scanner.clone(),
            Duration::from_millis(20),
        )
        .discover(&slow)
        .await
        .expect("discovery");

        assert!(names.is_empty());
        assert_eq!(scanner.opened(), scanner.released());
    }

    #[tokio::test]
    async fn invalid_descriptor_is_an_error() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        let err = discovery(&scanner)
            .discover(&ConnectionDescriptor::new("", 6379, 0))
            .await
            .expect_err("empty host");

        assert!(matches!(
            err,
            DiscoveryError::InvalidDescriptor(DescriptorError::EmptyHost)
        ));
        assert_eq!(scanner.opened(), 0);
    }

    #[tokio::test]
    async fn connection_is_released_on_every_path() {
        let scanner = Arc::new(InMemoryKeyScanner::new());
        scanner.with_keys(&descriptor(1), ["bull:A:1"]);
        scanner.refuse_host("down.internal");
        let discovery = discovery(&scanner);

        discovery.discover(&descriptor(1)).await.expect("populated");
        discovery.discover(&descriptor(9)).await.expect("empty");
        discovery
            .discover(&ConnectionDescriptor::new("down.internal", 6379, 0))
            .await
            .expect("refused");

        assert_eq!(scanner.opened(), 3);
        assert_eq!(scanner.released(), 3);
    }
}
