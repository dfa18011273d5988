//! In-memory stand-ins for the Redis-backed pieces.
//!
//! Enabled for this crate's own tests and, through the `testing` feature, for
//! downstream integration tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    adapter::{
        AdapterError, AdapterFactory, AdapterResult, QueueAdapter,
        QueueOperation,
        job::{JobCounts, JobPage, JobRecord, JobStatus, Page},
        tag_read_only,
    },
    connection::ConnectionId,
    descriptor::{ConnectionDescriptor, DescriptorError},
    discovery::{KeyScanner, StoreError, queue_names},
};

/// `(host, port, db)`; credentials do not select a keyspace.
type BackendKey = (String, u16, u32);

fn backend_key(descriptor: &ConnectionDescriptor) -> BackendKey {
    (descriptor.host().to_string(), descriptor.port(), descriptor.db())
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    opened: AtomicUsize,
    released: AtomicUsize,
}

/// Counts a release when dropped, including when the scan future is
/// cancelled by a timeout.
struct ScanConnection<'a> {
    counters: &'a ConnectionCounters,
}

impl<'a> ScanConnection<'a> {
    fn open(counters: &'a ConnectionCounters) -> Self {
        counters.opened.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ScanConnection<'_> {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// [`KeyScanner`] over fixed keyspaces.
#[derive(Debug, Default)]
pub struct InMemoryKeyScanner {
    keyspaces: Mutex<HashMap<BackendKey, Vec<String>>>,
    refused: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    counters: ConnectionCounters,
}

impl InMemoryKeyScanner {
    /// Scanner with no keys anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `keys` to the database `descriptor` points at.
    pub fn with_keys<K>(
        &self,
        descriptor: &ConnectionDescriptor,
        keys: impl IntoIterator<Item = K>,
    ) where
        K: Into<String>,
    {
        self.keyspaces
            .lock()
            .entry(backend_key(descriptor))
            .or_default()
            .extend(keys.into_iter().map(Into::into));
    }

    /// Refuse connections to `host`.
    pub fn refuse_host(&self, host: impl Into<String>) {
        self.refused.lock().insert(host.into());
    }

    /// Accept connections to `host` but never answer.
    pub fn stall_host(&self, host: impl Into<String>) {
        self.stalled.lock().insert(host.into());
    }

    /// Connections opened so far.
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Connections released so far.
    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyScanner for InMemoryKeyScanner {
    async fn scan_queues(
        &self,
        descriptor: &ConnectionDescriptor,
        pattern: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let _connection = ScanConnection::open(&self.counters);

        let refused = self.refused.lock().contains(descriptor.host());
        if refused {
            return Err(StoreError::Unreachable {
                backend: descriptor.to_string(),
                reason: "connection refused".into(),
            });
        }
        let stalled = self.stalled.lock().contains(descriptor.host());
        if stalled {
            std::future::pending::<()>().await;
        }

        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let names = self
            .keyspaces
            .lock()
            .get(&backend_key(descriptor))
            .map(|keys| {
                queue_names(
                    keys.iter()
                        .map(String::as_str)
                        .filter(|key| key.starts_with(prefix)),
                )
            })
            .unwrap_or_default();
        Ok(names)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: BTreeMap<String, JobStatus>,
    paused: bool,
}

#[derive(Debug, Default)]
struct Backends {
    queues: HashMap<BackendKey, HashMap<String, QueueState>>,
    unavailable: HashSet<String>,
}

type SharedBackends = Arc<Mutex<Backends>>;

/// Queue adapter over shared in-memory state.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    backend: BackendKey,
    backends: SharedBackends,
    connection_id: ConnectionId,
}

impl InMemoryQueue {
    fn with_queue<T>(
        &self,
        f: impl FnOnce(&mut QueueState) -> AdapterResult<T>,
    ) -> AdapterResult<T> {
        let mut backends = self.backends.lock();
        if backends.unavailable.contains(&self.backend.0) {
            return Err(AdapterError::Unavailable(format!(
                "{} is not accepting connections",
                self.backend.0
            )));
        }
        let queue = backends
            .queues
            .entry(self.backend.clone())
            .or_default()
            .entry(self.name.clone())
            .or_default();
        f(queue)
    }

    fn not_found(&self, job_id: &str) -> AdapterError {
        AdapterError::JobNotFound {
            queue: self.name.clone(),
            job_id: job_id.to_string(),
        }
    }

    fn invalid_state(
        &self,
        job_id: &str,
        operation: QueueOperation,
        reason: &str,
    ) -> AdapterError {
        AdapterError::InvalidState {
            queue: self.name.clone(),
            job_id: job_id.to_string(),
            operation,
            reason: reason.to_string(),
        }
    }

    fn set_paused(&self, paused: bool) -> AdapterResult<()> {
        let (from, to) = if paused {
            (JobStatus::Waiting, JobStatus::Paused)
        } else {
            (JobStatus::Paused, JobStatus::Waiting)
        };
        self.with_queue(|queue| {
            queue.paused = paused;
            for status in queue.jobs.values_mut() {
                if *status == from {
                    *status = to;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl QueueAdapter for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_only(&self) -> bool {
        false
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn counts(&self) -> AdapterResult<JobCounts> {
        self.with_queue(|queue| {
            let mut tally: HashMap<JobStatus, u64> = HashMap::new();
            for status in queue.jobs.values() {
                *tally.entry(*status).or_default() += 1;
            }
            Ok(JobCounts::from_pairs(tally))
        })
    }

    async fn is_paused(&self) -> AdapterResult<bool> {
        self.with_queue(|queue| Ok(queue.paused))
    }

    async fn jobs(&self, status: JobStatus, page: Page) -> AdapterResult<JobPage> {
        self.with_queue(|queue| {
            let matching: Vec<&String> = queue
                .jobs
                .iter()
                .filter(|(_, s)| **s == status)
                .map(|(id, _)| id)
                .collect();
            let jobs = matching
                .iter()
                .skip(page.offset())
                .take(page.size() as usize)
                .map(|id| {
                    let mut record = JobRecord::new(id.as_str(), "job");
                    record.status = Some(status);
                    record
                })
                .collect();

            Ok(JobPage {
                status,
                page: page.number(),
                page_size: page.size(),
                total: matching.len() as u64,
                jobs,
            })
        })
    }

    async fn job(&self, job_id: &str) -> AdapterResult<JobRecord> {
        self.with_queue(|queue| {
            let status =
                queue.jobs.get(job_id).ok_or_else(|| self.not_found(job_id))?;
            let mut record = JobRecord::new(job_id, "job");
            record.status = Some(*status);
            Ok(record)
        })
    }

    async fn retry_job(&self, job_id: &str) -> AdapterResult<()> {
        self.with_queue(|queue| {
            let paused = queue.paused;
            let status = queue
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| self.not_found(job_id))?;
            if *status != JobStatus::Failed {
                return Err(self.invalid_state(
                    job_id,
                    QueueOperation::Retry,
                    "job is not in the failed state",
                ));
            }
            *status = if paused {
                JobStatus::Paused
            } else {
                JobStatus::Waiting
            };
            Ok(())
        })
    }

    async fn remove_job(&self, job_id: &str) -> AdapterResult<()> {
        self.with_queue(|queue| {
            match queue.jobs.get(job_id) {
                None => return Err(self.not_found(job_id)),
                Some(JobStatus::Active) => {
                    return Err(self.invalid_state(
                        job_id,
                        QueueOperation::Remove,
                        "job is locked by a worker",
                    ));
                }
                Some(_) => {}
            }
            queue.jobs.remove(job_id);
            Ok(())
        })
    }

    async fn pause(&self) -> AdapterResult<()> {
        self.set_paused(true)
    }

    async fn resume(&self) -> AdapterResult<()> {
        self.set_paused(false)
    }
}

/// [`AdapterFactory`] producing [`InMemoryQueue`] adapters that share state
/// per backend, so mutations through one adapter are visible to assertions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAdapterFactory {
    backends: SharedBackends,
    created: Arc<AtomicUsize>,
}

impl InMemoryAdapterFactory {
    /// Factory with empty backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put job `job_id` in `status` on `queue`.
    pub fn seed_job(
        &self,
        descriptor: &ConnectionDescriptor,
        queue: &str,
        status: JobStatus,
        job_id: &str,
    ) {
        self.backends
            .lock()
            .queues
            .entry(backend_key(descriptor))
            .or_default()
            .entry(queue.to_string())
            .or_default()
            .jobs
            .insert(job_id.to_string(), status);
    }

    /// Current state of a job, `None` once removed.
    pub fn job_status(
        &self,
        descriptor: &ConnectionDescriptor,
        queue: &str,
        job_id: &str,
    ) -> Option<JobStatus> {
        self.backends
            .lock()
            .queues
            .get(&backend_key(descriptor))?
            .get(queue)?
            .jobs
            .get(job_id)
            .copied()
    }

    /// Whether `queue` is flagged paused.
    pub fn is_paused(&self, descriptor: &ConnectionDescriptor, queue: &str) -> bool {
        self.backends
            .lock()
            .queues
            .get(&backend_key(descriptor))
            .and_then(|queues| queues.get(queue))
            .is_some_and(|state| state.paused)
    }

    /// Make every adapter on `host` fail with [`AdapterError::Unavailable`].
    pub fn mark_unavailable(&self, host: impl Into<String>) {
        self.backends.lock().unavailable.insert(host.into());
    }

    /// Adapters built so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for InMemoryAdapterFactory {
    fn make_adapter(
        &self,
        queue: &str,
        descriptor: &ConnectionDescriptor,
        read_only: bool,
    ) -> Result<Arc<dyn QueueAdapter>, DescriptorError> {
        descriptor.validate()?;
        self.created.fetch_add(1, Ordering::SeqCst);

        let adapter = InMemoryQueue {
            name: queue.to_string(),
            backend: backend_key(descriptor),
            backends: self.backends.clone(),
            connection_id: ConnectionId::next(),
        };
        Ok(tag_read_only(adapter, read_only))
    }
}
