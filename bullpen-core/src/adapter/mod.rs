//! Uniform queue adapters.
//!
//! Dashboards talk to queues exclusively through [`QueueAdapter`], so nothing
//! above this module branches on the queue engine. Read-only boards get their
//! adapters wrapped in [`ReadOnlyAdapter`], which refuses every mutating call
//! before it reaches the backend.

pub mod bull;
pub mod job;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    connection::ConnectionId,
    descriptor::{ConnectionDescriptor, DescriptorError},
};
use job::{JobCounts, JobPage, JobRecord, JobStatus, Page};

/// Mutating operations an adapter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    /// Move a failed job back to waiting.
    Retry,
    /// Delete a job and its logs.
    Remove,
    /// Stop workers from taking new jobs.
    Pause,
    /// Undo a pause.
    Resume,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueueOperation::Retry => "retry",
            QueueOperation::Remove => "remove",
            QueueOperation::Pause => "pause",
            QueueOperation::Resume => "resume",
        })
    }
}

/// Errors raised by adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Mutation attempted on a read-only board.
    #[error("operation not permitted: {operation} on read-only queue {queue}")]
    ReadOnly {
        /// Queue name.
        queue: String,
        /// Rejected operation.
        operation: QueueOperation,
    },

    /// No job hash exists for the id.
    #[error("job {job_id} not found in queue {queue}")]
    JobNotFound {
        /// Queue name.
        queue: String,
        /// Requested job id.
        job_id: String,
    },

    /// The job exists but its state does not allow the operation.
    #[error("{operation} not allowed for job {job_id} in queue {queue}: {reason}")]
    InvalidState {
        /// Queue name.
        queue: String,
        /// Requested job id.
        job_id: String,
        /// Attempted operation.
        operation: QueueOperation,
        /// Why the state forbids it.
        reason: String,
    },

    /// The backend could not be reached.
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Inspect and mutate one queue.
#[async_trait]
pub trait QueueAdapter: Send + Sync + fmt::Debug {
    /// Queue name as discovered.
    fn name(&self) -> &str;

    /// Whether mutating operations are refused.
    fn read_only(&self) -> bool;

    /// Identity of the backend connection this adapter uses.
    fn connection_id(&self) -> ConnectionId;

    /// Job count per state.
    async fn counts(&self) -> AdapterResult<JobCounts>;

    /// Whether the queue is paused.
    async fn is_paused(&self) -> AdapterResult<bool>;

    /// One page of jobs in `status`.
    async fn jobs(&self, status: JobStatus, page: Page) -> AdapterResult<JobPage>;

    /// A single job with its current state.
    async fn job(&self, job_id: &str) -> AdapterResult<JobRecord>;

    /// Move a failed job back to waiting.
    async fn retry_job(&self, job_id: &str) -> AdapterResult<()>;

    /// Remove a job that is not currently locked by a worker.
    async fn remove_job(&self, job_id: &str) -> AdapterResult<()>;

    /// Pause the queue.
    async fn pause(&self) -> AdapterResult<()>;

    /// Resume the queue.
    async fn resume(&self) -> AdapterResult<()>;
}

/// Builds adapters for discovered queues.
///
/// Implementations must not perform I/O: connection failures belong to the
/// first operation, not to construction.
pub trait AdapterFactory: Send + Sync + fmt::Debug {
    /// Adapter for `queue` on `descriptor`, read-only when requested.
    fn make_adapter(
        &self,
        queue: &str,
        descriptor: &ConnectionDescriptor,
        read_only: bool,
    ) -> Result<Arc<dyn QueueAdapter>, DescriptorError>;
}

/// Box `adapter`, wrapping it in [`ReadOnlyAdapter`] when `read_only`.
pub fn tag_read_only<A>(adapter: A, read_only: bool) -> Arc<dyn QueueAdapter>
where
    A: QueueAdapter + 'static,
{
    if read_only {
        Arc::new(ReadOnlyAdapter::new(adapter))
    } else {
        Arc::new(adapter)
    }
}

/// Delegates reads and rejects every mutation with [`AdapterError::ReadOnly`].
#[derive(Debug)]
pub struct ReadOnlyAdapter<A> {
    inner: A,
}

impl<A: QueueAdapter> ReadOnlyAdapter<A> {
    /// Guard `inner`.
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    fn reject(&self, operation: QueueOperation) -> AdapterError {
        tracing::debug!(
            queue = self.inner.name(),
            %operation,
            "rejected mutation on read-only queue"
        );
        AdapterError::ReadOnly {
            queue: self.inner.name().to_string(),
            operation,
        }
    }
}

#[async_trait]
impl<A: QueueAdapter> QueueAdapter for ReadOnlyAdapter<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read_only(&self) -> bool {
        true
    }

    fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id()
    }

    async fn counts(&self) -> AdapterResult<JobCounts> {
        self.inner.counts().await
    }

    async fn is_paused(&self) -> AdapterResult<bool> {
        self.inner.is_paused().await
    }

    async fn jobs(&self, status: JobStatus, page: Page) -> AdapterResult<JobPage> {
        self.inner.jobs(status, page).await
    }

    async fn job(&self, job_id: &str) -> AdapterResult<JobRecord> {
        self.inner.job(job_id).await
    }

    async fn retry_job(&self, _job_id: &str) -> AdapterResult<()> {
        Err(self.reject(QueueOperation::Retry))
    }

    async fn remove_job(&self, _job_id: &str) -> AdapterResult<()> {
        Err(self.reject(QueueOperation::Remove))
    }

    async fn pause(&self) -> AdapterResult<()> {
        Err(self.reject(QueueOperation::Pause))
    }

    async fn resume(&self) -> AdapterResult<()> {
        Err(self.reject(QueueOperation::Resume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryAdapterFactory;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("memory", 6379, 1)
    }

    #[tokio::test]
    async fn read_only_adapter_rejects_mutations_and_leaves_backend_alone() {
        let factory = InMemoryAdapterFactory::new();
        let descriptor = descriptor();
        factory.seed_job(&descriptor, "emails", JobStatus::Failed, "1");

        let adapter = factory
            .make_adapter("emails", &descriptor, true)
            .expect("adapter");
        assert!(adapter.read_only());

        for result in [
            adapter.remove_job("1").await,
            adapter.retry_job("1").await,
            adapter.pause().await,
            adapter.resume().await,
        ] {
            assert!(matches!(result, Err(AdapterError::ReadOnly { .. })));
        }

        assert_eq!(
            factory.job_status(&descriptor, "emails", "1"),
            Some(JobStatus::Failed)
        );
        assert!(!adapter.is_paused().await.expect("paused flag"));
        assert_eq!(adapter.counts().await.expect("counts").failed, 1);
    }

    #[tokio::test]
    async fn read_write_adapter_applies_mutations() {
        let factory = InMemoryAdapterFactory::new();
        let descriptor = descriptor();
        factory.seed_job(&descriptor, "emails", JobStatus::Failed, "1");

        let adapter = factory
            .make_adapter("emails", &descriptor, false)
            .expect("adapter");
        assert!(!adapter.read_only());

        adapter.retry_job("1").await.expect("retry");
        assert_eq!(
            factory.job_status(&descriptor, "emails", "1"),
            Some(JobStatus::Waiting)
        );

        adapter.remove_job("1").await.expect("remove");
        assert_eq!(factory.job_status(&descriptor, "emails", "1"), None);
    }

    #[test]
    fn read_only_error_reads_as_not_permitted() {
        let err = AdapterError::ReadOnly {
            queue: "emails".into(),
            operation: QueueOperation::Remove,
        };
        assert_eq!(
            err.to_string(),
            "operation not permitted: remove on read-only queue emails"
        );
    }
}
