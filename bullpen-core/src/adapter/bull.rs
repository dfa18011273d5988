//! BullMQ-backed queue adapter.
//!
//! Reads go through plain commands and pipelines. Every mutation runs as a
//! single Lua script so workers never observe a half-moved job.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{
    AdapterError, AdapterFactory, AdapterResult, QueueAdapter, QueueOperation,
    job::{JobCounts, JobPage, JobRecord, JobStatus, Page, StateStorage},
    tag_read_only,
};
use crate::{
    connection::{ConnectionId, LazyConnection},
    descriptor::{ConnectionDescriptor, DescriptorError},
    keys::QueueKeys,
};

/// Redis scripts for atomic operations
mod scripts {
    use redis::Script;

    /// Move a failed job back to `wait` (or `paused` while the queue is
    /// paused). Jobs with `opts.priority > 0` go to `prioritized` instead,
    /// scored the way BullMQ 5 scores them. Unless the queue is paused the
    /// marker is set so blocked workers wake up.
    ///
    /// KEYS: job, failed, wait, paused, meta, events, lock, marker,
    /// prioritized, priority counter. ARGV: job id.
    pub fn retry_job() -> Script {
        Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return -1
            end
            if redis.call('EXISTS', KEYS[7]) == 1 then
                return -2
            end
            if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
                return -3
            end

            local paused = redis.call('HEXISTS', KEYS[5], 'paused') == 1
            local priority = 0
            local raw_opts = redis.call('HGET', KEYS[1], 'opts')
            if raw_opts then
                local ok, opts = pcall(cjson.decode, raw_opts)
                if ok and type(opts) == 'table' then
                    priority = tonumber(opts['priority']) or 0
                end
            end

            if priority > 0 then
                local counter = redis.call('INCR', KEYS[10])
                redis.call('ZADD', KEYS[9],
                    priority * 0x100000000 + counter % 0x100000000, ARGV[1])
            elseif paused then
                redis.call('LPUSH', KEYS[4], ARGV[1])
            else
                redis.call('LPUSH', KEYS[3], ARGV[1])
            end
            if not paused then
                redis.call('ZADD', KEYS[8], 0, '0')
            end
            redis.call('HDEL', KEYS[1], 'finishedOn', 'processedOn', 'failedReason', 'returnvalue')
            redis.call('XADD', KEYS[6], 'MAXLEN', '~', 10000, '*',
                'event', 'waiting', 'jobId', ARGV[1], 'prev', 'failed')
            return 1
            "#,
        )
    }

    /// Remove a job from every state key and delete its hash and logs.
    ///
    /// KEYS: job, logs, lock, wait, active, paused, completed, failed,
    /// delayed, prioritized, waiting-children, events. ARGV: job id.
    pub fn remove_job() -> Script {
        Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return -1
            end
            if redis.call('EXISTS', KEYS[3]) == 1 then
                return -2
            end

            for i = 4, 6 do
                redis.call('LREM', KEYS[i], 0, ARGV[1])
            end
            for i = 7, 11 do
                redis.call('ZREM', KEYS[i], ARGV[1])
            end
            redis.call('DEL', KEYS[1], KEYS[2])
            redis.call('XADD', KEYS[12], 'MAXLEN', '~', 10000, '*',
                'event', 'removed', 'jobId', ARGV[1], 'prev', 'unknown')
            return 1
            "#,
        )
    }

    /// Pause or resume. Idempotent: returns 0 when already in that state.
    ///
    /// KEYS: wait, paused, meta, events. ARGV: 'paused' | 'resumed'.
    pub fn pause_queue() -> Script {
        Script::new(
            r#"
            local paused = redis.call('HEXISTS', KEYS[3], 'paused') == 1
            if ARGV[1] == 'paused' then
                if paused then
                    return 0
                end
                if redis.call('EXISTS', KEYS[1]) == 1 then
                    redis.call('RENAME', KEYS[1], KEYS[2])
                end
                redis.call('HSET', KEYS[3], 'paused', 1)
            else
                if not paused then
                    return 0
                end
                if redis.call('EXISTS', KEYS[2]) == 1 then
                    redis.call('RENAME', KEYS[2], KEYS[1])
                end
                redis.call('HDEL', KEYS[3], 'paused')
            end
            redis.call('XADD', KEYS[4], 'MAXLEN', '~', 10000, '*', 'event', ARGV[1])
            return 1
            "#,
        )
    }

    /// Locate a job id. Returns the 1-based index of the first key holding
    /// it, or 0.
    ///
    /// KEYS: five sorted sets followed by three lists.
    pub fn job_state() -> Script {
        Script::new(
            r#"
            for i = 1, 5 do
                if redis.call('ZSCORE', KEYS[i], ARGV[1]) then
                    return i
                end
            end
            for i = 6, 8 do
                if redis.call('LPOS', KEYS[i], ARGV[1]) then
                    return i
                end
            end
            return 0
            "#,
        )
    }
}

/// Search order for [`scripts::job_state`]: sorted sets first, then lists.
const STATE_SEARCH_ORDER: [JobStatus; 8] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Delayed,
    JobStatus::Prioritized,
    JobStatus::WaitingChildren,
    JobStatus::Active,
    JobStatus::Waiting,
    JobStatus::Paused,
];

/// Key suffixes under a queue that never name a job.
const RESERVED_SUFFIXES: [&str; 9] = [
    "meta",
    "events",
    "id",
    "marker",
    "pc",
    "stalled",
    "stalled-check",
    "limiter",
    "repeat",
];

/// One BullMQ queue in one Redis database.
#[derive(Debug)]
pub struct BullQueue {
    name: String,
    keys: QueueKeys,
    connection: LazyConnection,
}

impl BullQueue {
    /// Adapter for `name` over `connection`.
    pub fn new(name: impl Into<String>, connection: LazyConnection) -> Self {
        let name = name.into();
        Self {
            keys: QueueKeys::new(&name),
            name,
            connection,
        }
    }

    async fn conn(&self) -> AdapterResult<ConnectionManager> {
        self.connection.get().await
    }

    fn not_found(&self, job_id: &str) -> AdapterError {
        AdapterError::JobNotFound {
            queue: self.name.clone(),
            job_id: job_id.to_string(),
        }
    }

    /// Refuse ids that would address a non-job key under the queue prefix.
    fn checked_job_id<'a>(&self, job_id: &'a str) -> AdapterResult<&'a str> {
        let reserved = RESERVED_SUFFIXES.contains(&job_id)
            || JobStatus::ALL
                .into_iter()
                .any(|status| status.key_suffix() == job_id);
        if job_id.is_empty() || job_id.contains(':') || reserved {
            return Err(self.not_found(job_id));
        }
        Ok(job_id)
    }

    fn script_outcome(
        &self,
        code: i64,
        job_id: &str,
        operation: QueueOperation,
    ) -> AdapterResult<()> {
        let reason = match code {
            1 => return Ok(()),
            -1 => return Err(self.not_found(job_id)),
            -2 => "job is locked by a worker".to_string(),
            -3 => "job is not in the failed state".to_string(),
            other => format!("unexpected script result {other}"),
        };
        Err(AdapterError::InvalidState {
            queue: self.name.clone(),
            job_id: job_id.to_string(),
            operation,
            reason,
        })
    }

    async fn load_jobs(
        &self,
        conn: &mut ConnectionManager,
        ids: &[String],
        status: JobStatus,
    ) -> AdapterResult<Vec<JobRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGETALL").arg(self.keys.job(id));
        }
        let hashes: Vec<HashMap<String, String>> =
            pipe.query_async(conn).await?;

        // Ids whose hash vanished between the two round trips were removed
        // concurrently; skip them rather than render empty jobs.
        Ok(ids
            .iter()
            .zip(hashes)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| {
                JobRecord::from_hash(id.clone(), Some(status), &fields)
            })
            .collect())
    }

    async fn state_of(
        &self,
        conn: &mut ConnectionManager,
        job_id: &str,
    ) -> AdapterResult<Option<JobStatus>> {
        let script = scripts::job_state();
        let mut invocation = script.prepare_invoke();
        for status in STATE_SEARCH_ORDER {
            invocation.key(self.keys.state(status));
        }
        invocation.arg(job_id);
        let index: usize = invocation.invoke_async(conn).await?;

        Ok(index
            .checked_sub(1)
            .and_then(|slot| STATE_SEARCH_ORDER.get(slot).copied()))
    }

    async fn set_paused(&self, paused: bool) -> AdapterResult<()> {
        let mut conn = self.conn().await?;
        let script = scripts::pause_queue();
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.keys.state(JobStatus::Waiting))
            .key(self.keys.state(JobStatus::Paused))
            .key(self.keys.meta())
            .key(self.keys.events())
            .arg(if paused { "paused" } else { "resumed" });
        let changed: i64 = invocation.invoke_async(&mut conn).await?;

        tracing::info!(
            queue = %self.name,
            paused,
            changed = changed == 1,
            "queue pause state updated"
        );
        Ok(())
    }
}

#[async_trait]
impl QueueAdapter for BullQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_only(&self) -> bool {
        false
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    async fn counts(&self) -> AdapterResult<JobCounts> {
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        for status in JobStatus::ALL {
            let command = match status.storage() {
                StateStorage::List => "LLEN",
                StateStorage::SortedSet { .. } => "ZCARD",
            };
            pipe.cmd(command).arg(self.keys.state(status));
        }
        let values: Vec<u64> = pipe.query_async(&mut conn).await?;

        Ok(JobCounts::from_pairs(JobStatus::ALL.into_iter().zip(values)))
    }

    async fn is_paused(&self) -> AdapterResult<bool> {
        let mut conn = self.conn().await?;
        let paused: bool = redis::cmd("HEXISTS")
            .arg(self.keys.meta())
            .arg("paused")
            .query_async(&mut conn)
            .await?;
        Ok(paused)
    }

    async fn jobs(&self, status: JobStatus, page: Page) -> AdapterResult<JobPage> {
        let mut conn = self.conn().await?;
        let key = self.keys.state(status);
        let (start, stop) = page.bounds();

        let mut pipe = redis::pipe();
        match status.storage() {
            StateStorage::List => {
                pipe.cmd("LRANGE").arg(&key).arg(start).arg(stop);
                pipe.cmd("LLEN").arg(&key);
            }
            StateStorage::SortedSet { newest_first } => {
                let range = if newest_first { "ZREVRANGE" } else { "ZRANGE" };
                pipe.cmd(range).arg(&key).arg(start).arg(stop);
                pipe.cmd("ZCARD").arg(&key);
            }
        }
        let (ids, total): (Vec<String>, u64) =
            pipe.query_async(&mut conn).await?;

        let jobs = self.load_jobs(&mut conn, &ids, status).await?;

        Ok(JobPage {
            status,
            page: page.number(),
            page_size: page.size(),
            total,
            jobs,
        })
    }

    async fn job(&self, job_id: &str) -> AdapterResult<JobRecord> {
        let job_id = self.checked_job_id(job_id)?;
        let mut conn = self.conn().await?;

        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.keys.job(job_id))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Err(self.not_found(job_id));
        }

        let status = self.state_of(&mut conn, job_id).await?;
        Ok(JobRecord::from_hash(job_id, status, &fields))
    }

    async fn retry_job(&self, job_id: &str) -> AdapterResult<()> {
        let job_id = self.checked_job_id(job_id)?;
        let mut conn = self.conn().await?;

        let script = scripts::retry_job();
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.keys.job(job_id))
            .key(self.keys.state(JobStatus::Failed))
            .key(self.keys.state(JobStatus::Waiting))
            .key(self.keys.state(JobStatus::Paused))
            .key(self.keys.meta())
            .key(self.keys.events())
            .key(self.keys.lock(job_id))
            .key(self.keys.marker())
            .key(self.keys.state(JobStatus::Prioritized))
            .key(self.keys.priority_counter())
            .arg(job_id);
        let code: i64 = invocation.invoke_async(&mut conn).await?;

        self.script_outcome(code, job_id, QueueOperation::Retry)?;
        tracing::info!(queue = %self.name, job_id, "job moved back to waiting");
        Ok(())
    }

    async fn remove_job(&self, job_id: &str) -> AdapterResult<()> {
        let job_id = self.checked_job_id(job_id)?;
        let mut conn = self.conn().await?;

        let script = scripts::remove_job();
        let mut invocation = script.prepare_invoke();
        invocation
            .key(self.keys.job(job_id))
            .key(self.keys.logs(job_id))
            .key(self.keys.lock(job_id));
        for status in [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Delayed,
            JobStatus::Prioritized,
            JobStatus::WaitingChildren,
        ] {
            invocation.key(self.keys.state(status));
        }
        invocation.key(self.keys.events()).arg(job_id);
        let code: i64 = invocation.invoke_async(&mut conn).await?;

        self.script_outcome(code, job_id, QueueOperation::Remove)?;
        tracing::info!(queue = %self.name, job_id, "job removed");
        Ok(())
    }

    async fn pause(&self) -> AdapterResult<()> {
        self.set_paused(true).await
    }

    async fn resume(&self) -> AdapterResult<()> {
        self.set_paused(false).await
    }
}

/// Builds [`BullQueue`] adapters, one lazily connected Redis connection each.
#[derive(Debug, Clone)]
pub struct BullAdapterFactory {
    connect_timeout: Duration,
}

impl BullAdapterFactory {
    /// Connect timeout used by [`BullAdapterFactory::default`].
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Factory whose adapters give up connecting after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for BullAdapterFactory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CONNECT_TIMEOUT)
    }
}

impl AdapterFactory for BullAdapterFactory {
    fn make_adapter(
        &self,
        queue: &str,
        descriptor: &ConnectionDescriptor,
        read_only: bool,
    ) -> Result<Arc<dyn QueueAdapter>, DescriptorError> {
        let client = descriptor.client()?;
        let connection = LazyConnection::new(client, self.connect_timeout);
        Ok(tag_read_only(BullQueue::new(queue, connection), read_only))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("127.0.0.1", 1, 0)
    }

    #[test]
    fn factory_builds_adapters_without_connecting() {
        let factory = BullAdapterFactory::new(Duration::from_millis(50));
        let descriptor = unreachable_descriptor();

        let first = factory
            .make_adapter("emails", &descriptor, false)
            .expect("adapter");
        let second = factory
            .make_adapter("emails", &descriptor, true)
            .expect("adapter");

        assert_eq!(first.name(), "emails");
        assert!(!first.read_only());
        assert!(second.read_only());
        assert_ne!(first.connection_id(), second.connection_id());
    }

    #[test]
    fn factory_rejects_invalid_descriptor() {
        let factory = BullAdapterFactory::default();
        let descriptor = ConnectionDescriptor::new("", 6379, 0);
        assert!(factory.make_adapter("emails", &descriptor, false).is_err());
    }

    #[tokio::test]
    async fn operations_on_unreachable_backend_surface_at_use_time() {
        let factory = BullAdapterFactory::new(Duration::from_millis(200));
        let adapter = factory
            .make_adapter("emails", &unreachable_descriptor(), false)
            .expect("adapter");

        let err = adapter.counts().await.expect_err("backend is down");
        assert!(matches!(err, AdapterError::Unavailable(_)));
    }

    #[test]
    fn job_ids_cannot_escape_the_job_namespace() {
        let client =
            redis::Client::open("redis://127.0.0.1:1/0").expect("valid url");
        let queue = BullQueue::new(
            "emails",
            LazyConnection::new(client, Duration::from_millis(10)),
        );

        assert!(queue.checked_job_id("42").is_ok());
        for bad in ["", "meta", "wait", "42:logs", "events", "marker", "pc"] {
            assert!(
                matches!(
                    queue.checked_job_id(bad),
                    Err(AdapterError::JobNotFound { .. })
                ),
                "{bad:?} should be refused"
            );
        }
    }

    #[test]
    fn script_codes_map_to_errors() {
        let client =
            redis::Client::open("redis://127.0.0.1:1/0").expect("valid url");
        let queue = BullQueue::new(
            "emails",
            LazyConnection::new(client, Duration::from_millis(10)),
        );

        assert!(queue.script_outcome(1, "1", QueueOperation::Retry).is_ok());
        assert!(matches!(
            queue.script_outcome(-1, "1", QueueOperation::Retry),
            Err(AdapterError::JobNotFound { .. })
        ));
        assert!(matches!(
            queue.script_outcome(-2, "1", QueueOperation::Remove),
            Err(AdapterError::InvalidState { .. })
        ));
    }
}
