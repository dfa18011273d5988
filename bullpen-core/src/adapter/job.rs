//! Job and queue state types shared by every adapter.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State a job can be in, named after the BullMQ key that holds it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Ready to be picked up (`wait` list).
    Waiting,
    /// Locked by a worker.
    Active,
    /// Waiting while the queue is paused.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with an error after exhausting attempts.
    Failed,
    /// Scheduled for later.
    Delayed,
    /// Waiting with an explicit priority.
    Prioritized,
    /// Parent job waiting on its children.
    WaitingChildren,
}

/// How a state's job ids are stored in Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateStorage {
    /// Plain list, newest id at the head.
    List,
    /// Sorted set; `newest_first` reads in descending score order.
    SortedSet {
        /// Read with `ZREVRANGE` instead of `ZRANGE`.
        newest_first: bool,
    },
}

impl JobStatus {
    /// Every state, in display order.
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Active,
        JobStatus::Waiting,
        JobStatus::WaitingChildren,
        JobStatus::Prioritized,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Delayed,
        JobStatus::Paused,
    ];

    /// Suffix of the Redis key holding this state.
    pub fn key_suffix(self) -> &'static str {
        match self {
            JobStatus::Waiting => "wait",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Delayed => "delayed",
            JobStatus::Prioritized => "prioritized",
            JobStatus::WaitingChildren => "waiting-children",
        }
    }

    /// Storage shape of the state key.
    pub fn storage(self) -> StateStorage {
        match self {
            JobStatus::Waiting | JobStatus::Active | JobStatus::Paused => {
                StateStorage::List
            }
            JobStatus::Completed | JobStatus::Failed => {
                StateStorage::SortedSet { newest_first: true }
            }
            JobStatus::Delayed
            | JobStatus::Prioritized
            | JobStatus::WaitingChildren => {
                StateStorage::SortedSet {
                    newest_first: false,
                }
            }
        }
    }

    /// Name used on the HTTP surface.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            other => other.key_suffix(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised job state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownJobStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "waiting" | "wait" => Ok(JobStatus::Waiting),
            "waiting-children" | "waiting_children" => {
                Ok(JobStatus::WaitingChildren)
            }
            other => JobStatus::ALL
                .into_iter()
                .find(|status| status.key_suffix() == other)
                .ok_or_else(|| UnknownJobStatus(raw.to_string())),
        }
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// `LLEN active`.
    pub active: u64,
    /// `LLEN wait`.
    pub waiting: u64,
    /// `ZCARD waiting-children`.
    pub waiting_children: u64,
    /// `ZCARD prioritized`.
    pub prioritized: u64,
    /// `ZCARD completed`.
    pub completed: u64,
    /// `ZCARD failed`.
    pub failed: u64,
    /// `ZCARD delayed`.
    pub delayed: u64,
    /// `LLEN paused`.
    pub paused: u64,
}

impl JobCounts {
    /// Build from `(state, count)` pairs; unknown pairs are impossible by type.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (JobStatus, u64)>) -> Self {
        let mut counts = Self::default();
        for (status, count) in pairs {
            *counts.slot_mut(status) = count;
        }
        counts
    }

    /// Count for one state.
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Active => self.active,
            JobStatus::Waiting => self.waiting,
            JobStatus::WaitingChildren => self.waiting_children,
            JobStatus::Prioritized => self.prioritized,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Delayed => self.delayed,
            JobStatus::Paused => self.paused,
        }
    }

    /// Sum over every state.
    pub fn total(&self) -> u64 {
        JobStatus::ALL.into_iter().map(|status| self.get(status)).sum()
    }

    fn slot_mut(&mut self, status: JobStatus) -> &mut u64 {
        match status {
            JobStatus::Active => &mut self.active,
            JobStatus::Waiting => &mut self.waiting,
            JobStatus::WaitingChildren => &mut self.waiting_children,
            JobStatus::Prioritized => &mut self.prioritized,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Delayed => &mut self.delayed,
            JobStatus::Paused => &mut self.paused,
        }
    }
}

/// One page of a state listing, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: u32,
    size: u32,
}

impl Page {
    /// Page size used when the caller does not ask for one.
    pub const DEFAULT_SIZE: u32 = 20;
    /// Upper bound on page size.
    pub const MAX_SIZE: u32 = 100;

    /// Page `number` (clamped to at least 1) of `size` jobs (clamped to
    /// `1..=MAX_SIZE`).
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    /// 1-based page number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Jobs per page.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Zero-based offset of the first job on the page.
    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.size as usize
    }

    /// Inclusive `(start, stop)` index pair for `LRANGE`/`ZRANGE`.
    pub fn bounds(&self) -> (isize, isize) {
        let start = self.offset() as isize;
        (start, start + self.size as isize - 1)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_SIZE)
    }
}

/// Jobs returned for one state and page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    /// State that was listed.
    pub status: JobStatus,
    /// 1-based page number.
    pub page: u32,
    /// Requested page size; the last page may hold fewer jobs.
    pub page_size: u32,
    /// Jobs in the state overall, not just on this page.
    pub total: u64,
    /// Jobs on this page whose hash still existed when read.
    pub jobs: Vec<JobRecord>,
}

/// A job as stored in its BullMQ hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Job id, the last segment of the hash key.
    pub id: String,
    /// Job name given by the producer.
    pub name: String,
    /// State key holding the id; `None` when it sits in none of them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    /// Payload.
    pub data: Value,
    /// Options the job was added with (`priority`, `attempts`, ...).
    pub opts: Value,
    /// Last reported progress.
    pub progress: Value,
    /// Attempts started so far.
    pub attempts_made: u32,
    /// Creation time, epoch milliseconds.
    pub timestamp: Option<i64>,
    /// Time a worker last picked it up, epoch milliseconds.
    pub processed_on: Option<i64>,
    /// Time it completed or failed, epoch milliseconds.
    pub finished_on: Option<i64>,
    /// Error message of the last failure.
    pub failed_reason: Option<String>,
    /// Stack traces of failed attempts, oldest first.
    pub stacktrace: Vec<String>,
    /// Value returned by the processor.
    pub return_value: Value,
}

impl JobRecord {
    /// Minimal record used by in-memory adapters and tests.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: None,
            data: Value::Null,
            opts: Value::Null,
            progress: Value::Null,
            attempts_made: 0,
            timestamp: None,
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            stacktrace: Vec::new(),
            return_value: Value::Null,
        }
    }

    /// Decode the fields of a BullMQ job hash.
    ///
    /// JSON-encoded fields that fail to parse are kept as raw strings.
    pub fn from_hash(
        id: impl Into<String>,
        status: Option<JobStatus>,
        fields: &HashMap<String, String>,
    ) -> Self {
        let int = |name: &str| {
            fields.get(name).and_then(|raw| raw.trim().parse::<i64>().ok())
        };

        let attempts_made = fields
            .get("attemptsMade")
            .or_else(|| fields.get("atm"))
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(0);

        let stacktrace = match json_field(fields.get("stacktrace")) {
            Value::Array(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    Value::String(line) => line,
                    other => other.to_string(),
                })
                .collect(),
            Value::Null => Vec::new(),
            Value::String(line) => vec![line],
            other => vec![other.to_string()],
        };

        Self {
            id: id.into(),
            name: fields.get("name").cloned().unwrap_or_default(),
            status,
            data: json_field(fields.get("data")),
            opts: json_field(fields.get("opts")),
            progress: json_field(fields.get("progress")),
            attempts_made,
            timestamp: int("timestamp"),
            processed_on: int("processedOn"),
            finished_on: int("finishedOn"),
            failed_reason: fields
                .get("failedReason")
                .filter(|reason| !reason.is_empty())
                .cloned(),
            stacktrace,
            return_value: json_field(fields.get("returnvalue")),
        }
    }
}

fn json_field(raw: Option<&String>) -> Value {
    match raw {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw)
            .unwrap_or_else(|_| Value::String(raw.clone())),
    }
}
