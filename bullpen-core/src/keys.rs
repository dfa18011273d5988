//! BullMQ key naming.
//!
//! Every key a queue owns lives under `bull:<queue>:`. Discovery relies on the
//! queue name being the second colon-delimited segment.

use crate::adapter::job::JobStatus;

/// Prefix BullMQ uses for every key it writes.
pub const QUEUE_PREFIX: &str = "bull";

/// `SCAN MATCH` pattern that selects every queue key.
pub fn queue_scan_pattern() -> String {
    format!("{QUEUE_PREFIX}:*")
}

/// Extract the queue name from a BullMQ key.
///
/// Returns `None` for keys outside the prefix and for keys whose name
/// segment is missing or empty.
pub fn queue_name_from_key(key: &str) -> Option<&str> {
    let mut segments = key.split(':');
    if segments.next()? != QUEUE_PREFIX {
        return None;
    }
    segments.next().filter(|name| !name.is_empty())
}

/// Key builder for a single queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    base: String,
}

impl QueueKeys {
    /// Keys for `queue` under the BullMQ prefix.
    pub fn new(queue: &str) -> Self {
        Self {
            base: format!("{QUEUE_PREFIX}:{queue}"),
        }
    }

    /// List or sorted set holding job ids in `status`.
    pub fn state(&self, status: JobStatus) -> String {
        format!("{}:{}", self.base, status.key_suffix())
    }

    /// Queue metadata hash (`paused`, concurrency, ...).
    pub fn meta(&self) -> String {
        format!("{}:meta", self.base)
    }

    /// Sorted set idle workers block on; a member means work is ready.
    pub fn marker(&self) -> String {
        format!("{}:marker", self.base)
    }

    /// Counter that orders jobs of equal priority.
    pub fn priority_counter(&self) -> String {
        format!("{}:pc", self.base)
    }

    /// Event stream consumed by BullMQ `QueueEvents`.
    pub fn events(&self) -> String {
        format!("{}:events", self.base)
    }

    /// Job hash.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:{job_id}", self.base)
    }

    /// Job log list.
    pub fn logs(&self, job_id: &str) -> String {
        format!("{}:{job_id}:logs", self.base)
    }

    /// Worker lock held while a job is active.
    pub fn lock(&self, job_id: &str) -> String {
        format!("{}:{job_id}:lock", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_second_segment() {
        assert_eq!(queue_name_from_key("bull:emails:1"), Some("emails"));
        assert_eq!(queue_name_from_key("bull:emails:wait"), Some("emails"));
        assert_eq!(queue_name_from_key("bull:emails"), Some("emails"));
        assert_eq!(queue_name_from_key("bull::1"), None);
        assert_eq!(queue_name_from_key("bull"), None);
        assert_eq!(queue_name_from_key("other:emails:1"), None);
        assert_eq!(queue_name_from_key("bullish:emails:1"), None);
    }

    #[test]
    fn keys_follow_bullmq_layout() {
        let keys = QueueKeys::new("reports");
        assert_eq!(keys.state(JobStatus::Waiting), "bull:reports:wait");
        assert_eq!(
            keys.state(JobStatus::WaitingChildren),
            "bull:reports:waiting-children"
        );
        assert_eq!(keys.meta(), "bull:reports:meta");
        assert_eq!(keys.marker(), "bull:reports:marker");
        assert_eq!(keys.priority_counter(), "bull:reports:pc");
        assert_eq!(keys.job("42"), "bull:reports:42");
        assert_eq!(keys.logs("42"), "bull:reports:42:logs");
        assert_eq!(keys.lock("42"), "bull:reports:42:lock");
        assert_eq!(queue_scan_pattern(), "bull:*");
    }
}
