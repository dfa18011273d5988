//! Core library for Bullpen.
//!
//! Bullpen serves dashboards over BullMQ queues that live in Redis. This crate
//! holds the pieces that do not depend on the HTTP layer:
//!
//! - [`ConnectionDescriptor`]: the parameters that identify one Redis backend
//! - [`QueueDiscovery`]: enumerates the queue names present in a backend
//! - [`QueueAdapter`]: the uniform inspect/mutate surface over one queue, with
//!   [`BullAdapterFactory`] producing BullMQ-backed adapters
//!
//! The `testing` feature exposes in-memory stand-ins for the Redis-backed
//! pieces so provisioning and HTTP tests can run without a server.

pub mod adapter;
pub mod connection;
pub mod descriptor;
pub mod discovery;
pub mod keys;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{
    AdapterError, AdapterFactory, AdapterResult, QueueAdapter, QueueOperation,
    ReadOnlyAdapter,
    bull::{BullAdapterFactory, BullQueue},
    job::{JobCounts, JobPage, JobRecord, JobStatus, Page},
    tag_read_only,
};
pub use connection::{ConnectionId, LazyConnection};
pub use descriptor::{ConnectionDescriptor, DescriptorError};
pub use discovery::{
    DiscoveryError, KeyScanner, QueueDiscovery, RedisKeyScanner, StoreError,
    queue_names,
};
