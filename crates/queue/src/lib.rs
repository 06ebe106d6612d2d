//! Durable event queue: retries, dead-letter handling, and idempotent
//! consumption (spec component C).

pub mod dispatch;
pub mod event;
pub mod mode;
pub mod queue;
pub mod worker;

pub use dispatch::{EventDispatcher, FakeReplica, NoopReplicaSink, ReplicaSink};
pub use event::{DatabaseEvent, EventKind, ReplicaOp};
pub use mode::DurabilityMode;
pub use queue::{ConsumeReport, DlqEntry, EventQueue, RetryPolicy, DEFAULT_MAX_QUEUE_DEPTH};
pub use worker::QueueWorkerPool;
