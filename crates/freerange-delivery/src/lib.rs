//! Delivery pipeline for FreeRangeNotify.
//!
//! Everything between an admitted notification document and a provider
//! acknowledgement lives here: the priority/delayed/retry/dead-letter
//! queues, the distributed limiter, the presence registry, the
//! channel-specific providers and their manager, the worker pool that
//! drives them, the scheduler that promotes due work, and the real-time
//! broadcaster.

pub mod backoff;
pub mod broadcaster;
pub mod error;
pub mod limiter;
pub mod manager;
pub mod presence;
pub mod providers;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use broadcaster::Broadcaster;
pub use error::{QueueError, QueueResult};
pub use limiter::{MemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use manager::ProviderManager;
pub use presence::{MemoryPresenceRegistry, PresenceRegistry, RedisPresenceRegistry};
pub use providers::{Provider, ProviderErrorKind, ProviderResponse};
pub use queue::{DeadLetterEntry, MemoryQueue, NotificationQueue, QueueDepth, RedisQueue};
pub use scheduler::Scheduler;
pub use worker::WorkerPool;
