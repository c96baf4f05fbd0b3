pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod group;
pub mod guard;
pub mod limiter;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod shutdown;
pub mod singleflight;
pub mod token;
pub mod transport;

pub use crate::error::{ErrorKind, TaskError, TaskResult};
pub use crate::executor::BoundedExecutor;
pub use crate::group::TaskGroup;
pub use crate::guard::PanicGuard;
pub use crate::limiter::{KeyedRateLimiter, RateLimiter};
pub use crate::pipeline::PipelineStage;
pub use crate::pool::{PoolJob, PoolState, WorkerPool};
pub use crate::retry::RetryPolicy;
pub use crate::singleflight::SingleFlight;
pub use crate::token::{CancelCause, CancellationToken};
