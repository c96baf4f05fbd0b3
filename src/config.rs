//! Deserializable configuration for the toolkit's components.
//!
//! Every config struct derives serde with per-field defaults and exposes a
//! `validate` method, so a whole toolkit configuration can be loaded from a
//! file or environment, validated once at startup, and then handed to the
//! component constructors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorKind, TaskError};
use crate::retry::RetryPolicy;
use crate::task_error;

/// Validation errors for toolkit configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Concurrency limits and worker counts cannot be zero.
    #[error("`{0}` cannot be zero")]
    ZeroNotAllowed(&'static str),
    /// Rates must be positive and finite.
    #[error("`{0}` must be a positive, finite number")]
    NonPositiveRate(&'static str),
    /// Durations that drive timers must be positive.
    #[error("`{0}` must be greater than zero milliseconds")]
    ZeroDuration(&'static str),
    /// Fractions must stay within `[0, 1]`.
    #[error("`{0}` must be within [0, 1]")]
    FractionOutOfRange(&'static str),
}

impl From<ValidationError> for TaskError {
    fn from(err: ValidationError) -> Self {
        task_error!(ErrorKind::ConfigError, "invalid configuration", source: err)
    }
}

/// Configuration for [`crate::executor::BoundedExecutor`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Maximum number of tasks running at any instant.
    #[serde(default = "default_executor_limit")]
    pub limit: usize,
}

impl ExecutorConfig {
    /// Default concurrency limit.
    pub const DEFAULT_LIMIT: usize = 8;

    /// Ensures the concurrency limit is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limit == 0 {
            return Err(ValidationError::ZeroNotAllowed("executor.limit"));
        }

        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            limit: default_executor_limit(),
        }
    }
}

fn default_executor_limit() -> usize {
    ExecutorConfig::DEFAULT_LIMIT
}

/// Configuration for [`crate::limiter::RateLimiter`] and
/// [`crate::limiter::KeyedRateLimiter`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Sustained rate in permits per second.
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,
    /// Number of permits that may be consumed in a burst.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl RateLimitConfig {
    /// Default sustained rate.
    pub const DEFAULT_RATE_PER_SECOND: f64 = 10.0;

    /// Default burst size.
    pub const DEFAULT_BURST: u32 = 5;

    /// Ensures the rate is positive and finite and the burst is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.rate_per_second.is_finite() && self.rate_per_second > 0.0) {
            return Err(ValidationError::NonPositiveRate(
                "rate_limit.rate_per_second",
            ));
        }
        if self.burst == 0 {
            return Err(ValidationError::ZeroNotAllowed("rate_limit.burst"));
        }

        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_per_second: default_rate_per_second(),
            burst: default_burst(),
        }
    }
}

fn default_rate_per_second() -> f64 {
    RateLimitConfig::DEFAULT_RATE_PER_SECOND
}

fn default_burst() -> u32 {
    RateLimitConfig::DEFAULT_BURST
}

/// Configuration for [`RetryPolicy`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of invocations of the retried operation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds, doubled after each failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling applied to the doubling delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of each delay added as random jitter.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl RetryConfig {
    /// Default maximum number of attempts.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    /// Default initial backoff delay in milliseconds.
    pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

    /// Ensures the attempt count, delays and jitter fraction are in range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::ZeroNotAllowed("retry.max_attempts"));
        }
        if self.base_delay_ms == 0 {
            return Err(ValidationError::ZeroDuration("retry.base_delay_ms"));
        }
        if self.max_delay_ms == 0 {
            return Err(ValidationError::ZeroDuration("retry.max_delay_ms"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ValidationError::FractionOutOfRange("retry.jitter"));
        }

        Ok(())
    }

    /// Converts a validated config into a [`RetryPolicy`].
    pub fn into_policy(self) -> Result<RetryPolicy, TaskError> {
        self.validate()?;

        Ok(
            RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))?
                .with_max_delay(Duration::from_millis(self.max_delay_ms))
                .with_jitter(self.jitter),
        )
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    RetryConfig::DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryPolicy::DEFAULT_MAX_DELAY.as_millis() as u64
}

fn default_jitter() -> f64 {
    RetryPolicy::DEFAULT_JITTER
}

/// Configuration for [`crate::pipeline::PipelineStage`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Number of parallel transform workers per stage.
    #[serde(default = "default_stage_workers")]
    pub workers: usize,
    /// Bounded buffer between stages; 0 requests synchronous hand-off.
    #[serde(default = "default_stage_buffer")]
    pub buffer: usize,
}

impl PipelineConfig {
    /// Default number of stage workers.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Default inter-stage buffer size.
    pub const DEFAULT_BUFFER: usize = 16;

    /// Ensures the worker count is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::ZeroNotAllowed("pipeline.workers"));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_stage_workers(),
            buffer: default_stage_buffer(),
        }
    }
}

fn default_stage_workers() -> usize {
    PipelineConfig::DEFAULT_WORKERS
}

fn default_stage_buffer() -> usize {
    PipelineConfig::DEFAULT_BUFFER
}

/// Configuration for [`crate::pool::WorkerPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Number of pool workers.
    #[serde(default = "default_pool_workers")]
    pub workers: usize,
    /// Capacity of the bounded job queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl PoolConfig {
    /// Default number of pool workers.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Default job queue capacity.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

    /// Ensures the worker count and queue capacity are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::ZeroNotAllowed("pool.workers"));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::ZeroNotAllowed("pool.queue_capacity"));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_pool_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_pool_workers() -> usize {
    PoolConfig::DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    PoolConfig::DEFAULT_QUEUE_CAPACITY
}
