mod common;
mod concurrency_test;
mod pipeline_test;
mod pool_test;
mod resilience_test;
