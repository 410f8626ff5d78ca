//! Long-running consumer loops for the asynchronous stages.

mod consumer;

pub use consumer::{ConsumerConfig, ConsumerPool, PoolHandle, PoolStats};
