//! Broker-backed queue transports.
//!
//! The contract lives in `scout_queue::transport`; this module only adds
//! implementations that need network clients.

#[cfg(feature = "redis")]
mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;
