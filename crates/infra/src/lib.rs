//! Infrastructure layer: storage, broker transport, notification delivery,
//! the pipeline stages and the loops that drive them.

pub mod config;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod workers;


pub use config::{ConfigError, Settings, TelegramSettings};
pub use runtime::{Runtime, RuntimeError};
