//! Tracing/logging setup shared by every scout process.

pub mod logging;

pub use logging::LogFormat;

/// Initialize process-wide logging, format taken from `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(LogFormat::from_env());
}
