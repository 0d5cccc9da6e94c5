//! Turning a single syslog frame into a `LogRecord`.

mod priority;
mod syslog;

pub use priority::decode_priority;
pub use syslog::normalize;
