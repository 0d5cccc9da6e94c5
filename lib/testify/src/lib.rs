//! Helpers for tests that talk to the syslog listeners over real sockets.

mod portpicker;
mod send;
pub mod wait;

pub use portpicker::{next_addr, pick_unused_port};
pub use send::{send_bytes, send_datagrams, send_lines};
