mod tcp;
mod udp;

use futures::future::BoxFuture;

pub use tcp::{TcpConfig, tcp};
pub use udp::{UdpConfig, udp};

/// A listener task, it resolves with `Err(())` when the socket cannot be
/// bound. The error is logged by the listener itself.
pub type Source = BoxFuture<'static, Result<(), ()>>;
