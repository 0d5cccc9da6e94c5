use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tripwire::{Trigger, Tripwire};

/// Passed to every listener and connection, resolves once the global
/// shutdown has begun.
#[derive(Clone)]
pub struct ShutdownSignal {
    begin: Tripwire,
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.begin).poll(cx)
    }
}

impl ShutdownSignal {
    /// Returns the trigger which starts the shutdown, and the signal to
    /// hand out. Dropping the trigger starts the shutdown as well.
    pub fn new_wired() -> (Trigger, ShutdownSignal) {
        let (trigger, begin) = Tripwire::new();

        (trigger, ShutdownSignal { begin })
    }
}
