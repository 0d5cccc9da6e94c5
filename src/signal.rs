use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Control messages used to drive the shutdown of the service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalTo {
    /// Stop accepting input, drain what is queued, then exit.
    Shutdown,
    /// Exit immediately, queued records are lost.
    Quit,
}

pub struct Signals {
    sigint: Signal,
    sigterm: Signal,
    sigquit: Signal,
}

impl Stream for Signals {
    type Item = SignalTo;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.sigint.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGINT");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigterm.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGTERM");
            return Poll::Ready(Some(SignalTo::Shutdown));
        }

        if this.sigquit.poll_recv(cx).is_ready() {
            info!(message = "Signal received", signal = "SIGQUIT");
            return Poll::Ready(Some(SignalTo::Quit));
        }

        Poll::Pending
    }
}

/// Signals from OS/user
pub fn os_signals() -> std::io::Result<Signals> {
    let sigint = signal(SignalKind::interrupt())?;
    let sigterm = signal(SignalKind::terminate())?;
    let sigquit = signal(SignalKind::quit())?;

    Ok(Signals {
        sigint,
        sigterm,
        sigquit,
    })
}
