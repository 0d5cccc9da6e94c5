//! A one-shot, cloneable future that resolves once its `Trigger` is
//! cancelled or dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

struct Shared {
    closed: AtomicBool,

    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn wakers(&self) -> MutexGuard<'_, HashMap<u64, Waker>> {
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.wakers().drain().for_each(|(_id, waker)| waker.wake());
    }
}

/// The owning half, resolves every associated `Tripwire` when cancelled.
pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Cancel all associated tripwires, make them immediately resolved.
    pub fn cancel(self) {
        // drop closes and wakes
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake_all();
    }
}

/// Resolves when the paired `Trigger` is cancelled or dropped.
pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        let shared = Arc::clone(&self.shared);
        let id = shared.next_id();

        Self { shared, id }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared.wakers().remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.closed() {
            return Poll::Ready(());
        }

        self.shared.wakers().insert(self.id, cx.waker().clone());

        // the trigger might be dropped between the check and the insert
        if self.closed() {
            self.shared.wakers().remove(&self.id);
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

impl Tripwire {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            wakers: Mutex::new(HashMap::new()),
        });

        (
            Trigger {
                shared: Arc::clone(&shared),
            },
            Tripwire {
                id: shared.next_id(),
                shared,
            },
        )
    }

    /// Returns true once the trigger is cancelled or dropped.
    pub fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    macro_rules! assert_pending {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_pending());
        };
    }

    macro_rules! assert_ready {
        ($var:expr) => {
            assert!(futures::poll!(&mut $var).is_ready());
        };
    }

    #[tokio::test]
    async fn drop_resolves() {
        let (trigger, mut tripwire) = Tripwire::new();
        assert_pending!(tripwire);
        drop(trigger);
        assert_ready!(tripwire);
        assert_ready!(tripwire);
    }

    #[tokio::test]
    async fn cancel_resolves() {
        let (trigger, mut tripwire) = Tripwire::new();
        assert_pending!(tripwire);
        assert!(!tripwire.closed());

        trigger.cancel();

        assert!(tripwire.closed());
        assert_ready!(tripwire);
    }

    #[tokio::test]
    async fn clones_resolve_together() {
        let (trigger, mut first) = Tripwire::new();
        assert_pending!(first);
        let mut second = first.clone();
        assert_pending!(second);

        trigger.cancel();

        assert!(first.shared.wakers().is_empty());
        assert_ready!(first);
        assert_ready!(second);
    }

    #[tokio::test]
    async fn clone_after_cancel_is_ready() {
        let (trigger, tripwire) = Tripwire::new();
        trigger.cancel();

        let mut late = tripwire.clone();
        assert_ready!(late);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn take_until_cancel() {
        let (trigger, tripwire) = Tripwire::new();

        let (tx, rx) = tokio::sync::mpsc::channel::<i32>(1);
        let mut stream = ReceiverStream::new(rx).take_until(tripwire);

        tx.send(1).await.unwrap();
        assert_eq!(stream.next().await, Some(1));

        trigger.cancel();
        assert!(tx.send(2).await.is_ok());
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_waiting_task() {
        let (trigger, tripwire) = Tripwire::new();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), tripwire)
            .await
            .unwrap();
    }
}
