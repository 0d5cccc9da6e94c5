use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::sleep;

const WAIT_FOR_SECS: u64 = 5;
const WAIT_FOR_MIN_MILLIS: u64 = 5;
const WAIT_FOR_MAX_MILLIS: u64 = 500;

/// Polls `f` until it returns true, panics once `duration` has passed.
pub async fn wait_for_duration<F>(mut f: F, duration: Duration)
where
    F: AsyncFnMut() -> bool,
{
    let started = Instant::now();
    let mut delay = WAIT_FOR_MIN_MILLIS;

    while !f().await {
        sleep(Duration::from_millis(delay)).await;

        if started.elapsed() > duration {
            panic!("Timed out while waiting");
        }

        // quadratic backoff up to a maximum delay
        delay = (2 * delay).min(WAIT_FOR_MAX_MILLIS);
    }
}

/// Polls `f` for up to 5 seconds.
pub async fn wait_for<F>(f: F)
where
    F: AsyncFnMut() -> bool,
{
    wait_for_duration(f, Duration::from_secs(WAIT_FOR_SECS)).await
}

/// Waits until a TCP listener accepts connections on `addr`.
pub async fn wait_for_tcp(addr: SocketAddr) {
    let timeout = Duration::from_secs(10);
    let start = Instant::now();

    loop {
        if let Ok(Ok(_conn)) =
            tokio::time::timeout(Duration::from_millis(500), TcpStream::connect(addr)).await
        {
            break;
        }

        if start.elapsed() > timeout {
            panic!("Timed out waiting for connection");
        }

        sleep(Duration::from_millis(10)).await;
    }
}
