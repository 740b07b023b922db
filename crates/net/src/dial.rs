//! Outbound dialing
//!
//! `connect` is a one-shot dial with a timeout (user clients). `connect_hard`
//! keeps redialing with linear backoff until a total budget elapses, the way
//! a NAT-bound resource has to when its relay restarts.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{NetError, Result};

/// Dial `addr` once, failing after `timeout`.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(NetError::ConnectTimeout {
            addr: addr.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    }
}

/// Dial `addr`, retrying with linear backoff (`step`, `2*step`, ...) until a
/// connection succeeds or `total` has elapsed. The socket is recreated on
/// every attempt.
pub async fn connect_hard(addr: &str, step: Duration, total: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + total;
    let mut attempt: u32 = 0;
    let mut last = String::from("no attempt made");

    loop {
        attempt += 1;
        match connect(addr, step.max(Duration::from_millis(100))).await {
            Ok(stream) => {
                debug!("Connected to {} on attempt {}", addr, attempt);
                return Ok(stream);
            }
            Err(e) => {
                last = e.to_string();
                warn!("Connect attempt {} to {} failed: {}", attempt, addr, last);
            }
        }

        let backoff = step * attempt;
        if Instant::now() + backoff >= deadline {
            return Err(NetError::RetriesExhausted {
                addr: addr.to_string(),
                millis: total.as_millis() as u64,
                last,
            });
        }
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = connect(&addr, Duration::from_secs(1)).await.unwrap();
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind and drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(connect(&addr, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_hard_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = Instant::now();
        let result = connect_hard(
            &addr,
            Duration::from_millis(20),
            Duration::from_millis(150),
        )
        .await;
        assert!(matches!(result, Err(NetError::RetriesExhausted { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_hard_succeeds_after_listener_appears() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let addr_clone = addr.clone();
        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            TcpListener::bind(&addr_clone).await
        });

        let result = connect_hard(
            &addr,
            Duration::from_millis(30),
            Duration::from_secs(10),
        )
        .await;
        let _listener = binder.await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
