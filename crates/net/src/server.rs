//! Accept-loop socket server
//!
//! One instance binds one listening address and hands every accepted
//! connection to a callback. Accept errors are logged and never fatal; one
//! misbehaving peer cannot affect the listener or other sessions.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A listening port with its accept loop running in a background task.
pub struct SocketServer {
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl SocketServer {
    /// Bind `addr` and start accepting.
    ///
    /// `on_accept` runs on the accept task and must not block; it typically
    /// spawns a task per connection. Binding port 0 picks a free port,
    /// reported by [`local_addr`](Self::local_addr). Nagle's algorithm is
    /// disabled on every accepted socket.
    pub async fn bind<F>(addr: SocketAddr, on_accept: F) -> std::io::Result<Self>
    where
        F: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {}", peer_addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("set_nodelay failed for {}: {}", peer_addr, e);
                        }
                        on_accept(stream, peer_addr);
                    }
                    Err(e) => {
                        error!("Accept error on {}: {}", local_addr, e);
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            handle: Some(handle),
        })
    }

    /// The actually-bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Existing connections are unaffected.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped listening on {}", self.local_addr);
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_bind_port_zero_reports_real_port() {
        let server = SocketServer::bind("127.0.0.1:0".parse().unwrap(), |_, _| {})
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_accept_callback_runs_per_connection() {
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let server = SocketServer::bind("127.0.0.1:0".parse().unwrap(), move |stream, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        })
        .await
        .unwrap();

        let addr = server.local_addr();
        for _ in 0..3 {
            TcpStream::connect(addr).await.unwrap();
        }

        // Accept loop runs on another task; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let mut server = SocketServer::bind("127.0.0.1:0".parse().unwrap(), |_, _| {})
            .await
            .unwrap();
        let addr = server.local_addr();
        server.stop();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // New connections are refused (or reset) once the listener is gone.
        match TcpStream::connect(addr).await {
            Err(_) => {}
            Ok(mut stream) => {
                use tokio::io::AsyncReadExt;
                let mut buf = [0u8; 1];
                assert_eq!(stream.read(&mut buf).await.unwrap_or(0), 0);
            }
        }
    }
}
