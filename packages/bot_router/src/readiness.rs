use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ReadinessConfig;

/// Waits for a freshly started bridge to accept connections.
#[derive(Clone, Copy, Debug)]
pub struct ReadinessProbe {
    timeout: Duration,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self::new(config.timeout, config.poll_interval)
    }

    /// Poll a TCP connect to `127.0.0.1:port` until it succeeds or the timeout
    /// elapses. Returns whether the port came up.
    pub async fn wait(&self, port: u16) -> bool {
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                debug!("Port {} ready after {:?}", port, started.elapsed());
                return true;
            }
            if Instant::now() + self.interval > deadline {
                warn!(
                    "Port {} not accepting connections after {:?}, forwarding anyway",
                    port, self.timeout
                );
                return false;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
