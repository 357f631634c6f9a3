//! Preview readiness: is anything answering on the workspace's published port?

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::debug;
use utoipa::ToSchema;

/// How long an external poller should keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PreviewPolicy {
    fn default() -> Self {
        Self {
            attempts: 150,
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    Ready,
    Pending,
    /// The template publishes no port.
    NotApplicable,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One TCP connect attempt against `host:port`.
pub async fn probe_port(host: &str, port: u16) -> PreviewStatus {
    if port == 0 {
        return PreviewStatus::NotApplicable;
    }
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => PreviewStatus::Ready,
        Ok(Err(e)) => {
            debug!(host = %host, port, error = %e, "Preview not reachable yet");
            PreviewStatus::Pending
        }
        Err(_) => PreviewStatus::Pending,
    }
}

/// Probe until ready or the policy's attempts run out.
pub async fn wait_for_port(host: &str, port: u16, policy: PreviewPolicy) -> PreviewStatus {
    for attempt in 1..=policy.attempts.max(1) {
        match probe_port(host, port).await {
            PreviewStatus::Pending => {
                if attempt < policy.attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            done => return done,
        }
    }
    PreviewStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(probe_port("127.0.0.1", port).await, PreviewStatus::Ready);
    }

    #[tokio::test]
    async fn test_zero_port_not_applicable() {
        assert_eq!(probe_port("127.0.0.1", 0).await, PreviewStatus::NotApplicable);
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let policy = PreviewPolicy {
            attempts: 2,
            interval: Duration::from_millis(10),
        };
        assert_eq!(
            wait_for_port("127.0.0.1", port, policy).await,
            PreviewStatus::Pending
        );
    }

    #[test]
    fn test_default_policy() {
        let policy = PreviewPolicy::default();
        assert_eq!(policy.attempts, 150);
        assert_eq!(policy.interval, Duration::from_secs(2));
    }
}
