//! Test helper utilities
//!
//! Worker callbacks arrive asynchronously in end-to-end tests, so most
//! assertions poll until a condition holds.

use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        Self::wait_for_with_interval(condition, timeout, Duration::from_millis(10)).await
    }

    /// Wait for a condition with a custom poll interval
    pub async fn wait_for_with_interval<F, Fut>(
        mut condition: F,
        timeout: Duration,
        poll_interval: Duration,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(poll_interval).await;
        }

        condition().await
    }
}
