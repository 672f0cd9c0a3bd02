//! Keep-alive guard
//!
//! Chunk bodies can take longer to arrive than the idle timeout. While a
//! guard is alive it keeps touching its session; dropping it stops the
//! refresh on every exit path, including a dropped request future.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::registry::SessionRegistry;

pub struct KeepAliveGuard {
    task: JoinHandle<()>,
}

impl KeepAliveGuard {
    /// Start refreshing `path` every `period`
    pub fn start(registry: SessionRegistry, path: String, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                registry.touch(&path).await;
            }
        });

        Self { task }
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::BackendHandle;

    #[tokio::test]
    async fn test_guard_refreshes_deadline() {
        let registry = SessionRegistry::new(Duration::from_millis(100));
        let created = registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let guard = KeepAliveGuard::start(registry.clone(), "/a.bin".to_string(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;

        let refreshed = registry.get("/a.bin").await.unwrap();
        assert!(refreshed.expires_at > created.expires_at);
        drop(guard);
    }

    #[tokio::test]
    async fn test_guard_stops_on_drop() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create("/a.bin", 10, BackendHandle::Sequential).await.unwrap();

        let guard = KeepAliveGuard::start(registry.clone(), "/a.bin".to_string(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        // Let the abort land before sampling
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stopped_at = registry.get("/a.bin").await.unwrap().expires_at;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.get("/a.bin").await.unwrap().expires_at, stopped_at);
    }
}
