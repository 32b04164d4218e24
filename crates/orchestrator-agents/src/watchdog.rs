//! Activity-based watchdog (§4.8 `[AMBIENT]`), adapted from
//! `openclaw-agent::watchdog::ActivityWatchdog`: an idle timer reset on
//! every observed sign of progress, plus an absolute wall-clock safety net,
//! cancels a `CancellationToken` rather than bare `tokio::time::sleep`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutReason {
    Idle(Duration),
    WallClock(Duration),
}

#[derive(Clone)]
pub struct ActivityWatchdog {
    last_activity_ms: Arc<AtomicU64>,
    cancel_token: CancellationToken,
    idle_timeout: Duration,
    max_wall_clock: Duration,
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl ActivityWatchdog {
    pub fn new(idle_timeout: Duration, max_wall_clock: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            last_activity_ms: Arc::new(AtomicU64::new(epoch_ms())),
            cancel_token,
            idle_timeout,
            max_wall_clock,
        }
    }

    #[inline]
    pub fn touch(&self) {
        self.last_activity_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn spawn(&self, label: &str) -> JoinHandle<Option<TimeoutReason>> {
        let last_activity = Arc::clone(&self.last_activity_ms);
        let cancel = self.cancel_token.clone();
        let idle_timeout_ms = self.idle_timeout.as_millis() as u64;
        let max_wall_clock = self.max_wall_clock;
        let idle_timeout = self.idle_timeout;
        let label = label.to_string();
        let start = Instant::now();

        tokio::spawn(async move {
            let check_interval = Duration::from_millis(500);

            loop {
                tokio::time::sleep(check_interval).await;

                if cancel.is_cancelled() {
                    return None;
                }

                let now_ms = epoch_ms();
                let last = last_activity.load(Ordering::Relaxed);
                let idle_ms = now_ms.saturating_sub(last);
                let elapsed = start.elapsed();

                if idle_ms > idle_timeout_ms {
                    warn!(label, idle_s = idle_ms / 1000, "subagent watchdog idle timeout");
                    cancel.cancel();
                    return Some(TimeoutReason::Idle(idle_timeout));
                }

                if elapsed > max_wall_clock {
                    warn!(label, elapsed_s = elapsed.as_secs(), "subagent watchdog wall-clock timeout");
                    cancel.cancel();
                    return Some(TimeoutReason::WallClock(max_wall_clock));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touching_prevents_idle_timeout() {
        let token = CancellationToken::new();
        let wd = ActivityWatchdog::new(Duration::from_millis(200), Duration::from_secs(10), token.clone());
        let handle = wd.spawn("test-active");
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            wd.touch();
        }
        assert!(!token.is_cancelled());
        handle.abort();
    }

    #[tokio::test]
    async fn idle_past_threshold_cancels() {
        let token = CancellationToken::new();
        let wd = ActivityWatchdog::new(Duration::from_millis(100), Duration::from_secs(60), token.clone());
        let handle = wd.spawn("test-idle");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(token.is_cancelled());
        let reason = handle.await.unwrap();
        assert!(matches!(reason, Some(TimeoutReason::Idle(_))));
    }

    #[tokio::test]
    async fn external_cancel_reports_none() {
        let token = CancellationToken::new();
        let wd = ActivityWatchdog::new(Duration::from_secs(60), Duration::from_secs(60), token.clone());
        let handle = wd.spawn("test-external");
        token.cancel();
        tokio::time::sleep(Duration::from_millis(700)).await;
        let reason = handle.await.unwrap();
        assert_eq!(reason, None);
    }
}
