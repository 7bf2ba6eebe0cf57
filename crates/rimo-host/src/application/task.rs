//! Spawned tasks bound to an owner's lifetime.
//!
//! Every background task a connection owns (mirroring ticker, stats pusher,
//! relay listener, command worker) is held through a [`TaskGuard`].  Dropping
//! the guard aborts the task, so removing a connection's state is enough to
//! stop everything it started.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Owns a spawned task and aborts it on drop.
#[derive(Debug)]
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    /// `true` once the task has returned or been aborted.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    /// Aborts the task now.
    pub fn stop(&self) {
        self.0.abort();
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns `tick` every `period`, first firing one period from now.
///
/// Ticks that fall behind are skipped rather than bunched.
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> TaskGuard
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    TaskGuard::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_after_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _guard = spawn_periodic(Duration::from_secs(3), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(6_200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_guard_stops_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let guard = spawn_periodic(Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        drop(guard);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_marks_task_finished() {
        let guard = TaskGuard::spawn(std::future::pending());
        guard.stop();
        for _ in 0..100 {
            if guard.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(guard.is_finished());
    }
}
