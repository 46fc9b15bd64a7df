//! 可取消的一次性定时器
//!
//! 每个定时器是一个等待到期的 tokio 任务。取消（或丢弃）总是合法的，
//! 无论定时器是否已经触发。已经投递出去的触发事件由调用方用 id 判断是否过期。

use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// 单次休眠上限（tokio 定时轮只覆盖约两年）。
const MAX_SLEEP: Duration = Duration::from_secs(365 * 24 * 3600);

#[derive(Debug)]
pub struct Timer {
    id: u64,
    deadline: Instant,
    handle: AbortHandle,
}

impl Timer {
    /// 在 `deadline` 调用一次 `on_fire`。必须在 tokio 运行时中调用。
    pub fn spawn<F>(id: u64, deadline: Instant, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                tokio::time::sleep_until(deadline.min(now + MAX_SLEEP)).await;
            }
            on_fire();
        });
        Self {
            id,
            deadline,
            handle: task.abort_handle(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 取消定时器（幂等）。
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(id: u64, after: Duration, fired: &Arc<AtomicUsize>) -> Timer {
        let fired = fired.clone();
        Timer::spawn(id, Instant::now() + after, move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(1, Duration::from_secs(5), &fired);

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.id(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_prevent_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cancelled = counting_timer(1, Duration::from_secs(1), &fired);
        cancelled.cancel();
        // 重复取消无副作用
        cancelled.cancel();
        drop(counting_timer(2, Duration::from_secs(1), &fired));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn far_deadline_is_not_cut_short() {
        let fired = Arc::new(AtomicUsize::new(0));
        let _timer = counting_timer(4, MAX_SLEEP * 3, &fired);

        tokio::time::sleep(MAX_SLEEP * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(MAX_SLEEP + Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_harmless() {
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(3, Duration::from_millis(10), &fired);
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.is_finished());
    }
}
