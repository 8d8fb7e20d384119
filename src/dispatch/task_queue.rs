use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout_at;

use crate::models::Task;

/// Outcome of a blocking pull against a [`TaskQueue`].
#[derive(Debug)]
pub enum PullOutcome {
    Task(Task),
    TimedOut,
    Closed,
}

/// A bounded, per-agent FIFO of pending tasks.
///
/// A small service type wrapping a mutex-guarded deque, in the shape of
/// `agents/orchestrator/task_queue.rs`, extended with bounded capacity,
/// a blocking `pull_or_wait` with a deadline, a closed state, and
/// sentinel-skipping on pull.
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    items: Mutex<VecDeque<Task>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Non-blocking push. Returns `false` if the queue is full.
    pub async fn try_push(&self, task: Task) -> bool {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return false;
        }
        items.push_back(task);
        drop(items);
        self.notify.notify_one();
        true
    }

    /// Replaces the slot holding `task_id` with a sentinel, in place,
    /// leaving the FIFO order and length untouched. Returns `true` if a
    /// matching slot was found.
    pub async fn cancel_in_place(&self, task_id: u64) -> bool {
        let mut items = self.items.lock().await;
        for item in items.iter_mut() {
            if item.id() == Some(task_id) {
                item.clear();
                return true;
            }
        }
        false
    }

    /// Blocks until a non-sentinel task is available, the deadline passes,
    /// or the queue is closed. Sentinel tasks are silently skipped and the
    /// wait resumes.
    pub async fn pull_or_wait(&self, deadline: Instant) -> PullOutcome {
        loop {
            // Register interest before checking state, so a push or close
            // that happens after this point is never missed.
            let notified = self.notify.notified();

            if self.closed.load(Ordering::SeqCst) {
                return PullOutcome::Closed;
            }

            {
                let mut items = self.items.lock().await;
                while let Some(task) = items.pop_front() {
                    if !task.is_sentinel() {
                        return PullOutcome::Task(task);
                    }
                }
            }

            if timeout_at(deadline.into(), notified).await.is_err() {
                return PullOutcome::TimedOut;
            }
        }
    }

    /// Marks the queue closed and wakes every parked puller.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task_with_id(id: u64) -> Task {
        let mut t = Task::from_value(serde_json::json!({"type": "ping"})).unwrap();
        t.set_id(id);
        t
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q = TaskQueue::new(16);
        assert!(q.try_push(task_with_id(1)).await);
        assert!(q.try_push(task_with_id(2)).await);

        let deadline = Instant::now() + Duration::from_millis(100);
        match q.pull_or_wait(deadline).await {
            PullOutcome::Task(t) => assert_eq!(t.id(), Some(1)),
            other => panic!("expected task, got {other:?}"),
        }
        match q.pull_or_wait(deadline).await {
            PullOutcome::Task(t) => assert_eq!(t.id(), Some(2)),
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overflow_rejected_at_capacity() {
        let q = TaskQueue::new(2);
        assert!(q.try_push(task_with_id(1)).await);
        assert!(q.try_push(task_with_id(2)).await);
        assert!(!q.try_push(task_with_id(3)).await);
    }

    #[tokio::test]
    async fn timeout_when_empty() {
        let q = TaskQueue::new(16);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(
            q.pull_or_wait(deadline).await,
            PullOutcome::TimedOut
        ));
    }

    #[tokio::test]
    async fn sentinel_skipped_then_real_task_delivered() {
        let q = TaskQueue::new(16);
        assert!(q.try_push(task_with_id(1)).await);
        assert!(q.cancel_in_place(1).await);
        assert!(q.try_push(task_with_id(2)).await);

        let deadline = Instant::now() + Duration::from_millis(100);
        match q.pull_or_wait(deadline).await {
            PullOutcome::Task(t) => assert_eq!(t.id(), Some(2)),
            other => panic!("expected task 2, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_wakes_parked_puller() {
        let q = std::sync::Arc::new(TaskQueue::new(16));
        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(5);
            q2.pull_or_wait(deadline).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, PullOutcome::Closed));
    }
}
