//! Two-priority task pool with a dynamically adjustable parallelism limit.
//!
//! Tasks are opaque futures tagged small or large. Dispatch drains the small
//! queue fully before touching the large queue; within a class, FIFO. The
//! limit can be raised (fills headroom immediately) or lowered (running tasks
//! are never cancelled; new starts are suppressed until completions bring
//! `running` back under the limit).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Point-in-time view of the pool, for drain polling and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub running: usize,
    pub small_queued: usize,
    pub large_queued: usize,
    pub limit: usize,
}

struct Inner {
    limit: usize,
    running: usize,
    small: VecDeque<Task>,
    large: VecDeque<Task>,
    // Dispatch re-entrancy sentinel: a completion hook arriving while another
    // pump holds the queues must not start a second dispatch loop.
    pumping: bool,
}

/// Cloneable handle to one shared pool. Requires a tokio runtime.
#[derive(Clone)]
pub struct PriorityPool {
    inner: Arc<Mutex<Inner>>,
}

impl PriorityPool {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                limit: limit.max(1),
                running: 0,
                small: VecDeque::new(),
                large: VecDeque::new(),
                pumping: false,
            })),
        }
    }

    /// Enqueue a task and dispatch immediately if headroom exists.
    pub fn push(&self, task: impl Future<Output = ()> + Send + 'static, small: bool) {
        {
            let mut inner = self.inner.lock().unwrap();
            let queue = if small {
                &mut inner.small
            } else {
                &mut inner.large
            };
            queue.push_back(Box::pin(task));
        }
        self.pump();
    }

    /// Update the parallelism limit (clamped to ≥ 1). Raising it fills the
    /// new headroom right away; lowering it never cancels running tasks.
    pub fn set_limit(&self, limit: usize) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.limit = limit.max(1);
        }
        self.pump();
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = self.inner.lock().unwrap();
        PoolSnapshot {
            running: inner.running,
            small_queued: inner.small.len(),
            large_queued: inner.large.len(),
            limit: inner.limit,
        }
    }

    /// Resolves once both queues are empty and nothing is running.
    pub async fn idle(&self) {
        loop {
            {
                let inner = self.inner.lock().unwrap();
                if inner.running == 0 && inner.small.is_empty() && inner.large.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn pump(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.pumping {
            return;
        }
        inner.pumping = true;
        while inner.running < inner.limit {
            let next = match inner.small.pop_front() {
                Some(task) => Some(task),
                None => inner.large.pop_front(),
            };
            let Some(task) = next else {
                break;
            };
            inner.running += 1;
            let pool = self.clone();
            tokio::spawn(async move {
                task.await;
                {
                    let mut inner = pool.inner.lock().unwrap();
                    inner.running -= 1;
                }
                pool.pump();
            });
        }
        inner.pumping = false;
    }
}
