//! Work queues feeding the pipeline worker pools.
//!
//! Both queues support the same discipline: blocking pop for the first item,
//! non-blocking pops to batch opportunistically, a shutdown sentinel per
//! worker, and a `join` that resolves once every accepted task has been
//! acknowledged with `task_done`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

use crate::computation::Computation;

/// One unit of work pulled off a queue.
pub(crate) enum Job<T> {
    Task(T),
    /// Termination signal; each worker exits on the first one it sees.
    Shutdown,
}

struct Counter {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Counter {
    fn new() -> Self {
        Counter {
            outstanding: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn incr(&self) {
        self.outstanding.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn decr(&self) {
        if self.outstanding.fetch_sub(1, AtomicOrdering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn join(&self) {
        loop {
            let idle = self.idle.notified();
            if self.outstanding.load(AtomicOrdering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// FIFO queue shared by a pool of workers.
pub(crate) struct WorkQueue<T> {
    inner: Arc<WorkQueueInner<T>>,
}

struct WorkQueueInner<T> {
    items: Mutex<VecDeque<Job<T>>>,
    ready: Semaphore,
    tasks: Counter,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        WorkQueue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        WorkQueue {
            inner: Arc::new(WorkQueueInner {
                items: Mutex::new(VecDeque::new()),
                ready: Semaphore::new(0),
                tasks: Counter::new(),
            }),
        }
    }

    /// Enqueues a task. The task counts as outstanding until a worker calls
    /// [`task_done`](Self::task_done) for it.
    pub fn push(&self, task: T) {
        self.inner.tasks.incr();
        self.inner.items.lock().push_back(Job::Task(task));
        self.inner.ready.add_permits(1);
    }

    /// Enqueues a shutdown sentinel. Sentinels are not tracked as tasks.
    pub fn push_sentinel(&self) {
        self.inner.items.lock().push_back(Job::Shutdown);
        self.inner.ready.add_permits(1);
    }

    /// Waits for the next job.
    pub async fn pop(&self) -> Job<T> {
        let permit = self
            .inner
            .ready
            .acquire()
            .await
            .expect("queue semaphore closed");
        permit.forget();
        self.inner
            .items
            .lock()
            .pop_front()
            .expect("queue empty despite available permit")
    }

    /// Returns the next job if one is immediately available.
    pub fn try_pop(&self) -> Option<Job<T>> {
        let permit = self.inner.ready.try_acquire().ok()?;
        permit.forget();
        Some(
            self.inner
                .items
                .lock()
                .pop_front()
                .expect("queue empty despite available permit"),
        )
    }

    /// Acknowledges one previously popped task.
    pub fn task_done(&self) {
        self.inner.tasks.decr();
    }

    /// Resolves once all accepted tasks have been acknowledged.
    pub async fn join(&self) {
        self.inner.tasks.join().await;
    }
}

/// Entry in the poll schedule: a computation and the earliest instant it
/// should next be polled at.
pub(crate) struct Scheduled {
    pub at: Instant,
    seq: u64,
    pub job: Job<Computation>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the earliest deadline surfaces first in a max-heap;
    // insertion order breaks ties.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// Priority queue ordered by scheduled poll time.
pub(crate) struct ScheduleQueue {
    inner: Arc<ScheduleQueueInner>,
}

struct ScheduleQueueInner {
    heap: Mutex<BinaryHeap<Scheduled>>,
    seq: AtomicU64,
    ready: Semaphore,
    tasks: Counter,
}

impl Clone for ScheduleQueue {
    fn clone(&self) -> Self {
        ScheduleQueue {
            inner: self.inner.clone(),
        }
    }
}

impl ScheduleQueue {
    pub fn new() -> Self {
        ScheduleQueue {
            inner: Arc::new(ScheduleQueueInner {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                ready: Semaphore::new(0),
                tasks: Counter::new(),
            }),
        }
    }

    pub fn push(&self, at: Instant, computation: Computation) {
        self.inner.tasks.incr();
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.heap.lock().push(Scheduled {
            at,
            seq,
            job: Job::Task(computation),
        });
        self.inner.ready.add_permits(1);
    }

    pub fn push_sentinel(&self) {
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.heap.lock().push(Scheduled {
            at: Instant::now(),
            seq,
            job: Job::Shutdown,
        });
        self.inner.ready.add_permits(1);
    }

    /// Returns an entry popped beyond the grouping window, preserving its
    /// deadline and tie-break position.
    pub fn requeue(&self, entry: Scheduled) {
        self.inner.heap.lock().push(entry);
        self.inner.ready.add_permits(1);
    }

    /// Waits for the earliest scheduled entry. The entry may not be due yet;
    /// the caller decides how long to sleep before acting on it.
    pub async fn pop(&self) -> Scheduled {
        let permit = self
            .inner
            .ready
            .acquire()
            .await
            .expect("queue semaphore closed");
        permit.forget();
        self.inner
            .heap
            .lock()
            .pop()
            .expect("schedule empty despite available permit")
    }

    pub fn try_pop(&self) -> Option<Scheduled> {
        let permit = self.inner.ready.try_acquire().ok()?;
        permit.forget();
        Some(
            self.inner
                .heap
                .lock()
                .pop()
                .expect("schedule empty despite available permit"),
        )
    }

    pub fn task_done(&self) {
        self.inner.tasks.decr();
    }

    pub async fn join(&self) {
        self.inner.tasks.join().await;
    }
}
