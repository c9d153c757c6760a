//! Handle for one submitted problem.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::message::{parse_timestamp, RemoteStatus, StatusRecord};
use crate::queue::WorkQueue;

/// A queued cancel request: the remote problem id (when known) and the
/// computation it belongs to.
pub(crate) type CancelJob = (Option<String>, Computation);

/// In-process handle for one submitted problem.
///
/// A `Computation` is created when the problem is accepted for submission
/// and is driven through its lifecycle by the client's background workers.
/// It settles exactly once, with either the problem's answer or an error,
/// and every clone observes the same state.
#[derive(Clone)]
pub struct Computation {
    inner: Arc<Shared>,
}

struct Shared {
    local_id: u64,
    time_created: DateTime<Utc>,
    created_at: Instant,
    state: Mutex<State>,
    cancel: Mutex<CancelState>,
    cancel_queue: WorkQueue<CancelJob>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

#[derive(Default)]
struct State {
    remote_id: Option<String>,
    remote_status: Option<RemoteStatus>,
    outcome: Option<Result<Value>>,
    poll_backoff: Option<Duration>,
    clock_offset: Option<f64>,
    time_received: Option<DateTime<Utc>>,
    time_solved: Option<DateTime<Utc>>,
    eta_min: Option<DateTime<Utc>>,
    eta_max: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CancelState {
    requested: bool,
    sent: bool,
}

impl Computation {
    pub(crate) fn new(local_id: u64, cancel_queue: WorkQueue<CancelJob>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Computation {
            inner: Arc::new(Shared {
                local_id,
                time_created: Utc::now(),
                created_at: Instant::now(),
                state: Mutex::new(State::default()),
                cancel: Mutex::new(CancelState::default()),
                cancel_queue,
                done_tx,
                done_rx,
            }),
        }
    }

    /// Client-assigned id, stable for the lifetime of the handle.
    pub fn local_id(&self) -> u64 {
        self.inner.local_id
    }

    /// Server-assigned problem id, available once submission is accepted.
    pub fn remote_id(&self) -> Option<String> {
        self.inner.state.lock().remote_id.clone()
    }

    /// Last remote status observed for this problem.
    pub fn remote_status(&self) -> Option<RemoteStatus> {
        self.inner.state.lock().remote_status
    }

    /// True once the computation has settled with a result or an error.
    pub fn done(&self) -> bool {
        *self.inner.done_rx.borrow()
    }

    /// Waits until the computation settles, then returns the answer payload
    /// or the stored error.
    ///
    /// With a timeout, gives up after that long with [`Error::WaitTimeout`];
    /// the computation itself is left running and may still settle later.
    pub async fn wait_result(&self, timeout: Option<Duration>) -> Result<Value> {
        let mut done = self.inner.done_rx.clone();
        let settled = done.wait_for(|done| *done);

        match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, settled)
                    .await
                    .map_err(|_| Error::WaitTimeout)?
                    .expect("settle channel closed");
            }
            None => {
                settled.await.expect("settle channel closed");
            }
        }

        let state = self.inner.state.lock();
        match &state.outcome {
            Some(Ok(answer)) => Ok(answer.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(Error::Io(
                "computation signalled done without an outcome".to_string(),
            )),
        }
    }

    /// Requests cancellation of this problem.
    ///
    /// If the remote id is known and the problem is still waiting in the
    /// remote queue, a cancel request is enqueued right away; otherwise the
    /// request is remembered and sent as soon as the id is learned. Repeated
    /// calls, and calls after the computation settled, are no-ops. The
    /// computation settles with [`Error::Cancelled`] only once the server
    /// confirms the cancellation.
    pub fn cancel(&self) {
        let mut cancel = self.inner.cancel.lock();
        if cancel.requested {
            return;
        }
        cancel.requested = true;

        if self.done() {
            return;
        }

        let (remote_id, status) = {
            let state = self.inner.state.lock();
            (state.remote_id.clone(), state.remote_status)
        };

        if let Some(id) = remote_id {
            if !cancel.sent && status == Some(RemoteStatus::Pending) {
                cancel.sent = true;
                self.inner.cancel_queue.push((Some(id), self.clone()));
            }
        }
    }

    /// Poll interval used for the most recent poll of this problem.
    pub fn poll_backoff(&self) -> Option<Duration> {
        self.inner.state.lock().poll_backoff
    }

    /// Observed (server - client) clock offset, in seconds, measured from
    /// the submission response.
    pub fn clock_offset(&self) -> Option<f64> {
        self.inner.state.lock().clock_offset
    }

    pub fn time_created(&self) -> DateTime<Utc> {
        self.inner.time_created
    }

    pub fn time_received(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().time_received
    }

    pub fn time_solved(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().time_solved
    }

    pub fn eta_min(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().eta_min
    }

    pub fn eta_max(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().eta_max
    }

    /// Time elapsed since the problem was accepted for submission.
    pub(crate) fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    pub(crate) fn settle_with_answer(&self, answer: Value) {
        self.settle(Ok(answer));
    }

    pub(crate) fn settle_with_error(&self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(&self, outcome: Result<Value>) {
        {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome);
        }
        let _ = self.inner.done_tx.send(true);
    }

    pub(crate) fn set_remote_id(&self, id: &str) {
        let mut state = self.inner.state.lock();
        if state.remote_id.is_none() {
            state.remote_id = Some(id.to_string());
        }
    }

    pub(crate) fn set_clock_offset(&self, offset: f64) {
        let mut state = self.inner.state.lock();
        if state.clock_offset.is_none() {
            state.clock_offset = Some(offset);
        }
    }

    /// Records the remote id, status, and any timing fields present in the
    /// record that have not been observed before.
    pub(crate) fn update_from_record(&self, id: &str, status: RemoteStatus, record: &StatusRecord) {
        let mut state = self.inner.state.lock();

        if state.remote_id.is_none() {
            state.remote_id = Some(id.to_string());
        }
        state.remote_status = Some(status);

        if state.time_received.is_none() {
            if let Some(value) = record.submitted_on.as_deref() {
                state.time_received = parse_timestamp(value);
            }
        }
        if state.time_solved.is_none() {
            if let Some(value) = record.solved_on.as_deref() {
                state.time_solved = parse_timestamp(value);
            }
        }
        if state.eta_min.is_none() {
            if let Some(value) = record.earliest_estimated_completion.as_deref() {
                state.eta_min = parse_timestamp(value);
            }
        }
        if state.eta_max.is_none() {
            if let Some(value) = record.latest_estimated_completion.as_deref() {
                state.eta_max = parse_timestamp(value);
            }
        }
    }

    /// Sends a deferred cancel once the remote id is first learned.
    ///
    /// Holding the cancel lock here and in [`cancel`](Self::cancel) is what
    /// guarantees at most one server-side cancel request per problem.
    pub(crate) fn process_cancel_on_status(&self, id: &str, status: RemoteStatus) {
        let mut cancel = self.inner.cancel.lock();
        if cancel.requested {
            if !cancel.sent && status == RemoteStatus::Pending {
                self.inner.cancel_queue.push((Some(id.to_string()), self.clone()));
            }
            cancel.sent = true;
        }
    }

    /// Advances the exponential poll back-off and returns the interval to
    /// use for the next poll: the minimum on the first poll, then doubled
    /// and clamped on every subsequent one.
    pub(crate) fn bump_poll_backoff(&self, min: Duration, max: Duration) -> Duration {
        let mut state = self.inner.state.lock();
        let next = match state.poll_backoff {
            None => min,
            Some(previous) => previous.saturating_mul(2).clamp(min, max),
        };
        state.poll_backoff = Some(next);
        next
    }
}

impl Debug for Computation {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Computation")
            .field("local_id", &self.inner.local_id)
            .field("remote_id", &state.remote_id)
            .field("remote_status", &state.remote_status)
            .field("done", &state.outcome.is_some())
            .finish()
    }
}
