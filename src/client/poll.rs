//! Problem status polling: exponential back-off, request grouping, and
//! transient-failure recovery.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::client::{dispatch, ClientInner, POLL_GROUP_TIMEFRAME, STATUS_QUERY_SIZE};
use crate::computation::Computation;
use crate::error::{Error, Result};
use crate::message::StatusRecord;
use crate::queue::Job;

/// Schedules the next status poll for `computation`.
///
/// The first poll uses the minimum back-off; each subsequent poll doubles
/// it, clamped to the configured bounds. Fails with
/// [`Error::PollingTimeout`] when the computation's age at the scheduled
/// time would exceed the configured polling timeout, in which case nothing
/// is enqueued.
pub(crate) fn schedule(inner: &ClientInner, computation: &Computation) -> Result<()> {
    let backoff = computation.bump_poll_backoff(inner.poll_backoff_min, inner.poll_backoff_max);
    let at = Instant::now() + backoff;
    let age_at_poll = computation.age() + backoff;

    debug!(
        "poll of {:?} scheduled with {:?} back-off (age at poll: {:?})",
        computation.remote_id(),
        backoff,
        age_at_poll
    );

    if let Some(limit) = inner.polling_timeout {
        if age_at_poll > limit {
            debug!(
                "polling timeout exceeded before next poll: {:?} > {:?}, aborting polling",
                age_at_poll, limit
            );
            return Err(Error::PollingTimeout);
        }
    }

    inner.poll_queue.push(at, computation.clone());
    Ok(())
}

/// Adds one popped computation to the frame, skipping handles that are
/// already settled, have no remote id, or duplicate a frame member.
fn accept(frame: &mut Vec<(String, Computation)>, inner: &ClientInner, computation: Computation) {
    match computation.remote_id() {
        Some(id) if !computation.done() && !frame.iter().any(|(fid, _)| *fid == id) => {
            frame.push((id, computation));
        }
        _ => inner.poll_queue.task_done(),
    }
}

enum PollOutcome {
    Records(Vec<StatusRecord>),
    Transient(StatusCode),
}

async fn poll_frame(inner: &ClientInner, ids: &[String]) -> Result<PollOutcome> {
    let path = format!("problems/?id={}", ids.join(","));
    let response = inner.session.get(&path).await?;
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Auth);
    }
    if status.is_server_error() {
        return Ok(PollOutcome::Transient(status));
    }
    if !status.is_success() {
        return Err(Error::Io(format!("unexpected HTTP status {status}")));
    }

    let records = response
        .json::<Vec<StatusRecord>>()
        .await
        .map_err(Error::io)?;
    Ok(PollOutcome::Records(records))
}

pub(crate) async fn run(inner: Arc<ClientInner>) {
    loop {
        // Block on the earliest scheduled poll, then group everything due
        // within the grouping timeframe into one status query.
        let first = inner.poll_queue.pop().await;
        let frame_earliest = first.at;

        let mut frame: Vec<(String, Computation)> = Vec::new();
        match first.job {
            Job::Shutdown => return,
            Job::Task(computation) => accept(&mut frame, &inner, computation),
        }

        while frame.len() < STATUS_QUERY_SIZE {
            let Some(entry) = inner.poll_queue.try_pop() else {
                break;
            };
            if entry.at.duration_since(frame_earliest) <= POLL_GROUP_TIMEFRAME {
                match entry.job {
                    Job::Shutdown => return,
                    Job::Task(computation) => accept(&mut frame, &inner, computation),
                }
            } else {
                // Beyond the grouping window; put it back and close the frame.
                inner.poll_queue.requeue(entry);
                break;
            }
        }

        // All candidates may have settled while grouping.
        if frame.is_empty() {
            continue;
        }

        let ids: Vec<String> = frame.iter().map(|(id, _)| id.clone()).collect();
        debug!("polling for status of problems: {ids:?}");

        trace!("pausing until the scheduled poll time");
        tokio::time::sleep_until(frame_earliest).await;

        match poll_frame(&inner, &ids).await {
            Ok(PollOutcome::Transient(status)) => {
                warn!(
                    "received an internal server error response on problem \
                     status polling request ({status}); assuming the error \
                     is transient, and resuming polling"
                );
                for (_, computation) in &frame {
                    if let Err(err) = schedule(&inner, computation) {
                        computation.settle_with_error(err);
                    }
                }
            }
            Ok(PollOutcome::Records(records)) => {
                let mut by_id: HashMap<String, Computation> = frame.iter().cloned().collect();
                for record in records {
                    let Some(id) = record.id.clone() else {
                        warn!("dropping a poll status record without an id");
                        continue;
                    };
                    match by_id.remove(&id) {
                        Some(computation) => dispatch::handle_status(&inner, record, &computation),
                        None => warn!("received status for a problem not in this frame: {id:?}"),
                    }
                }
                for (id, computation) in by_id {
                    computation.settle_with_error(Error::InvalidResponse(format!(
                        "no status for problem {id:?} in poll response"
                    )));
                }
            }
            Err(err) => {
                for (_, computation) in &frame {
                    computation.settle_with_error(err.clone());
                }
            }
        }

        for _ in &frame {
            inner.poll_queue.task_done();
        }

        tokio::task::yield_now().await;
    }
}
