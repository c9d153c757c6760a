//! Problem submission: batching, the submit POST, and clock-offset
//! measurement.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::client::{dispatch, ClientInner, CLOCK_DIFF_MAX, SUBMIT_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::message::StatusRecord;
use crate::queue::Job;
use crate::transport::{server_date, status_error};

async fn submit_batch(
    inner: &ClientInner,
    body: String,
) -> Result<(Vec<StatusRecord>, Option<f64>)> {
    let response = inner.session.post_raw("problems/", body).await?;
    let local_time = Utc::now();

    if let Some(error) = status_error(response.status()) {
        return Err(error);
    }

    // Offset between the server clock and ours, sampled at the submit
    // response; informational only.
    let clock_offset = server_date(&response)
        .map(|server| (server - local_time).num_milliseconds() as f64 / 1000.0);

    let records = response
        .json::<Vec<StatusRecord>>()
        .await
        .map_err(Error::io)?;
    Ok((records, clock_offset))
}

pub(crate) async fn run(inner: Arc<ClientInner>) {
    loop {
        // Block on the first queued problem, then drain more without
        // blocking, up to the batch size.
        let first = match inner.submission_queue.pop().await {
            Job::Shutdown => return,
            Job::Task(job) => job,
        };

        let mut batch = vec![first];
        while batch.len() < SUBMIT_BATCH_SIZE {
            match inner.submission_queue.try_pop() {
                Some(Job::Task(job)) => batch.push(job),
                Some(Job::Shutdown) => {
                    // Keep the sentinel for another worker.
                    inner.submission_queue.push_sentinel();
                    break;
                }
                None => break,
            }
        }

        debug!("submitting {} problems", batch.len());
        let body = format!(
            "[{}]",
            batch
                .iter()
                .map(|job| job.body.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        match submit_batch(&inner, body).await {
            Err(error) => {
                debug!("submit failed for {} problems: {error}", batch.len());
                for job in &batch {
                    job.computation.settle_with_error(error.clone());
                    inner.submission_queue.task_done();
                }
            }
            Ok((records, _)) if records.len() != batch.len() => {
                warn!(
                    "submit response carries {} status records for {} problems",
                    records.len(),
                    batch.len()
                );
                for job in &batch {
                    job.computation.settle_with_error(Error::InvalidResponse(
                        "submit response is not aligned with the request".to_string(),
                    ));
                    inner.submission_queue.task_done();
                }
            }
            Ok((records, clock_offset)) => {
                debug!("finished submitting {} problems", batch.len());
                if let Some(offset) = clock_offset {
                    if offset.abs() > CLOCK_DIFF_MAX {
                        debug!(
                            "detected (server, client) clock offset of approx. \
                             {offset:.2} sec"
                        );
                    }
                }
                for (job, record) in batch.iter().zip(records) {
                    if let Some(offset) = clock_offset {
                        job.computation.set_clock_offset(offset);
                    }
                    dispatch::handle_status(&inner, record, &job.computation);
                    inner.submission_queue.task_done();
                }
            }
        }

        tokio::task::yield_now().await;
    }
}
