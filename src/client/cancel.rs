//! Cancellation delivery: coalesces queued cancel requests into one DELETE.

use std::sync::Arc;

use tracing::debug;

use crate::client::ClientInner;
use crate::computation::CancelJob;
use crate::queue::Job;
use crate::transport::status_error;

pub(crate) async fn run(inner: Arc<ClientInner>) {
    loop {
        let first = match inner.cancel_queue.pop().await {
            Job::Shutdown => return,
            Job::Task(job) => job,
        };

        let mut batch: Vec<CancelJob> = vec![first];
        loop {
            match inner.cancel_queue.try_pop() {
                Some(Job::Task(job)) => batch.push(job),
                Some(Job::Shutdown) => {
                    inner.cancel_queue.push_sentinel();
                    break;
                }
                None => break,
            }
        }

        let ids: Vec<&str> = batch
            .iter()
            .filter_map(|(id, _)| id.as_deref())
            .collect();
        debug!("cancelling problems: {ids:?}");

        // A successful DELETE does not settle anything; the next poll will
        // observe CANCELLED and settle through the dispatcher.
        let error = match inner.session.delete_json("problems/", &ids).await {
            Ok(response) => status_error(response.status()),
            Err(error) => Some(error),
        };
        if let Some(error) = error {
            for (_, computation) in &batch {
                computation.settle_with_error(error.clone());
            }
        }

        for _ in &batch {
            inner.cancel_queue.task_done();
        }

        tokio::task::yield_now().await;
    }
}
