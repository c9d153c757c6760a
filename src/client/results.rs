//! Answer download for problems that completed without an inline answer.

use std::sync::Arc;

use tracing::debug;

use crate::client::{dispatch, ClientInner};
use crate::error::{Error, Result};
use crate::message::StatusRecord;
use crate::queue::Job;
use crate::transport::status_error;

async fn load_result(inner: &ClientInner, remote_id: &str) -> Result<StatusRecord> {
    let response = inner
        .session
        .get(&format!("problems/{remote_id}/"))
        .await?;

    if let Some(error) = status_error(response.status()) {
        return Err(error);
    }

    response.json::<StatusRecord>().await.map_err(Error::io)
}

pub(crate) async fn run(inner: Arc<ClientInner>) {
    loop {
        let computation = match inner.results_queue.pop().await {
            Job::Shutdown => return,
            Job::Task(computation) => computation,
        };

        match computation.remote_id() {
            Some(remote_id) => {
                debug!("loading results of {remote_id:?}");
                match load_result(&inner, &remote_id).await {
                    Ok(record) => dispatch::handle_status(&inner, record, &computation),
                    Err(error) => computation.settle_with_error(error),
                }
            }
            None => computation.settle_with_error(Error::InvalidResponse(
                "answer requested for a problem without a remote id".to_string(),
            )),
        }
        inner.results_queue.task_done();

        tokio::task::yield_now().await;
    }
}
