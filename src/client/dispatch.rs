//! Routing of server status records to the next pipeline stage.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::client::{poll, ClientInner};
use crate::computation::Computation;
use crate::error::{Error, Result};
use crate::message::{RemoteStatus, StatusRecord};

/// Consumes one status record for `computation` and routes it onward:
/// settle it, queue an answer download, or schedule the next poll.
///
/// Any error raised while routing settles the computation with that error,
/// so no handle is ever left orphaned.
pub(crate) fn handle_status(
    inner: &Arc<ClientInner>,
    record: StatusRecord,
    computation: &Computation,
) {
    if let Err(error) = route(inner, record, computation) {
        computation.settle_with_error(error);
    }
}

fn route(
    inner: &Arc<ClientInner>,
    record: StatusRecord,
    computation: &Computation,
) -> Result<()> {
    trace!("handling status record: {record:?}");
    debug!(
        "handling response for {:?} with status {:?}",
        record.id, record.status
    );

    // Immediate rejections carry an error code instead of id/status.
    if let (Some(_), Some(message)) = (record.error_code, record.error_msg.as_ref()) {
        return Err(Error::SolverFailure(message.clone()));
    }

    let status = record.status.ok_or_else(|| {
        Error::InvalidResponse("'status' missing in problem description response".to_string())
    })?;
    let id = record.id.clone().ok_or_else(|| {
        Error::InvalidResponse("'id' missing in problem description response".to_string())
    })?;

    computation.update_from_record(&id, status, &record);

    // A cancel requested before the id was known is sent now, at most once.
    computation.process_cancel_on_status(&id, status);

    match status {
        RemoteStatus::Completed => match record.answer {
            Some(answer) => computation.settle_with_answer(answer),
            None => inner.results_queue.push(computation.clone()),
        },
        RemoteStatus::Pending | RemoteStatus::InProgress => {
            poll::schedule(inner, computation)?;
        }
        RemoteStatus::Cancelled => return Err(Error::Cancelled),
        RemoteStatus::Failed | RemoteStatus::Unknown => {
            let message = record
                .error_message
                .unwrap_or_else(|| "An unknown error has occurred.".to_string());
            return Err(Error::solver_failed(message));
        }
    }

    Ok(())
}
