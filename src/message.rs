//! Wire records exchanged with the solver API.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Remote lifecycle state of a submitted problem.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// A status string this client does not recognize. Routed like a
    /// failure so the computation still settles.
    #[serde(other)]
    Unknown,
}

impl RemoteStatus {
    /// True for states that still require polling.
    pub fn is_ongoing(&self) -> bool {
        matches!(self, RemoteStatus::Pending | RemoteStatus::InProgress)
    }
}

/// One problem status record, as returned by problem submission, status
/// polling, and result retrieval.
///
/// Every field is optional on the wire: immediate rejections carry only
/// `error_code` and `error_msg`, while regular records carry `id` and
/// `status` plus whatever timing and answer data the server has.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    pub id: Option<String>,
    pub status: Option<RemoteStatus>,
    pub submitted_on: Option<String>,
    pub solved_on: Option<String>,
    pub earliest_estimated_completion: Option<String>,
    pub latest_estimated_completion: Option<String>,
    pub answer: Option<Value>,
    pub error_message: Option<String>,
    pub error_code: Option<i64>,
    pub error_msg: Option<String>,
}

/// Parses a server timestamp.
///
/// The API emits ISO 8601, with or without an explicit offset; naive
/// timestamps are taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
