//! Cached access to the remote solver catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::solver::Solver;
use crate::transport::Session;

/// Cache key used when fetching the full solver listing.
const ALL_SOLVERS: &str = "*";

#[derive(Default)]
struct Slot {
    fetched_at: Option<Instant>,
    solvers: Vec<Solver>,
}

/// TTL cache over the catalog endpoints, keyed by solver name.
///
/// Each key has its own slot and lock, so concurrent misses on the same key
/// collapse into a single remote fetch while different keys proceed
/// independently.
pub(crate) struct Catalog {
    maxage: Duration,
    cache: DashMap<String, Arc<Mutex<Slot>>>,
}

impl Catalog {
    pub fn new(maxage: Duration) -> Self {
        Catalog {
            maxage,
            cache: DashMap::new(),
        }
    }

    /// Returns descriptors for one named solver or the whole catalog,
    /// served from cache while fresh unless `refresh` forces a fetch.
    pub async fn fetch(
        &self,
        session: &Session,
        name: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<Solver>> {
        let key = name.unwrap_or(ALL_SOLVERS).to_string();
        let slot = self.cache.entry(key).or_default().clone();
        let mut slot = slot.lock().await;

        if !refresh {
            if let Some(fetched_at) = slot.fetched_at {
                if fetched_at.elapsed() < self.maxage {
                    return Ok(slot.solvers.clone());
                }
            }
        }

        let solvers = fetch_remote(session, name).await?;
        slot.fetched_at = Some(Instant::now());
        slot.solvers = solvers.clone();
        Ok(solvers)
    }
}

async fn fetch_remote(session: &Session, name: Option<&str>) -> Result<Vec<Solver>> {
    let path = match name {
        Some(name) => {
            debug!("fetching definition of a solver with name={name:?}");
            format!("solvers/remote/{name}/")
        }
        None => {
            debug!("fetching definitions of all available solvers");
            "solvers/remote/".to_string()
        }
    };

    let response = session.get(&path).await?;
    let status = response.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::SolverAuth);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        if let Some(name) = name {
            return Err(Error::SolverNotFound(format!(
                "no solver with name={name:?} available"
            )));
        }
    }
    if !status.is_success() {
        return Err(Error::Io(format!("unexpected HTTP status {status}")));
    }

    let data: Value = response.json().await.map_err(Error::io)?;
    let descriptors = match (name, data) {
        (Some(_), descriptor) => vec![descriptor],
        (None, Value::Array(descriptors)) => descriptors,
        (None, _) => {
            return Err(Error::InvalidResponse(
                "expected an array of solver descriptors".to_string(),
            ))
        }
    };

    debug!("received solver data for {} solver(s)", descriptors.len());

    let mut solvers = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        match Solver::from_descriptor(descriptor) {
            Ok(solver) => solvers.push(solver),
            Err(err) => debug!("skipping solver: {err}"),
        }
    }
    Ok(solvers)
}
