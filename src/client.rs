//! The API client: one HTTP session, four work queues, and the worker
//! pools that drive submitted problems to settlement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::catalog::Catalog;
use crate::computation::Computation;
use crate::config::{Config, DEFAULT_ENDPOINT, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::filter::SolverQuery;
use crate::queue::{ScheduleQueue, WorkQueue};
use crate::solver::Solver;
use crate::transport::{Session, SessionOptions};

mod cancel;
mod dispatch;
mod poll;
mod results;
mod submit;

// Problems per submit request and ids per status query.
pub(crate) const SUBMIT_BATCH_SIZE: usize = 20;
pub(crate) const STATUS_QUERY_SIZE: usize = 100;

// Worker pool sizes per stage.
const SUBMISSION_WORKER_COUNT: usize = 5;
const CANCEL_WORKER_COUNT: usize = 1;
const POLL_WORKER_COUNT: usize = 2;
const RESULT_WORKER_COUNT: usize = 5;

/// Poll back-off bounds.
pub const POLL_BACKOFF_MIN: Duration = Duration::from_secs(1);
pub const POLL_BACKOFF_MAX: Duration = Duration::from_secs(60);

// Two scheduled polls are grouped into one status query if closer than this.
pub(crate) const POLL_GROUP_TIMEFRAME: Duration = Duration::from_secs(2);

// Tolerated (server, client) clock offset, in seconds.
pub(crate) const CLOCK_DIFF_MAX: f64 = 1.0;

// Downloaded solver definition cache maxage.
const SOLVERS_CACHE_MAXAGE: Duration = Duration::from_secs(300);

/// A queued submission: the problem body, already serialized by the
/// caller's codec, and the computation tracking it.
pub(crate) struct SubmitJob {
    pub body: String,
    pub computation: Computation,
}

pub(crate) struct ClientInner {
    pub session: Session,
    pub default_solver: SolverQuery,
    pub polling_timeout: Option<Duration>,
    pub poll_backoff_min: Duration,
    pub poll_backoff_max: Duration,
    pub submission_queue: WorkQueue<SubmitJob>,
    pub cancel_queue: WorkQueue<crate::computation::CancelJob>,
    pub poll_queue: ScheduleQueue,
    pub results_queue: WorkQueue<Computation>,
    pub catalog: Catalog,
    next_local_id: AtomicU64,
}

/// Client for a remote solver API.
///
/// Submitting a problem returns a [`Computation`] handle; background worker
/// pools batch submissions, poll for status with exponential back-off,
/// download answers, and deliver cancellations, settling each handle
/// exactly once. Construction requires a running Tokio runtime.
///
/// ```no_run
/// # async fn example() -> dwave_cloud::Result<()> {
/// use dwave_cloud::Client;
///
/// let client = Client::builder().token("secret").build()?;
/// let solver = client.get_solver(None).await?;
/// let computation = client.submit(format!(r#"{{"solver": "{}", "data": ""}}"#, solver.id()));
/// let answer = computation.wait_result(None).await?;
/// println!("{answer}");
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Starts building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Builds a client from a configuration record.
    pub fn from_config(config: Config) -> Result<Self> {
        ClientBuilder {
            config,
            ..ClientBuilder::default()
        }
        .build()
    }

    /// Enqueues one serialized problem for submission and returns its
    /// handle immediately.
    pub fn submit(&self, body: impl Into<String>) -> Computation {
        let computation = self.new_computation();
        debug!(local_id = computation.local_id(), "enqueueing problem for submission");
        self.inner.submission_queue.push(SubmitJob {
            body: body.into(),
            computation: computation.clone(),
        });
        computation
    }

    /// Attaches a handle to an already-submitted problem and starts polling
    /// it.
    pub fn retrieve_problem(&self, remote_id: &str) -> Result<Computation> {
        let computation = self.new_computation();
        computation.set_remote_id(remote_id);
        poll::schedule(&self.inner, &computation)?;
        Ok(computation)
    }

    /// Returns the filtered, ordered list of solvers matching `query`.
    pub async fn get_solvers(&self, query: &SolverQuery) -> Result<Vec<Solver>> {
        let name = query.exact_name();
        let solvers = self
            .inner
            .catalog
            .fetch(&self.inner.session, name.as_deref(), query.wants_refresh())
            .await?;
        Ok(query.apply(solvers))
    }

    /// Returns the best solver for `query`, or the configured default
    /// solver when the query carries no filters.
    pub async fn get_solver(&self, query: Option<SolverQuery>) -> Result<Solver> {
        let query = match query {
            Some(query) if !query.is_empty() => query,
            _ if !self.inner.default_solver.is_empty() => self.inner.default_solver.clone(),
            Some(query) => query,
            None => SolverQuery::new(),
        };

        debug!("fetching solvers according to {query:?}");
        self.get_solvers(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::SolverNotFound("no solver matches the requested features".to_string())
            })
    }

    /// Performs a clean shutdown: waits for all scheduled work to finish,
    /// stops the workers, and joins them.
    ///
    /// Callers must not submit new work while the client is closing.
    pub async fn close(&self) {
        debug!("joining submission queue");
        self.inner.submission_queue.join().await;
        debug!("joining cancel queue");
        self.inner.cancel_queue.join().await;
        debug!("joining poll queue");
        self.inner.poll_queue.join().await;
        debug!("joining results queue");
        self.inner.results_queue.join().await;

        for _ in 0..SUBMISSION_WORKER_COUNT {
            self.inner.submission_queue.push_sentinel();
        }
        for _ in 0..CANCEL_WORKER_COUNT {
            self.inner.cancel_queue.push_sentinel();
        }
        for _ in 0..POLL_WORKER_COUNT {
            self.inner.poll_queue.push_sentinel();
        }
        for _ in 0..RESULT_WORKER_COUNT {
            self.inner.results_queue.push_sentinel();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for result in future::join_all(workers).await {
            if let Err(err) = result {
                error!("worker task failed during shutdown: {err}");
            }
        }
        debug!("client closed");
    }

    fn new_computation(&self) -> Computation {
        let local_id = self.inner.next_local_id.fetch_add(1, Ordering::Relaxed);
        Computation::new(local_id, self.inner.cancel_queue.clone())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: Config,
    poll_backoff_min: Option<Duration>,
    poll_backoff_max: Option<Duration>,
}

impl ClientBuilder {
    /// API endpoint URL. Defaults to the production endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Authentication token. Required.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    /// Default solver: a name, or a JSON feature-filter map.
    pub fn default_solver(mut self, solver: impl Into<String>) -> Self {
        self.config.default_solver = Some(solver.into());
        self
    }

    /// Proxy URL for all API connections.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    /// Disables TLS certificate verification.
    pub fn permissive_ssl(mut self, permissive: bool) -> Self {
        self.config.permissive_ssl = permissive;
        self
    }

    /// Connect and read timeout for every API request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Bound on the total time a problem may spend in the polling stage.
    pub fn polling_timeout(mut self, timeout: Duration) -> Self {
        self.config.polling_timeout = Some(timeout);
        self
    }

    /// Forces connection close after each request.
    pub fn connection_close(mut self, close: bool) -> Self {
        self.config.connection_close = close;
        self
    }

    /// Overrides the poll back-off bounds. Intended for tests and unusual
    /// deployments; defaults are [`POLL_BACKOFF_MIN`] and
    /// [`POLL_BACKOFF_MAX`].
    pub fn poll_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.poll_backoff_min = Some(min);
        self.poll_backoff_max = Some(max);
        self
    }

    /// Builds the client and starts its worker pools.
    pub fn build(self) -> Result<Client> {
        let config = self.config;

        let token = config
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::InvalidConfig("API token not defined".to_string()))?;
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);

        debug!(
            endpoint,
            solver = ?config.default_solver,
            request_timeout = ?config.request_timeout,
            polling_timeout = ?config.polling_timeout,
            "creating a client"
        );

        let session = Session::new(SessionOptions {
            endpoint,
            token,
            proxy: config.proxy.as_deref(),
            permissive_ssl: config.permissive_ssl,
            request_timeout: config.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            connection_close: config.connection_close,
        })?;

        let default_solver = config
            .default_solver
            .as_deref()
            .map(SolverQuery::from_spec)
            .unwrap_or_default();

        let inner = Arc::new(ClientInner {
            session,
            default_solver,
            polling_timeout: config.polling_timeout,
            poll_backoff_min: self.poll_backoff_min.unwrap_or(POLL_BACKOFF_MIN),
            poll_backoff_max: self.poll_backoff_max.unwrap_or(POLL_BACKOFF_MAX),
            submission_queue: WorkQueue::new(),
            cancel_queue: WorkQueue::new(),
            poll_queue: ScheduleQueue::new(),
            results_queue: WorkQueue::new(),
            catalog: Catalog::new(SOLVERS_CACHE_MAXAGE),
            next_local_id: AtomicU64::new(0),
        });

        let mut workers = Vec::new();
        for _ in 0..SUBMISSION_WORKER_COUNT {
            workers.push(tokio::spawn(submit::run(inner.clone())));
        }
        for _ in 0..CANCEL_WORKER_COUNT {
            workers.push(tokio::spawn(cancel::run(inner.clone())));
        }
        for _ in 0..POLL_WORKER_COUNT {
            workers.push(tokio::spawn(poll::run(inner.clone())));
        }
        for _ in 0..RESULT_WORKER_COUNT {
            workers.push(tokio::spawn(results::run(inner.clone())));
        }

        Ok(Client {
            inner,
            workers: Mutex::new(workers),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_inner(polling_timeout: Option<Duration>) -> Arc<ClientInner> {
    let session = Session::new(SessionOptions {
        endpoint: "https://localhost/sapi",
        token: "token",
        proxy: None,
        permissive_ssl: false,
        request_timeout: DEFAULT_REQUEST_TIMEOUT,
        connection_close: false,
    })
    .expect("test session");

    Arc::new(ClientInner {
        session,
        default_solver: SolverQuery::new(),
        polling_timeout,
        poll_backoff_min: POLL_BACKOFF_MIN,
        poll_backoff_max: POLL_BACKOFF_MAX,
        submission_queue: WorkQueue::new(),
        cancel_queue: WorkQueue::new(),
        poll_queue: ScheduleQueue::new(),
        results_queue: WorkQueue::new(),
        catalog: Catalog::new(SOLVERS_CACHE_MAXAGE),
        next_local_id: AtomicU64::new(0),
    })
}
