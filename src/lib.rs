//! Asynchronous client runtime for the D-Wave solver API.
//!
//! The client handles communication with remote solver resources: problem
//! submission, status monitoring, answer retrieval, and cancellation.
//! Problems are accepted from any number of tasks, batched into shared API
//! requests by background worker pools, and tracked through per-problem
//! [`Computation`] handles that settle exactly once.
//!
//! Problem payloads are opaque to the pipeline: callers serialize problems
//! with their codec of choice before [`Client::submit`] and decode the
//! answer JSON a settled computation yields.
//!
//! ```no_run
//! # async fn example() -> dwave_cloud::Result<()> {
//! use dwave_cloud::{Client, SolverQuery};
//! use serde_json::json;
//!
//! let client = Client::builder().token("secret").build()?;
//!
//! let solver = client
//!     .get_solver(Some(SolverQuery::new().filter("num_qubits__gte", json!(2000))))
//!     .await?;
//! let problem = json!({
//!     "solver": solver.id(),
//!     "type": "ising",
//!     "data": "...",
//!     "params": {"num_reads": 100},
//! });
//!
//! let computation = client.submit(problem.to_string());
//! let answer = computation.wait_result(None).await?;
//! println!("energies: {}", answer["energies"]);
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod catalog;
mod client;
mod computation;
mod config;
mod error;
mod filter;
mod message;
mod queue;
mod solver;
mod transport;

pub use self::client::{Client, ClientBuilder, POLL_BACKOFF_MAX, POLL_BACKOFF_MIN};
pub use self::computation::Computation;
pub use self::config::{Config, DEFAULT_ENDPOINT};
pub use self::error::{Error, Result};
pub use self::filter::SolverQuery;
pub use self::message::{RemoteStatus, StatusRecord};
pub use self::solver::Solver;
