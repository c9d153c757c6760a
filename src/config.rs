//! Client configuration record.
//!
//! Configuration-file parsing lives outside this crate; a [`Config`] is the
//! record such a loader produces. [`Config::from_env`] covers the standard
//! environment variables for direct use.

use std::env;
use std::time::Duration;

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://cloud.dwavesys.com/sapi";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Inputs consumed when constructing a [`Client`](crate::Client).
///
/// Only `token` is required. `default_solver` is either a solver name or a
/// JSON feature-filter map, exactly as it appears in configuration files.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub default_solver: Option<String>,
    pub proxy: Option<String>,
    pub permissive_ssl: bool,
    pub request_timeout: Option<Duration>,
    pub polling_timeout: Option<Duration>,
    pub connection_close: bool,
}

impl Config {
    /// Builds a configuration from the `DWAVE_API_ENDPOINT`,
    /// `DWAVE_API_TOKEN`, `DWAVE_API_SOLVER` and `DWAVE_API_PROXY`
    /// environment variables. Unset and empty variables are ignored.
    pub fn from_env() -> Self {
        Config {
            endpoint: env_var("DWAVE_API_ENDPOINT"),
            token: env_var("DWAVE_API_TOKEN"),
            default_solver: env_var("DWAVE_API_SOLVER"),
            proxy: env_var("DWAVE_API_PROXY"),
            ..Config::default()
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
