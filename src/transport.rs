//! Thin wrapper around the pooled HTTP session used by all pipeline stages.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, DATE};
use reqwest::{Proxy, Response, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Authenticated HTTP session bound to one API endpoint.
///
/// Safe for concurrent use; all stage workers share a single `Session` and
/// its connection pool.
#[derive(Debug)]
pub(crate) struct Session {
    http: reqwest::Client,
    endpoint: Url,
}

pub(crate) struct SessionOptions<'a> {
    pub endpoint: &'a str,
    pub token: &'a str,
    pub proxy: Option<&'a str>,
    pub permissive_ssl: bool,
    pub request_timeout: std::time::Duration,
    pub connection_close: bool,
}

impl Session {
    pub fn new(options: SessionOptions<'_>) -> Result<Self> {
        // A trailing slash keeps Url::join from replacing the last path
        // segment of the endpoint.
        let normalized = if options.endpoint.ends_with('/') {
            options.endpoint.to_string()
        } else {
            format!("{}/", options.endpoint)
        };
        let endpoint = Url::parse(&normalized)
            .map_err(|e| Error::InvalidConfig(format!("invalid endpoint URL: {e}")))?;

        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(options.token)
            .map_err(|_| Error::InvalidConfig("API token is not a valid header value".into()))?;
        headers.insert("X-Auth-Token", token);
        if options.connection_close {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(options.request_timeout);

        if let Some(proxy) = options.proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| Error::InvalidConfig(format!("invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }
        if options.permissive_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        debug!(endpoint = %endpoint, "created API session");
        Ok(Session { http, endpoint })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| Error::io(format!("invalid request path {path:?}: {e}")))
    }

    /// GET relative to the endpoint. Timeouts map to
    /// [`Error::RequestTimeout`]; HTTP status is left to the caller.
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path)?;
        Ok(self.http.get(url).send().await?)
    }

    /// POST a pre-serialized JSON body.
    pub async fn post_raw(&self, path: &str, body: String) -> Result<Response> {
        let url = self.url(path)?;
        Ok(self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?)
    }

    /// DELETE with a JSON body.
    pub async fn delete_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path)?;
        Ok(self.http.delete(url).json(body).send().await?)
    }
}

/// Reads the server wall-clock time from a response `Date` header.
pub(crate) fn server_date(response: &Response) -> Option<DateTime<Utc>> {
    let value = response.headers().get(DATE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Maps a non-success problem-API status to the error that settles the
/// affected computations. 401 is authentication; everything else at or
/// above 400 is I/O.
pub(crate) fn status_error(status: StatusCode) -> Option<Error> {
    if status == StatusCode::UNAUTHORIZED {
        Some(Error::Auth)
    } else if !status.is_success() {
        Some(Error::Io(format!("unexpected HTTP status {status}")))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session(endpoint: &str) -> Result<Session> {
        Session::new(SessionOptions {
            endpoint,
            token: "secret",
            proxy: None,
            permissive_ssl: false,
            request_timeout: Duration::from_secs(60),
            connection_close: false,
        })
    }

    #[test]
    fn joins_paths_under_endpoint() {
        let session = session("https://cloud.example.com/sapi").unwrap();

        let url = session.url("problems/").unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.com/sapi/problems/");

        let url = session.url("problems/?id=1,2").unwrap();
        assert_eq!(url.as_str(), "https://cloud.example.com/sapi/problems/?id=1,2");

        let url = session.url("solvers/remote/abc123/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com/sapi/solvers/remote/abc123/"
        );
    }

    #[test]
    fn rejects_malformed_endpoint() {
        assert!(matches!(session("not a url"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn maps_http_statuses() {
        assert_eq!(status_error(StatusCode::OK), None);
        assert_eq!(status_error(StatusCode::UNAUTHORIZED), Some(Error::Auth));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST),
            Some(Error::Io(_))
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE),
            Some(Error::Io(_))
        ));
    }
}
