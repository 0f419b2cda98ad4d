//! MI command execution.

use std::future::Future;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{MiError, Result};
use crate::node::{Node, decode};

/// Default per-request timeout of [`MiJsonClient`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes MI commands against a monitored OpenSIPS instance.
///
/// A successful result is the decoded MI tree of the command's response.
/// Implementations own transport concerns (timeouts, connection reuse);
/// callers never retry.
pub trait CommandExecutor: Send + Sync {
    /// Run `command` with the given positional arguments.
    fn execute(&self, command: &str, args: &[&str]) -> impl Future<Output = Result<Node>> + Send;
}

/// Client for the OpenSIPS `mi_json` HTTP interface.
///
/// Commands are issued as `GET <url>/<command>?params=<arg1>,<arg2>`.
#[derive(Debug, Clone)]
pub struct MiJsonClient {
    url: String,
    client: reqwest::Client,
}

impl MiJsonClient {
    /// Create a client for the given `mi_json` base URL.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| MiError::InvalidUrl(format!("{}: {}", url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(MiError::InvalidUrl(url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL commands are appended to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CommandExecutor for MiJsonClient {
    async fn execute(&self, command: &str, args: &[&str]) -> Result<Node> {
        let url = format!("{}/{}", self.url, command);
        let mut request = self.client.get(&url);
        if !args.is_empty() {
            request = request.query(&[("params", args.join(","))]);
        }

        debug!(command, ?args, "Executing MI command");

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(MiError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        trace!(command, bytes = body.len(), "Received MI response");

        parse_response(&body)
    }
}

/// Parse a raw `mi_json` response body into an MI tree.
///
/// The body must be a JSON object. An object carrying an `error` key is
/// reported as [`MiError::Remote`].
pub fn parse_response(body: &[u8]) -> Result<Node> {
    let value: Value = serde_json::from_slice(body)?;
    let map = value.as_object().ok_or(MiError::NotAnObject)?;

    if let Some(error) = map.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(MiError::Remote(message.to_string()));
    }

    Ok(decode(&value)?)
}
