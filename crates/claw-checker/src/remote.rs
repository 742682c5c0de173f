//! Remote render endpoint for pull triggers.
//!
//! Pull triggers are evaluated by a Graphite-compatible render service. The
//! request and response use the `carbonapi_v3_pb` protobuf messages, encoded
//! with prost.

use std::time::Duration;

use prost::Message;
use thiserror::Error;
use tracing::debug;

use crate::timeseries::TimeSeries;

/// Path and format query of the render endpoint.
pub const RENDER_PATH: &str = "/render/?format=carbonapi_v3_pb";

/// Errors raised by a remote source.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The HTTP request failed.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("bad response status: {0}")]
    Status(u16),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// A source of series evaluated somewhere else.
pub trait RemoteSource: Send + Sync {
    /// Evaluates `target` over `[from, until]`.
    ///
    /// # Errors
    ///
    /// Returns a `RemoteError` if the source fails.
    fn fetch(&self, target: &str, from: i64, until: i64) -> Result<Vec<TimeSeries>, RemoteError>;
}

/// One target to evaluate.
#[derive(Clone, PartialEq, Message)]
pub struct FetchRequest {
    /// Target name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Start of the window.
    #[prost(int64, tag = "2")]
    pub start_time: i64,
    /// End of the window.
    #[prost(int64, tag = "3")]
    pub stop_time: i64,
    /// Whether timestamps are in milliseconds.
    #[prost(bool, tag = "4")]
    pub high_precision_timestamps: bool,
    /// Target expression.
    #[prost(string, tag = "5")]
    pub path_expression: String,
    /// Maximum number of points to return (0 for no limit).
    #[prost(int64, tag = "7")]
    pub max_data_points: i64,
}

/// A batch of targets to evaluate.
#[derive(Clone, PartialEq, Message)]
pub struct MultiFetchRequest {
    /// The targets.
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchRequest>,
}

/// One evaluated series.
#[derive(Clone, PartialEq, Message)]
pub struct FetchResponse {
    /// Series name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Target expression that produced the series.
    #[prost(string, tag = "2")]
    pub path_expression: String,
    /// Consolidation function.
    #[prost(string, tag = "3")]
    pub consolidation_func: String,
    /// Timestamp of the first value.
    #[prost(int64, tag = "4")]
    pub start_time: i64,
    /// Timestamp just past the last value.
    #[prost(int64, tag = "5")]
    pub stop_time: i64,
    /// Seconds between values.
    #[prost(int64, tag = "6")]
    pub step_time: i64,
    /// Fraction of known values required when consolidating.
    #[prost(float, tag = "7")]
    pub x_files_factor: f32,
    /// Whether timestamps are in milliseconds.
    #[prost(bool, tag = "8")]
    pub high_precision_timestamps: bool,
    /// Values; NaN marks a gap.
    #[prost(double, repeated, tag = "9")]
    pub values: Vec<f64>,
}

/// All series produced for a request.
#[derive(Clone, PartialEq, Message)]
pub struct MultiFetchResponse {
    /// The series.
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchResponse>,
}

impl MultiFetchRequest {
    /// Builds the request for a single target.
    #[must_use]
    pub fn for_target(target: &str, from: i64, until: i64) -> Self {
        Self {
            metrics: vec![FetchRequest {
                name: target.to_string(),
                start_time: from,
                stop_time: until,
                high_precision_timestamps: false,
                path_expression: target.to_string(),
                max_data_points: 0,
            }],
        }
    }
}

impl MultiFetchResponse {
    /// Converts the response into series.
    #[must_use]
    pub fn into_series(self) -> Vec<TimeSeries> {
        self.metrics
            .into_iter()
            .map(|m| TimeSeries {
                name: m.name,
                start_time: m.start_time,
                stop_time: m.stop_time,
                step_time: m.step_time,
                values: m.values,
                wildcard: false,
            })
            .collect()
    }
}

/// HTTP client for the render endpoint.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl RemoteClient {
    /// Creates a client for the render service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::Request` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        Ok(Self {
            url: format!("{}{RENDER_PATH}", base_url.trim_end_matches('/')),
            client,
        })
    }

    /// Returns the full render URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RemoteSource for RemoteClient {
    fn fetch(&self, target: &str, from: i64, until: i64) -> Result<Vec<TimeSeries>, RemoteError> {
        let body = MultiFetchRequest::for_target(target, from, until).encode_to_vec();
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-protobuf")
            .body(body)
            .send()
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        let decoded = MultiFetchResponse::decode(bytes.as_ref())
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        debug!(remote_target = %target, series = decoded.metrics.len(), "fetched remote series");
        Ok(decoded.into_series())
    }
}
