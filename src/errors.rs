use std::path::PathBuf;
use thiserror::Error;

use crate::bus::BusStatus;

/// Result type alias for alarm operations
pub type Result<T> = std::result::Result<T, AlarmError>;

/// Errors that can occur when delivering or receiving alarms
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Failed to build HTTP client
    #[error("Failed to build HTTP client: {0}")]
    BuildHttpClient(#[source] reqwest::Error),

    /// Alarm Manager URL could not be parsed
    #[error("Invalid Alarm Manager URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Failed to serialize an alarm message
    #[error("Failed to serialize alarm message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Inbound payload is not an alarm message
    #[error("Failed to decode alarm message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Bus bootstrap has not completed (or failed)
    #[error("bus error: not ready")]
    BusNotReady,

    /// Bus runtime rejected the message
    #[error("bus error: send via {endpoint} failed with status {status}")]
    BusSend {
        /// Destination the routing table points at
        endpoint: String,
        status: BusStatus,
    },

    /// Bus runtime could not be initialized
    #[error("bus error: init failed: {0}")]
    BusInit(String),

    /// Routing table document is malformed
    #[error("Invalid routing table at line {line}: {message}")]
    RouteTable { line: usize, message: String },

    /// Routing table file could not be written or read
    #[error("Routing table file {path}: {source}")]
    RouteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP POST to the Alarm Manager failed
    #[error("http error: post failed: {0}")]
    HttpPost(#[source] reqwest_middleware::Error),

    /// Alarm Manager answered with a non-success status
    #[error("http error: HTTP {status} - {message}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Every sink failed; one entry per attempted sink, in order
    #[error("{}", join_errors(.0))]
    Delivery(Vec<AlarmError>),

    /// The clear step of a re-raise failed, the raise was not attempted
    #[error("Reraise failed: {source}")]
    Reraise {
        #[source]
        source: Box<AlarmError>,
    },

    /// Bus receive queue is closed
    #[error("bus error: receive failed, bus closed")]
    ReceiveClosed,
}

fn join_errors(errors: &[AlarmError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" and  ")
}

impl AlarmError {
    /// Check if the error is retryable
    ///
    /// Returns `true` for:
    /// - Bus not ready yet, or transient bus send statuses
    /// - HTTP connection and timeout errors
    /// - Server errors (5xx status codes)
    /// - Aggregated failures where every member is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BusNotReady => true,
            Self::BusSend { status, .. } => status.is_transient(),
            Self::HttpPost(reqwest_middleware::Error::Reqwest(err)) => {
                err.is_connect() || err.is_timeout()
            }
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::Delivery(errors) => !errors.is_empty() && errors.iter().all(Self::is_retryable),
            Self::Reraise { source } => source.is_retryable(),
            _ => false,
        }
    }
}
