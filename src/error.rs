use crate::connection_string::ParseError;
use std::{error::Error as StdError, fmt::Debug, time::Duration};

/// Errors that occurred while recording or transmitting telemetry.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A required configuration value was missing, empty or whitespace only.
    #[error("parameter cannot be null or empty: `{0}`")]
    ArgumentNull(&'static str),

    /// A value was given that can never be valid, e.g. a negative request duration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation does not make sense in the current state, e.g. tracking telemetry with a
    /// client that was already disposed.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The collector answered with a status other than 200. The batch is dropped.
    #[error("response status does not indicate success: {status}; response body: {body}")]
    TransmissionFailed {
        /// HTTP status code returned by the collector.
        status: u16,
        /// Response body returned by the collector.
        body: String,
    },

    /// Telemetry data failed to serialize to JSON. Telemetry reporting failed because of this.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing upload request failed with {0}")]
    UploadSerializeRequest(serde_json::Error),

    /// Telemetry data failed to compress. Telemetry reporting failed because of this.
    #[error("compressing upload request failed with {0}")]
    UploadCompressRequest(std::io::Error),

    /// Could not complete the HTTP request to the collector. Telemetry reporting failed because
    /// of this.
    #[error("sending upload request failed with {0}")]
    UploadConnection(Box<dyn StdError + Send + Sync + 'static>),

    /// The transport did not complete a batch within the configured send timeout.
    #[error("sending upload request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    ConnectionString(#[from] ParseError),
}
