use crate::models::{truncate_chars, Measurements, Properties, Sanitize};
use serde::Serialize;

/// An instance of Request represents completion of an external request to the application to do
/// work and contains a summary of that request execution and the results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestData {
    pub(crate) ver: i32,
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) start_time: String,
    /// Formatted as `[d.]hh:mm:ss.fff`.
    pub(crate) duration: String,
    pub(crate) response_code: String,
    pub(crate) success: bool,
    pub(crate) http_method: String,
    pub(crate) url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}

impl Sanitize for RequestData {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.id, 128);
        truncate_chars(&mut self.name, 1024);
        truncate_chars(&mut self.response_code, 1024);
        truncate_chars(&mut self.url, 2048);
        self.properties.sanitize();
        self.measurements.sanitize();
    }
}
