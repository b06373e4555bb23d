use crate::models::{ExceptionDetails, Measurements, Properties, Sanitize};
use serde::Serialize;

/// An instance of Exception represents a handled or unhandled exception that occurred during
/// execution of the monitored application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExceptionData {
    /// Schema version
    pub(crate) ver: i32,

    /// Always `UserCode`.
    pub(crate) handled_at: &'static str,

    /// Exception chain - list of inner exceptions.
    pub(crate) exceptions: Vec<ExceptionDetails>,

    /// Collection of custom properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,

    /// Collection of custom measurements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) measurements: Option<Measurements>,
}

impl Sanitize for ExceptionData {
    fn sanitize(&mut self) {
        for exception in self.exceptions.iter_mut() {
            exception.sanitize();
        }
        self.properties.sanitize();
        self.measurements.sanitize();
    }
}
