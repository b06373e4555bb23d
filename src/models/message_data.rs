use crate::models::{truncate_chars, Properties, Sanitize, SeverityLevel};
use serde::Serialize;

/// Instances of Message represent printf-like trace statements that are text-searched. The
/// message does not have measurements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageData {
    /// Schema version
    pub(crate) ver: i32,

    /// Trace message
    pub(crate) message: String,

    /// Trace severity level.
    pub(crate) severity_level: SeverityLevel,

    /// Collection of custom properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) properties: Option<Properties>,
}

impl Sanitize for MessageData {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.message, 32768);
        self.properties.sanitize();
    }
}
