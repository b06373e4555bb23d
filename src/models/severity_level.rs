use serde_repr::Serialize_repr;

/// Severity of trace telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize_repr)]
#[repr(u8)]
pub enum SeverityLevel {
    /// Diagnostic noise.
    Verbose = 0,
    /// Normal operation.
    #[default]
    Information = 1,
    /// Something unexpected that the application recovered from.
    Warning = 2,
    /// An operation failed.
    Error = 3,
    /// The application cannot continue.
    Critical = 4,
}

impl From<tracing::Level> for SeverityLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => SeverityLevel::Error,
            tracing::Level::WARN => SeverityLevel::Warning,
            tracing::Level::INFO => SeverityLevel::Information,
            _ => SeverityLevel::Verbose,
        }
    }
}
