//! Typed telemetry items accepted by [`TelemetryClient`](crate::TelemetryClient).

use crate::models::{Measurements, Properties, SeverityLevel};
use chrono::{DateTime, TimeDelta, Utc};
use std::backtrace::Backtrace;

/// A named event, e.g. a user action or a lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTelemetry {
    /// Event name.
    pub name: String,
    /// Custom properties.
    pub properties: Option<Properties>,
    /// Custom measurements.
    pub measurements: Option<Measurements>,
}

impl EventTelemetry {
    /// Create an event with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        EventTelemetry {
            name: name.into(),
            properties: None,
            measurements: None,
        }
    }

    /// Attach custom properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Attach custom measurements.
    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }
}

/// A log message. Shows up as "trace" in the portal.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTelemetry {
    /// Trace message.
    pub message: String,
    /// Severity, [`SeverityLevel::Information`] by default.
    pub severity: SeverityLevel,
    /// Custom properties.
    pub properties: Option<Properties>,
}

impl TraceTelemetry {
    /// Create a trace with `Information` severity.
    pub fn new(message: impl Into<String>) -> Self {
        TraceTelemetry {
            message: message.into(),
            severity: SeverityLevel::default(),
            properties: None,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: SeverityLevel) -> Self {
        self.severity = severity;
        self
    }

    /// Attach custom properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Kind of a metric data point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataPointKind {
    /// A single measured value.
    #[default]
    Measurement,
    /// A pre-aggregated value; count, min, max and standard deviation describe the aggregate.
    Aggregation,
}

/// A single metric data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTelemetry {
    /// Metric name.
    pub name: String,
    /// Measured value, or the sum for aggregations.
    pub value: f64,
    /// Measurement or aggregation.
    pub kind: DataPointKind,
    /// Number of aggregated measurements.
    pub count: Option<i32>,
    /// Smallest aggregated measurement.
    pub min: Option<f64>,
    /// Largest aggregated measurement.
    pub max: Option<f64>,
    /// Standard deviation of the aggregated measurements.
    pub std_dev: Option<f64>,
    /// Custom properties.
    pub properties: Option<Properties>,
}

impl MetricTelemetry {
    /// Create a measurement.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        MetricTelemetry {
            name: name.into(),
            value,
            kind: DataPointKind::Measurement,
            count: None,
            min: None,
            max: None,
            std_dev: None,
            properties: None,
        }
    }

    /// Create an aggregation of `count` measurements with the given sum.
    pub fn aggregation(name: impl Into<String>, sum: f64, count: i32) -> Self {
        MetricTelemetry {
            kind: DataPointKind::Aggregation,
            count: Some(count),
            ..MetricTelemetry::new(name, sum)
        }
    }

    /// Set minimum and maximum of an aggregation.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Set the standard deviation of an aggregation.
    pub fn with_std_dev(mut self, std_dev: f64) -> Self {
        self.std_dev = Some(std_dev);
        self
    }

    /// Attach custom properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// An HTTP request handled by the application.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTelemetry {
    /// Request id. A random id is generated when missing.
    pub id: Option<String>,
    /// Request name, usually the path.
    pub name: String,
    /// Full request URL.
    pub url: String,
    /// Whether the server handled the request successfully.
    pub success: bool,
    /// Time the request was received. Defaults to the time of tracking.
    pub start_time: Option<DateTime<Utc>>,
    /// Time it took to handle the request. Must not be negative.
    pub duration: TimeDelta,
    /// HTTP status code of the response.
    pub response_code: u16,
    /// HTTP method.
    pub http_method: String,
    /// Custom properties.
    pub properties: Option<Properties>,
    /// Custom measurements.
    pub measurements: Option<Measurements>,
}

impl RequestTelemetry {
    /// Create a request record with zero duration.
    pub fn new(
        http_method: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        response_code: u16,
        success: bool,
    ) -> Self {
        RequestTelemetry {
            id: None,
            name: name.into(),
            url: url.into(),
            success,
            start_time: None,
            duration: TimeDelta::zero(),
            response_code,
            http_method: http_method.into(),
            properties: None,
            measurements: None,
        }
    }

    /// Set the request id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set start time and duration.
    pub fn with_timing(mut self, start_time: DateTime<Utc>, duration: TimeDelta) -> Self {
        self.start_time = Some(start_time);
        self.duration = duration;
        self
    }

    /// Attach custom properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Attach custom measurements.
    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }
}

/// An error or panic.
///
/// Type name and message default to a synthetic `Exception` / `Technical exception`. The stack is
/// taken from the attached backtrace, or captured where the exception is tracked.
#[derive(Debug, Default)]
pub struct ExceptionTelemetry {
    /// Type of the error.
    pub type_name: Option<String>,
    /// Error message.
    pub message: Option<String>,
    /// Stack of the error. Captured at the tracking site when missing.
    pub backtrace: Option<Backtrace>,
    /// Number of innermost frames to leave out of the recorded stack.
    pub skip_frames: usize,
    /// Custom properties. Source lines of the stack are added as `code_0`, `code_1`, ...
    pub properties: Option<Properties>,
    /// Custom measurements.
    pub measurements: Option<Measurements>,
}

impl ExceptionTelemetry {
    /// Create a synthetic exception.
    pub fn new() -> Self {
        ExceptionTelemetry::default()
    }

    /// Describe the given error using its type name and `Display` output.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::fmt::Display + ?Sized,
    {
        ExceptionTelemetry {
            type_name: Some(std::any::type_name::<E>().to_string()),
            message: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Set the type name.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Use a previously captured backtrace.
    pub fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    /// Leave the given number of innermost frames out of the stack.
    pub fn with_skip_frames(mut self, skip_frames: usize) -> Self {
        self.skip_frames = skip_frames;
        self
    }

    /// Attach custom properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Attach custom measurements.
    pub fn with_measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }
}
