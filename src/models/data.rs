use crate::models::{EventData, ExceptionData, MessageData, MetricData, RequestData, Sanitize};
use serde::Serialize;

/// Payload of an envelope. Serialized with the collector's `baseType`/`baseData` layout, so the
/// type names on the wire always follow the variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "baseType", content = "baseData")]
pub(crate) enum Data {
    #[serde(rename = "EventData")]
    Event(EventData),
    #[serde(rename = "ExceptionData")]
    Exception(ExceptionData),
    #[serde(rename = "MessageData")]
    Message(MessageData),
    #[serde(rename = "MetricData")]
    Metric(MetricData),
    #[serde(rename = "RequestData")]
    Request(RequestData),
}

impl Data {
    /// Envelope name the collector expects for this payload.
    pub(crate) fn envelope_name(&self) -> &'static str {
        match self {
            Data::Event(_) => "Microsoft.ApplicationInsights.Event",
            Data::Exception(_) => "Microsoft.ApplicationInsights.Exception",
            Data::Message(_) => "Microsoft.ApplicationInsights.Message",
            Data::Metric(_) => "Microsoft.ApplicationInsights.Metric",
            Data::Request(_) => "Microsoft.ApplicationInsights.Request",
        }
    }

    /// Value of `baseType`.
    pub(crate) fn base_type(&self) -> &'static str {
        match self {
            Data::Event(_) => "EventData",
            Data::Exception(_) => "ExceptionData",
            Data::Message(_) => "MessageData",
            Data::Metric(_) => "MetricData",
            Data::Request(_) => "RequestData",
        }
    }
}

impl Sanitize for Data {
    fn sanitize(&mut self) {
        match self {
            Data::Event(data) => data.sanitize(),
            Data::Exception(data) => data.sanitize(),
            Data::Message(data) => data.sanitize(),
            Data::Metric(data) => data.sanitize(),
            Data::Request(data) => data.sanitize(),
        }
    }
}
