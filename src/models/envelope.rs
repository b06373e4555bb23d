use crate::{
    convert::serialize_time,
    models::{context_tag_keys::Tags, truncate_chars, Data, Sanitize},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One telemetry item as sent to the collector: a payload plus routing metadata.
///
/// Envelopes are created by [`TelemetryClient`](crate::TelemetryClient) and are immutable
/// afterwards. Transports receive them in batches and usually serialize them with `serde_json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    ver: i32,
    name: &'static str,
    #[serde(serialize_with = "serialize_time")]
    time: DateTime<Utc>,
    sample_rate: f64,
    i_key: String,
    tags: Tags,
    data: Data,
}

impl Envelope {
    pub(crate) fn new(instrumentation_key: String, data: Data, tags: Tags) -> Self {
        Self::new_at(Utc::now(), instrumentation_key, data, tags)
    }

    pub(crate) fn new_at(
        time: DateTime<Utc>,
        instrumentation_key: String,
        mut data: Data,
        mut tags: Tags,
    ) -> Self {
        data.sanitize();
        tags.sanitize();
        let mut i_key = instrumentation_key;
        truncate_chars(&mut i_key, 1024);
        Envelope {
            ver: 1,
            name: data.envelope_name(),
            time,
            sample_rate: 100.0,
            i_key,
            tags,
            data,
        }
    }

    /// Envelope type name, e.g. `Microsoft.ApplicationInsights.Request`.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Payload type name, e.g. `RequestData`.
    pub fn data_type_name(&self) -> &str {
        self.data.base_type()
    }

    /// Time the telemetry was captured.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Instrumentation key the telemetry is sent to.
    pub fn instrumentation_key(&self) -> &str {
        &self.i_key
    }

    /// Context tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    #[cfg(test)]
    pub(crate) fn data(&self) -> &Data {
        &self.data
    }
}
