use crate::models::{truncate_chars, Sanitize};
use serde::Serialize;

/// Metric data single measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataPoint {
    /// Name of the metric.
    pub(crate) name: String,

    /// Metric type. Single measurement or the aggregated value.
    #[serde(flatten)]
    pub(crate) kind: DataPointType,

    /// Single value for measurement. Sum of individual measurements for the aggregation.
    pub(crate) value: f64,
}

/// Type of the metric data measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub(crate) enum DataPointType {
    Measurement,
    Aggregation {
        /// Metric weight of the aggregated metric. Should not be set for a measurement.
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<i32>,

        /// Minimum value of the aggregated metric. Should not be set for a measurement.
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,

        /// Maximum value of the aggregated metric. Should not be set for a measurement.
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,

        /// Standard deviation of the aggregated metric. Should not be set for a measurement.
        #[serde(rename = "stdDev", skip_serializing_if = "Option::is_none")]
        std_dev: Option<f64>,
    },
}

impl Sanitize for DataPoint {
    fn sanitize(&mut self) {
        truncate_chars(&mut self.name, 1024);
    }
}
