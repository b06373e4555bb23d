pub mod context_tag_keys;
mod data;
mod data_point;
mod envelope;
mod event_data;
mod exception_data;
mod exception_details;
mod message_data;
mod metric_data;
mod request_data;
mod sanitize;
mod severity_level;

pub(crate) use data::*;
pub(crate) use data_point::*;
pub use envelope::*;
pub(crate) use event_data::*;
pub(crate) use exception_data::*;
pub(crate) use exception_details::*;
pub(crate) use message_data::*;
pub(crate) use metric_data::*;
pub(crate) use request_data::*;
pub(crate) use sanitize::*;
pub use severity_level::*;

/// Custom properties attached to telemetry.
pub type Properties = std::collections::BTreeMap<String, String>;

/// Custom measurements attached to telemetry.
pub type Measurements = std::collections::BTreeMap<String, f64>;
