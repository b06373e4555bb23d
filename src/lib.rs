//! An asynchronous [Azure Application Insights] client.
//!
//! [Azure Application Insights]: https://docs.microsoft.com/en-us/azure/azure-monitor/app/app-insights-overview
//!
//! **Disclaimer**: This is not an official Microsoft product.
//!
//! Telemetry is tracked through a [`TelemetryClient`] and handed to a [`Channel`], which buffers
//! envelopes and sends them in batches through a [`Transport`]. The default transport posts JSON
//! to the Application Insights collector with any [`HttpClient`].
//!
//! # Usage
//!
//! Instrument request handlers:
//!
//! ```no_run
//! # async fn run<C: async_application_insights::HttpClient + 'static>(
//! #     http_client: C,
//! # ) -> Result<(), async_application_insights::Error> {
//! use async_application_insights::new_instrumentation_from_env;
//! use http::{Request, StatusCode};
//!
//! let instrumentation = new_instrumentation_from_env()?
//!     .with_http_client(http_client)
//!     .build()?;
//! let _panics = instrumentation.client().handle_panics();
//!
//! let request = Request::get("/hello").body(()).unwrap();
//! let status = instrumentation
//!     .instrument(request, |_request| async { Ok::<_, StatusCode>(StatusCode::OK) })
//!     .await
//!     .unwrap_or_else(|rejection| rejection);
//! assert_eq!(StatusCode::OK, status);
//!
//! instrumentation.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Or track telemetry directly:
//!
//! ```no_run
//! # async fn run() -> Result<(), async_application_insights::Error> {
//! use async_application_insights::{
//!     Channel, EventTelemetry, InMemoryTransport, TelemetryClient, TelemetryContext,
//! };
//!
//! let client = TelemetryClient::new("<instrumentation key>", Channel::new(InMemoryTransport::new()))?;
//! client
//!     .track_event(EventTelemetry::new("started"), &TelemetryContext::default())
//!     .await?;
//! client.dispose().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Batching
//!
//! Envelopes are buffered until the buffer holds [`DEFAULT_MAX_BATCH_LEN`] items, until
//! [`TelemetryClient::flush`] is called or, when configured, until the flush interval elapses.
//! Failed batches are dropped. There is no retry.
//!
//! # Features
//!
//! - `reqwest-client`, `reqwest-client-vendored-tls`, `reqwest-client-rustls`: use a
//!   [`reqwest`](https://docs.rs/reqwest) client when
//!   [`InstrumentationBuilder`] is given neither a transport nor an HTTP client.
#![doc(html_root_url = "https://docs.rs/async-application-insights/0.1.0")]
#![warn(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod channel;
mod client;
mod connection_string;
mod context;
mod convert;
mod error;
mod exception;
mod instrumentation;
mod middleware;
mod models;
mod panic_hook;
mod tags;
mod telemetry;
mod uploader;

pub use channel::{
    Channel, ChannelConfig, HttpTransport, InMemoryTransport, Transport, DEFAULT_ENDPOINT,
    DEFAULT_MAX_BATCH_LEN, DEFAULT_QUEUE_CAPACITY,
};
pub use client::TelemetryClient;
pub use connection_string::ParseError;
pub use context::{Application, Device, Operation, Session, TelemetryContext, User};
pub use error::Error;
pub use instrumentation::{
    new_instrumentation, new_instrumentation_from_connection_string,
    new_instrumentation_from_env, Instrumentation, InstrumentationBuilder, CONNECTION_STRING_ENV,
};
pub use middleware::{
    is_success_status, HandlerError, RequestContext, RequestInstrumentation, ResponseStatus,
};
pub use models::{context_tag_keys, Envelope, Measurements, Properties, SeverityLevel};
pub use opentelemetry_http::HttpClient;
pub use panic_hook::PanicHookGuard;
pub use telemetry::{
    DataPointKind, EventTelemetry, ExceptionTelemetry, MetricTelemetry, RequestTelemetry,
    TraceTelemetry,
};
