use crate::{
    channel::{Channel, ChannelConfig, HttpTransport, Transport, DEFAULT_ENDPOINT},
    connection_string::ConnectionString,
    context::{Application, Device, TelemetryContext, User},
    middleware::{HandlerError, RequestContext, RequestInstrumentation, ResponseStatus},
    telemetry::EventTelemetry,
    Error, HttpClient, TelemetryClient,
};
use chrono::{DateTime, Utc};
use http::{request::Parts, Request, Uri};
use std::{fmt, fmt::Display, future::Future, sync::Arc};

/// Environment variable read by [`new_instrumentation_from_env`].
pub const CONNECTION_STRING_ENV: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";

const STOP_EVENT_NAME: &str = "Application_Stop";

type TransportFactory = Box<dyn FnOnce(Uri, bool) -> Box<dyn Transport> + Send>;
type Configure = Box<dyn FnOnce(RequestInstrumentation) -> RequestInstrumentation + Send>;

/// Create a builder for request instrumentation sending to the given instrumentation key.
///
/// ```no_run
/// # async fn run<C: async_application_insights::HttpClient + 'static>(
/// #     http_client: C,
/// # ) -> Result<(), async_application_insights::Error> {
/// use async_application_insights::{new_instrumentation, Application};
///
/// let instrumentation = new_instrumentation("<instrumentation key>")
///     .with_application(Application::new("1.0.0"))
///     .with_request_filter(|parts| parts.uri.path() == "/health")
///     .with_http_client(http_client)
///     .build()?;
///
/// let request = http::Request::get("/hello").body(()).unwrap();
/// let status = instrumentation
///     .instrument(request, |_request| async {
///         Ok::<_, http::StatusCode>(http::StatusCode::OK)
///     })
///     .await
///     .unwrap_or_else(|rejection| rejection);
/// assert_eq!(http::StatusCode::OK, status);
///
/// instrumentation.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub fn new_instrumentation(instrumentation_key: impl Into<String>) -> InstrumentationBuilder {
    InstrumentationBuilder {
        instrumentation_key: instrumentation_key.into(),
        endpoint: Uri::from_static(DEFAULT_ENDPOINT),
        gzip: false,
        application: None,
        device: None,
        channel_config: ChannelConfig::default(),
        transport: None,
        configure: Vec::new(),
    }
}

/// Create a builder from a connection string, e.g.
/// `InstrumentationKey=...;IngestionEndpoint=https://westeurope-1.in.applicationinsights.azure.com/`.
pub fn new_instrumentation_from_connection_string(
    connection_string: impl AsRef<str>,
) -> Result<InstrumentationBuilder, Error> {
    let connection_string: ConnectionString = connection_string.as_ref().parse()?;
    Ok(new_instrumentation(connection_string.instrumentation_key)
        .with_endpoint(connection_string.track_endpoint))
}

/// Create a builder from the connection string in `APPLICATIONINSIGHTS_CONNECTION_STRING`.
pub fn new_instrumentation_from_env() -> Result<InstrumentationBuilder, Error> {
    let connection_string = std::env::var(CONNECTION_STRING_ENV)
        .map_err(|_| Error::ArgumentNull(CONNECTION_STRING_ENV))?;
    new_instrumentation_from_connection_string(connection_string)
}

/// Configuration of request instrumentation. Create one with [`new_instrumentation`].
pub struct InstrumentationBuilder {
    instrumentation_key: String,
    endpoint: Uri,
    gzip: bool,
    application: Option<Application>,
    device: Option<Device>,
    channel_config: ChannelConfig,
    transport: Option<TransportFactory>,
    configure: Vec<Configure>,
}

impl fmt::Debug for InstrumentationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationBuilder")
            .field("endpoint", &self.endpoint)
            .field("gzip", &self.gzip)
            .field("application", &self.application)
            .field("device", &self.device)
            .field("channel_config", &self.channel_config)
            .field("transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl InstrumentationBuilder {
    /// Describe the application in every envelope.
    pub fn with_application(mut self, application: Application) -> Self {
        self.application = Some(application);
        self
    }

    /// Use the given device description instead of the detected one.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Use a different clock for request start times.
    pub fn with_clock<F>(self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.configure(move |wrapper| wrapper.with_clock(clock))
    }

    /// Resolve the user of a request after its handler ran.
    pub fn with_user_resolver<F>(self, resolver: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<User> + Send + Sync + 'static,
    {
        self.configure(move |wrapper| wrapper.with_user_resolver(resolver))
    }

    /// Decide which status codes count as success.
    pub fn with_success_classifier<F>(self, classifier: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.configure(move |wrapper| wrapper.with_success_classifier(classifier))
    }

    /// Skip instrumentation for requests the filter returns `true` for.
    pub fn with_request_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.configure(move |wrapper| wrapper.with_request_filter(filter))
    }

    /// Post telemetry with the given HTTP client.
    ///
    /// With one of the `reqwest-client*` features enabled a [`reqwest::Client`] is created when no
    /// client or transport is set.
    pub fn with_http_client<C: HttpClient + 'static>(mut self, client: C) -> Self {
        self.transport = Some(Box::new(
            move |endpoint: Uri, gzip: bool| -> Box<dyn Transport> {
                Box::new(
                    HttpTransport::new(client)
                        .with_endpoint(endpoint)
                        .with_gzip(gzip),
                )
            },
        ));
        self
    }

    /// Send telemetry with a custom transport. Endpoint and gzip settings don't apply.
    pub fn with_transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(move |_: Uri, _: bool| -> Box<dyn Transport> {
            Box::new(transport)
        }));
        self
    }

    /// Tune buffering and flushing.
    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Post to a different collector endpoint.
    pub fn with_endpoint(mut self, endpoint: Uri) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Compress request bodies with gzip.
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    fn configure<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(RequestInstrumentation) -> RequestInstrumentation + Send + 'static,
    {
        self.configure.push(Box::new(configure));
        self
    }

    /// Create the client, its channel and the request wrapper.
    ///
    /// Fails with [`Error::ArgumentNull`] when the instrumentation key is blank, or when neither a
    /// transport nor an HTTP client is configured and no `reqwest-client*` feature is enabled.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn build(self) -> Result<Instrumentation, Error> {
        if self.instrumentation_key.trim().is_empty() {
            return Err(Error::ArgumentNull("instrumentation_key"));
        }

        let transport = match self.transport {
            Some(factory) => factory(self.endpoint, self.gzip),
            None => default_transport(self.endpoint, self.gzip)?,
        };
        let channel = Channel::with_config(transport, self.channel_config);

        let mut client = TelemetryClient::new(self.instrumentation_key, channel)?;
        if let Some(application) = self.application {
            client = client.with_application(application);
        }
        if let Some(device) = self.device {
            client = client.with_device(device);
        }
        let client = Arc::new(client);

        let wrapper = self
            .configure
            .into_iter()
            .fold(RequestInstrumentation::new(Arc::clone(&client)), |wrapper, configure| {
                configure(wrapper)
            });

        Ok(Instrumentation { client, wrapper })
    }
}

#[cfg(any(
    feature = "reqwest-client",
    feature = "reqwest-client-rustls",
    feature = "reqwest-client-vendored-tls"
))]
fn default_transport(endpoint: Uri, gzip: bool) -> Result<Box<dyn Transport>, Error> {
    Ok(Box::new(
        HttpTransport::new(reqwest::Client::new())
            .with_endpoint(endpoint)
            .with_gzip(gzip),
    ))
}

#[cfg(not(any(
    feature = "reqwest-client",
    feature = "reqwest-client-rustls",
    feature = "reqwest-client-vendored-tls"
)))]
fn default_transport(_endpoint: Uri, _gzip: bool) -> Result<Box<dyn Transport>, Error> {
    Err(Error::ArgumentNull("transport"))
}

/// A telemetry client together with the request wrapper using it.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    client: Arc<TelemetryClient>,
    wrapper: RequestInstrumentation,
}

impl Instrumentation {
    /// Client for tracking additional telemetry.
    pub fn client(&self) -> &Arc<TelemetryClient> {
        &self.client
    }

    /// The request wrapper.
    pub fn wrapper(&self) -> &RequestInstrumentation {
        &self.wrapper
    }

    /// Run `handler` for `request` and track it. See [`RequestInstrumentation::instrument`].
    pub async fn instrument<B, F, Fut, T, E>(&self, request: Request<B>, handler: F) -> Result<T, E>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ResponseStatus,
        E: HandlerError + Display,
    {
        self.wrapper.instrument(request, handler).await
    }

    /// Track the `Application_Stop` event, flush and dispose the client.
    ///
    /// The client is disposed even if tracking the event fails. Shutting down twice does nothing.
    pub async fn shutdown(&self) -> Result<(), Error> {
        if self.client.is_disposed() {
            return Ok(());
        }
        let stopped = self
            .client
            .track_event(
                EventTelemetry::new(STOP_EVENT_NAME),
                &TelemetryContext::default(),
            )
            .await;
        let disposed = self.client.dispose().await;
        stopped.and(disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::InMemoryTransport,
        connection_string::ParseError,
        models::{Data, Envelope},
    };
    use http::StatusCode;
    use std::convert::Infallible;

    fn device() -> Device {
        Device {
            id: "host".into(),
            type_name: "PC".into(),
            os_version: "Linux".into(),
            locale: None,
        }
    }

    fn event_name(envelope: &Envelope) -> Option<&str> {
        match envelope.data() {
            Data::Event(data) => Some(&data.name),
            _ => None,
        }
    }

    #[tokio::test]
    async fn instrument_and_shutdown() {
        let transport = InMemoryTransport::new();
        let instrumentation = new_instrumentation("ikey")
            .with_device(device())
            .with_success_classifier(|status| status < 500)
            .with_transport(transport.clone())
            .build()
            .unwrap();

        let status = instrumentation
            .instrument(Request::get("/").body(()).unwrap(), |_| async {
                Ok::<_, Infallible>(StatusCode::BAD_REQUEST)
            })
            .await
            .unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert!(transport.envelopes().is_empty());

        instrumentation.shutdown().await.unwrap();
        let envelopes = transport.envelopes();
        assert_eq!(2, envelopes.len());
        match envelopes[0].data() {
            Data::Request(data) => assert!(data.success),
            _ => panic!("we should not get here"),
        }
        assert_eq!(Some(STOP_EVENT_NAME), event_name(&envelopes[1]));
        assert!(transport.is_disposed());

        instrumentation.shutdown().await.unwrap();
        assert_eq!(2, transport.envelopes().len());
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        let err = new_instrumentation(" ")
            .with_transport(InMemoryTransport::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ArgumentNull("instrumentation_key")));
    }

    #[cfg(not(any(
        feature = "reqwest-client",
        feature = "reqwest-client-rustls",
        feature = "reqwest-client-vendored-tls"
    )))]
    #[tokio::test]
    async fn transport_is_required_without_reqwest() {
        let err = new_instrumentation("ikey").build().unwrap_err();
        assert!(matches!(err, Error::ArgumentNull("transport")));
    }

    #[test]
    fn endpoint_from_connection_string() {
        let builder = new_instrumentation_from_connection_string(
            "InstrumentationKey=ikey;IngestionEndpoint=https://westeurope-1.in.applicationinsights.azure.com/",
        )
        .unwrap();
        assert_eq!("ikey", builder.instrumentation_key);
        assert_eq!(
            "https://westeurope-1.in.applicationinsights.azure.com/v2/track",
            builder.endpoint.to_string()
        );

        let builder = new_instrumentation_from_connection_string("InstrumentationKey=ikey").unwrap();
        assert_eq!(DEFAULT_ENDPOINT, builder.endpoint.to_string());
    }

    #[test]
    fn invalid_connection_string() {
        let err = new_instrumentation_from_connection_string("IngestionEndpoint=x").unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionString(ParseError::MissingInstrumentationKey)
        ));
    }

    #[test]
    fn connection_string_from_env() {
        std::env::set_var(CONNECTION_STRING_ENV, "InstrumentationKey=from-env");
        let builder = new_instrumentation_from_env().unwrap();
        assert_eq!("from-env", builder.instrumentation_key);
        std::env::remove_var(CONNECTION_STRING_ENV);
        assert!(matches!(
            new_instrumentation_from_env(),
            Err(Error::ArgumentNull(CONNECTION_STRING_ENV))
        ));
    }
}
