use crate::{models::Envelope, uploader, Error, HttpClient};
use async_trait::async_trait;
use http::Uri;
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Wire transmission of telemetry batches.
///
/// A [`Channel`](crate::Channel) owns exactly one transport and calls it from a single task, so
/// implementations don't need interior synchronization.
#[async_trait]
pub trait Transport: Debug + Send + 'static {
    /// Transmit one batch. Items are in the order they were tracked.
    ///
    /// A failed batch is not handed out again.
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), Error>;

    /// Release resources held by the transport. Called once, after the last `send`.
    async fn dispose(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), Error> {
        (**self).send(batch).await
    }

    async fn dispose(&mut self) -> Result<(), Error> {
        (**self).dispose().await
    }
}

/// Posts batches to the Application Insights collector.
///
/// The body is a JSON array of envelopes. Only a `200 OK` response counts as success; any other
/// status fails with [`Error::TransmissionFailed`].
#[derive(Debug)]
pub struct HttpTransport<C> {
    client: Option<C>,
    endpoint: Uri,
    gzip: bool,
}

impl<C: HttpClient + 'static> HttpTransport<C> {
    /// Create a transport posting to the default collector endpoint.
    pub fn new(client: C) -> Self {
        HttpTransport {
            client: Some(client),
            endpoint: Uri::from_static(DEFAULT_ENDPOINT),
            gzip: false,
        }
    }

    /// Post to a different endpoint, e.g. a regional collector or a proxy.
    pub fn with_endpoint(mut self, endpoint: Uri) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Compress request bodies with gzip. Off by default.
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    /// The endpoint batches are posted to.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }
}

#[async_trait]
impl<C: HttpClient + 'static> Transport for HttpTransport<C> {
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), Error> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::InvalidOperation("the HTTP transport is disposed".into()))?;
        uploader::send(client, &self.endpoint, &batch, self.gzip).await
    }

    async fn dispose(&mut self) -> Result<(), Error> {
        self.client = None;
        Ok(())
    }
}

/// Keeps batches in memory instead of sending them. Clones share the same storage, so keep one
/// clone to inspect what a channel sent.
///
/// ```
/// # async fn run() -> Result<(), async_application_insights::Error> {
/// use async_application_insights::{Channel, InMemoryTransport, TelemetryClient};
///
/// let transport = InMemoryTransport::new();
/// let client = TelemetryClient::new("ikey", Channel::new(transport.clone()))?;
/// client.dispose().await?;
/// assert!(transport.is_disposed());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    batches: Vec<Vec<Envelope>>,
    fail_with_status: Option<u16>,
    disposed: bool,
}

impl InMemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        InMemoryTransport::default()
    }

    /// Batches sent so far, oldest first.
    pub fn batches(&self) -> Vec<Vec<Envelope>> {
        self.state().batches.clone()
    }

    /// All envelopes sent so far, in order.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.state().batches.iter().flatten().cloned().collect()
    }

    /// Make subsequent sends fail as if the collector responded with `status`. `None` makes them
    /// succeed again. Failed batches are not recorded.
    pub fn fail_with_status(&self, status: Option<u16>) {
        self.state().fail_with_status = status;
    }

    /// Whether the owning channel disposed the transport.
    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&mut self, batch: Vec<Envelope>) -> Result<(), Error> {
        let mut state = self.state();
        if state.disposed {
            return Err(Error::InvalidOperation(
                "the in-memory transport is disposed".into(),
            ));
        }
        if let Some(status) = state.fail_with_status {
            return Err(Error::TransmissionFailed {
                status,
                body: String::new(),
            });
        }
        state.batches.push(batch);
        Ok(())
    }

    async fn dispose(&mut self) -> Result<(), Error> {
        self.state().disposed = true;
        Ok(())
    }
}
