//! Request instrumentation for HTTP servers built on the `http` crate types.
//!
//! [`RequestInstrumentation::instrument`] wraps one handler invocation. It times the handler,
//! tracks one request and, if the handler failed unexpectedly, one exception. The handler's
//! result is returned untouched in every case.

use crate::{
    client::TelemetryClient,
    context::{Operation, TelemetryContext, User},
    convert::request_name,
    telemetry::{ExceptionTelemetry, RequestTelemetry},
};
use chrono::{DateTime, TimeDelta, Utc};
use http::{request::Parts, HeaderMap, Method, Request, Response, StatusCode, Uri};
use std::{
    convert::Infallible,
    fmt::{self, Display},
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::time::Instant;
use tracing::warn;

/// Status code of a successful handler result.
pub trait ResponseStatus {
    /// HTTP status code sent to the client.
    fn status_code(&self) -> u16;
}

impl<B> ResponseStatus for Response<B> {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl ResponseStatus for StatusCode {
    fn status_code(&self) -> u16 {
        self.as_u16()
    }
}

impl ResponseStatus for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

/// Error returned by a handler.
///
/// Errors that carry a status code are expected rejections, e.g. "404 Not Found", and are
/// classified like responses. All other errors count as unexpected failures with status 500 and
/// are tracked as exceptions as well.
pub trait HandlerError {
    /// Status code this error maps to, if it represents an HTTP response.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

impl HandlerError for StatusCode {
    fn status_code(&self) -> Option<u16> {
        Some(self.as_u16())
    }
}

impl HandlerError for std::io::Error {}

impl HandlerError for Box<dyn std::error::Error + Send + Sync> {}

impl HandlerError for Infallible {}

/// How a handler invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// The handler produced a response.
    Response(u16),
    /// The handler failed with an error carrying a status code.
    Rejected(u16),
    /// The handler failed with any other error.
    Failed {
        type_name: &'static str,
        message: String,
    },
}

impl Outcome {
    fn new<T, E>(result: &Result<T, E>) -> Self
    where
        T: ResponseStatus,
        E: HandlerError + Display,
    {
        match result {
            Ok(response) => Outcome::Response(response.status_code()),
            Err(error) => match error.status_code() {
                Some(status) => Outcome::Rejected(status),
                None => Outcome::Failed {
                    type_name: std::any::type_name::<E>(),
                    message: error.to_string(),
                },
            },
        }
    }
}

/// Default success classification: everything below 400 succeeded, and so did 401, 403, 404 and
/// 405, which the server handled correctly even though the client's request was rejected.
pub fn is_success_status(status: u16) -> bool {
    status < 400 || matches!(status, 401 | 403 | 404 | 405)
}

/// Per-request state shared with the handler through the request extensions.
///
/// ```no_run
/// use async_application_insights::{RequestContext, User};
///
/// fn handler(request: http::Request<()>) {
///     if let Some(context) = request.extensions().get::<RequestContext>() {
///         println!("telemetry id: {}", context.telemetry_id());
///         context.set_user(User::new("anonymous-42"));
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<RequestContextInner>,
}

#[derive(Debug)]
struct RequestContextInner {
    telemetry_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    user: Mutex<Option<User>>,
}

impl RequestContext {
    fn new(parts: &Parts) -> Self {
        RequestContext {
            inner: Arc::new(RequestContextInner {
                telemetry_id: uuid::Uuid::new_v4().to_string(),
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
                user: Mutex::new(None),
            }),
        }
    }

    /// Id of the request telemetry, usable to correlate downstream telemetry.
    pub fn telemetry_id(&self) -> &str {
        &self.inner.telemetry_id
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Request URI.
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Attach the user once the handler knows who it is.
    pub fn set_user(&self, user: User) {
        *self.user_slot() = Some(user);
    }

    /// User attached by the handler.
    pub fn user(&self) -> Option<User> {
        self.user_slot().clone()
    }

    fn user_slot(&self) -> std::sync::MutexGuard<'_, Option<User>> {
        self.inner.user.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type UserResolver = Arc<dyn Fn(&RequestContext) -> Option<User> + Send + Sync>;
type SuccessClassifier = Arc<dyn Fn(u16) -> bool + Send + Sync>;
type RequestFilter = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Wraps request handlers to track requests and unexpected failures.
#[derive(Clone)]
pub struct RequestInstrumentation {
    client: Arc<TelemetryClient>,
    clock: Clock,
    user_resolver: UserResolver,
    success_classifier: SuccessClassifier,
    request_filter: Option<RequestFilter>,
}

impl fmt::Debug for RequestInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInstrumentation")
            .field("client", &self.client)
            .field("request_filter", &self.request_filter.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestInstrumentation {
    /// Instrument requests with the given client and default hooks.
    pub fn new(client: Arc<TelemetryClient>) -> Self {
        RequestInstrumentation {
            client,
            clock: Arc::new(Utc::now),
            user_resolver: Arc::new(RequestContext::user),
            success_classifier: Arc::new(is_success_status),
            request_filter: None,
        }
    }

    /// Use a different clock for request start times. The duration is always measured with a
    /// monotonic clock.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Resolve the user after the handler ran. Defaults to the user set on the
    /// [`RequestContext`].
    pub fn with_user_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<User> + Send + Sync + 'static,
    {
        self.user_resolver = Arc::new(resolver);
        self
    }

    /// Decide which status codes count as success. Defaults to [`is_success_status`].
    pub fn with_success_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.success_classifier = Arc::new(classifier);
        self
    }

    /// Skip instrumentation for requests the filter returns `true` for, e.g. health checks.
    pub fn with_request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.request_filter = Some(Arc::new(filter));
        self
    }

    /// Client used to track requests.
    pub fn client(&self) -> &Arc<TelemetryClient> {
        &self.client
    }

    /// Run `handler` for `request` and track it.
    ///
    /// A [`RequestContext`] is inserted into the request extensions before the handler runs.
    /// Failing to track telemetry is logged and never changes the returned result.
    pub async fn instrument<B, F, Fut, T, E>(&self, request: Request<B>, handler: F) -> Result<T, E>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ResponseStatus,
        E: HandlerError + Display,
    {
        let (parts, body) = request.into_parts();
        if let Some(filter) = &self.request_filter {
            if filter(&parts) {
                return handler(Request::from_parts(parts, body)).await;
            }
        }

        let context = RequestContext::new(&parts);
        let name = request_name(parts.uri.path());
        let url = request_url(&parts);
        let mut request = Request::from_parts(parts, body);
        request.extensions_mut().insert(context.clone());

        let start_time = (self.clock)();
        let started = Instant::now();
        let result = handler(request).await;
        let elapsed = started.elapsed();
        let duration =
            TimeDelta::milliseconds(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));

        let outcome = Outcome::new(&result);
        let method = context.method().to_string();
        let telemetry_context = TelemetryContext {
            operation: Some(Operation::new(
                context.telemetry_id(),
                format!("{} {}", method, name),
            )),
            session: None,
            user: (self.user_resolver)(&context),
        };

        let (status, success) = match &outcome {
            Outcome::Response(status) | Outcome::Rejected(status) => {
                (*status, (self.success_classifier)(*status))
            }
            Outcome::Failed { .. } => (500, false),
        };
        let request_telemetry = RequestTelemetry::new(method, name, url, status, success)
            .with_id(context.telemetry_id())
            .with_timing(start_time, duration);
        if let Err(err) = self
            .client
            .track_request(request_telemetry, &telemetry_context)
            .await
        {
            warn!("Tracking request failed: {}", err);
        }

        if let Outcome::Failed { type_name, message } = outcome {
            let exception = ExceptionTelemetry::new()
                .with_type_name(type_name)
                .with_message(message)
                .with_skip_frames(1);
            if let Err(err) = self
                .client
                .track_exception(exception, &telemetry_context)
                .await
            {
                warn!("Tracking exception failed: {}", err);
            }
        }

        result
    }
}

fn request_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        return parts.uri.to_string();
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    match parts
        .headers
        .get(http::header::HOST)
        .and_then(|host| host.to_str().ok())
    {
        Some(host) => format!("http://{}{}", host, path_and_query),
        None => path_and_query.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{Channel, ChannelConfig, InMemoryTransport},
        context::Device,
        models::{context_tag_keys as keys, Data, Envelope, RequestData},
    };
    use chrono::TimeZone;
    use std::time::Duration;
    use test_case::test_case;

    fn instrumentation(max_batch_len: usize) -> (RequestInstrumentation, InMemoryTransport) {
        let transport = InMemoryTransport::new();
        let channel = Channel::with_config(
            transport.clone(),
            ChannelConfig::default().with_max_batch_len(max_batch_len),
        );
        let client = TelemetryClient::new("ikey", channel)
            .unwrap()
            .with_device(Device {
                id: "host".into(),
                type_name: "PC".into(),
                os_version: "Linux".into(),
                locale: None,
            });
        (RequestInstrumentation::new(Arc::new(client)), transport)
    }

    fn request_data(envelope: &Envelope) -> &RequestData {
        match envelope.data() {
            Data::Request(data) => data,
            _ => panic!("we should not get here"),
        }
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri)
            .header(http::header::HOST, "example.com")
            .body(())
            .unwrap()
    }

    #[test_case(200, true  ; "ok")]
    #[test_case(399, true  ; "below 400")]
    #[test_case(400, false ; "bad request")]
    #[test_case(401, true  ; "unauthorized")]
    #[test_case(403, true  ; "forbidden")]
    #[test_case(404, true  ; "not found")]
    #[test_case(405, true  ; "method not allowed")]
    #[test_case(409, false ; "conflict")]
    #[test_case(500, false ; "internal server error")]
    fn default_classifier(status: u16, expected: bool) {
        assert_eq!(expected, is_success_status(status));
    }

    #[tokio::test]
    async fn response_is_returned_unchanged() {
        let (instrumentation, transport) = instrumentation(1);
        let response = instrumentation
            .instrument(get("/hello?x=1"), |_| async {
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(201)
                        .header("x-custom", "1")
                        .body("created")
                        .unwrap(),
                )
            })
            .await
            .unwrap();
        assert_eq!(201, response.status().as_u16());
        assert_eq!("1", response.headers()["x-custom"]);
        assert_eq!(&"created", response.body());

        let envelopes = transport.envelopes();
        assert_eq!(1, envelopes.len());
        let data = request_data(&envelopes[0]);
        assert_eq!("201", data.response_code);
        assert!(data.success);
        assert_eq!("GET", data.http_method);
        assert_eq!("/hello", data.name);
        assert_eq!("http://example.com/hello?x=1", data.url);
        assert_eq!("GET /hello", envelopes[0].tags()[&keys::OPERATION_NAME]);
    }

    #[test_case(404, true  ; "handled rejection")]
    #[test_case(400, false ; "failed rejection")]
    #[tokio::test]
    async fn rejection_is_returned_unchanged(status: u16, success: bool) {
        let (instrumentation, transport) = instrumentation(1);
        let error = instrumentation
            .instrument(get("/missing"), |_| async move {
                Err::<StatusCode, _>(StatusCode::from_u16(status).unwrap())
            })
            .await
            .unwrap_err();
        assert_eq!(status, error.as_u16());

        let envelopes = transport.envelopes();
        assert_eq!(1, envelopes.len());
        let data = request_data(&envelopes[0]);
        assert_eq!(status.to_string(), data.response_code);
        assert_eq!(success, data.success);
    }

    #[tokio::test]
    async fn failure_is_returned_unchanged_and_tracked() {
        let (instrumentation, transport) = instrumentation(1);
        let error = instrumentation
            .instrument(get("/boom"), |_| async {
                Err::<StatusCode, _>(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "no access",
                ))
            })
            .await
            .unwrap_err();
        assert_eq!(std::io::ErrorKind::PermissionDenied, error.kind());
        assert_eq!("no access", error.to_string());

        let envelopes = transport.envelopes();
        assert_eq!(2, envelopes.len());
        let data = request_data(&envelopes[0]);
        assert_eq!("500", data.response_code);
        assert!(!data.success);

        match envelopes[1].data() {
            Data::Exception(exception) => {
                let details = &exception.exceptions[0];
                assert_eq!(std::any::type_name::<std::io::Error>(), details.type_name);
                assert_eq!("no access", details.message);
                assert!(!details.parsed_stack.is_empty());
            }
            _ => panic!("we should not get here"),
        }
        assert_eq!(
            envelopes[0].tags()[&keys::OPERATION_ID],
            envelopes[1].tags()[&keys::OPERATION_ID]
        );
    }

    #[tokio::test]
    async fn filtered_requests_pass_through() {
        let (instrumentation, transport) = instrumentation(1);
        let instrumentation =
            instrumentation.with_request_filter(|parts| parts.uri.path() == "/health");
        let status = instrumentation
            .instrument(get("/health"), |request| async move {
                assert!(request.extensions().get::<RequestContext>().is_none());
                Ok::<_, Infallible>(StatusCode::OK)
            })
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, status);
        instrumentation.client().flush().await.unwrap();
        assert!(transport.envelopes().is_empty());
    }

    #[tokio::test]
    async fn telemetry_id_is_shared_with_handler() {
        let (instrumentation, transport) = instrumentation(1);
        let seen = Arc::new(Mutex::new(String::new()));
        let handler_seen = Arc::clone(&seen);
        instrumentation
            .instrument(get("/"), |request| async move {
                let context = request.extensions().get::<RequestContext>().unwrap();
                *handler_seen.lock().unwrap() = context.telemetry_id().to_string();
                Ok::<_, Infallible>(200u16)
            })
            .await
            .unwrap();

        let envelopes = transport.envelopes();
        let id = seen.lock().unwrap().clone();
        assert_eq!(36, id.len());
        assert_eq!(id, request_data(&envelopes[0]).id);
        assert_eq!(id, envelopes[0].tags()[&keys::OPERATION_ID]);
    }

    #[tokio::test]
    async fn user_is_resolved_after_handler() {
        let (instrumentation, transport) = instrumentation(1);
        instrumentation
            .instrument(get("/"), |request| async move {
                let context = request.extensions().get::<RequestContext>().unwrap();
                context.set_user(User::new("u1"));
                Ok::<_, Infallible>(StatusCode::OK)
            })
            .await
            .unwrap();
        assert_eq!("u1", transport.envelopes()[0].tags()[&keys::USER_ID]);
    }

    #[tokio::test]
    async fn custom_hooks() {
        let (instrumentation, transport) = instrumentation(1);
        let start = Utc.with_ymd_and_hms(2018, 5, 4, 3, 2, 1).unwrap();
        let instrumentation = instrumentation
            .with_clock(move || start)
            .with_success_classifier(|status| status == 418)
            .with_user_resolver(|context| {
                context
                    .headers()
                    .get("x-user")
                    .and_then(|value| value.to_str().ok())
                    .map(User::new)
            });
        let request = Request::get("https://api.example.com/caf%C3%A9")
            .header("x-user", "header-user")
            .body(())
            .unwrap();
        instrumentation
            .instrument(request, |_| async { Ok::<_, Infallible>(418u16) })
            .await
            .unwrap();

        let envelope = &transport.envelopes()[0];
        let data = request_data(envelope);
        assert!(data.success);
        assert_eq!("2018-05-04T03:02:01.000Z", data.start_time);
        assert_eq!("/caf\\xe9", data.name);
        assert_eq!("https://api.example.com/caf%C3%A9", data.url);
        assert_eq!("header-user", envelope.tags()[&keys::USER_ID]);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_is_measured() {
        let (instrumentation, transport) = instrumentation(1);
        instrumentation
            .instrument(get("/slow"), |_| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, Infallible>(StatusCode::OK)
            })
            .await
            .unwrap();
        assert_eq!(
            "00:00:01.500",
            request_data(&transport.envelopes()[0]).duration
        );
    }

    #[tokio::test]
    async fn tracking_failure_does_not_change_result() {
        let (instrumentation, transport) = instrumentation(1);
        transport.fail_with_status(Some(500));
        let response = instrumentation
            .instrument(get("/"), |_| async { Ok::<_, Infallible>(StatusCode::ACCEPTED) })
            .await
            .unwrap();
        assert_eq!(StatusCode::ACCEPTED, response);

        let error = instrumentation
            .instrument(get("/"), |_| async {
                Err::<StatusCode, _>(std::io::Error::new(std::io::ErrorKind::Other, "original"))
            })
            .await
            .unwrap_err();
        assert_eq!("original", error.to_string());
    }

    #[test_case("http://other.org/a?b=c", Some("example.com"), "http://other.org/a?b=c" ; "absolute uri")]
    #[test_case("/a?b=c",                 Some("example.com"), "http://example.com/a?b=c" ; "host header")]
    #[test_case("/a",                     None,                "/a" ; "path only")]
    fn url(uri: &'static str, host: Option<&'static str>, expected: &'static str) {
        let mut builder = Request::get(uri);
        if let Some(host) = host {
            builder = builder.header(http::header::HOST, host);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        assert_eq!(expected, request_url(&parts));
    }
}
