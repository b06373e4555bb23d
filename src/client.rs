use crate::{
    channel::Channel,
    context::{Application, Device, Operation, TelemetryContext},
    convert::{duration_to_string, time_to_string},
    exception,
    models::{
        context_tag_keys::Tags, Data, DataPoint, DataPointType, Envelope, EventData,
        ExceptionData, MessageData, MetricData, RequestData,
    },
    tags::get_tags,
    telemetry::{
        DataPointKind, EventTelemetry, ExceptionTelemetry, MetricTelemetry, RequestTelemetry,
        TraceTelemetry,
    },
    Error,
};
use chrono::Utc;
use std::{backtrace::Backtrace, future::Future, panic::Location};

/// Records telemetry and hands it to a [`Channel`].
///
/// Every `track_*` call builds one envelope, tags it with the device, application and per-call
/// [`TelemetryContext`], and puts it into the channel. Calls only wait for transmission when the
/// envelope fills the channel's buffer, in which case a failed transmission is returned.
///
/// ```no_run
/// # async fn run() -> Result<(), async_application_insights::Error> {
/// use async_application_insights::{
///     Channel, EventTelemetry, InMemoryTransport, TelemetryClient, TelemetryContext,
/// };
///
/// let client = TelemetryClient::new("ikey", Channel::new(InMemoryTransport::new()))?;
/// client
///     .track_event(EventTelemetry::new("Started"), &TelemetryContext::default())
///     .await?;
/// client.dispose().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TelemetryClient {
    instrumentation_key: String,
    application: Option<Application>,
    device: Device,
    channel: Channel,
}

impl TelemetryClient {
    /// Create a client sending to the given instrumentation key.
    ///
    /// Fails with [`Error::ArgumentNull`] if the key is empty or whitespace only.
    pub fn new(instrumentation_key: impl Into<String>, channel: Channel) -> Result<Self, Error> {
        let instrumentation_key = instrumentation_key.into();
        if instrumentation_key.trim().is_empty() {
            return Err(Error::ArgumentNull("instrumentation_key"));
        }

        Ok(TelemetryClient {
            instrumentation_key,
            application: None,
            device: Device::current(),
            channel,
        })
    }

    /// Describe the application in every envelope.
    pub fn with_application(mut self, application: Application) -> Self {
        self.application = Some(application);
        self
    }

    /// Use the given device description instead of the detected one.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Instrumentation key telemetry is sent to.
    pub fn instrumentation_key(&self) -> &str {
        &self.instrumentation_key
    }

    /// Tags an envelope tracked with the given context would carry.
    pub fn get_tags(&self, context: &TelemetryContext) -> Tags {
        get_tags(&self.device, self.application.as_ref(), context)
    }

    /// Track a named event.
    pub async fn track_event(
        &self,
        telemetry: EventTelemetry,
        context: &TelemetryContext,
    ) -> Result<(), Error> {
        let data = Data::Event(EventData {
            ver: 2,
            name: telemetry.name,
            properties: telemetry.properties,
            measurements: telemetry.measurements,
        });
        self.push(data, context).await
    }

    /// Track a log message.
    pub async fn track_trace(
        &self,
        telemetry: TraceTelemetry,
        context: &TelemetryContext,
    ) -> Result<(), Error> {
        let data = Data::Message(MessageData {
            ver: 2,
            message: telemetry.message,
            severity_level: telemetry.severity,
            properties: telemetry.properties,
        });
        self.push(data, context).await
    }

    /// Track a metric measurement or aggregation.
    pub async fn track_metric(
        &self,
        telemetry: MetricTelemetry,
        context: &TelemetryContext,
    ) -> Result<(), Error> {
        let kind = match telemetry.kind {
            DataPointKind::Measurement => DataPointType::Measurement,
            DataPointKind::Aggregation => DataPointType::Aggregation {
                count: telemetry.count,
                min: telemetry.min,
                max: telemetry.max,
                std_dev: telemetry.std_dev,
            },
        };
        let data = Data::Metric(MetricData {
            ver: 2,
            metrics: vec![DataPoint {
                name: telemetry.name,
                kind,
                value: telemetry.value,
            }],
            properties: telemetry.properties,
        });
        self.push(data, context).await
    }

    /// Track a request handled by the application.
    ///
    /// Without an id a random one is generated. Without an operation in `context`, the request
    /// starts a new operation identified by the request id and named `"{method} {name}"`.
    pub async fn track_request(
        &self,
        telemetry: RequestTelemetry,
        context: &TelemetryContext,
    ) -> Result<(), Error> {
        let envelope = self.request_envelope(telemetry, context)?;
        self.channel.put(envelope).await
    }

    fn request_envelope(
        &self,
        telemetry: RequestTelemetry,
        context: &TelemetryContext,
    ) -> Result<Envelope, Error> {
        let duration = duration_to_string(telemetry.duration)?;
        let id = telemetry
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let request_context;
        let context = if context.operation.is_some() {
            context
        } else {
            request_context = TelemetryContext {
                operation: Some(Operation::new(
                    id.clone(),
                    format!("{} {}", telemetry.http_method, telemetry.name),
                )),
                ..context.clone()
            };
            &request_context
        };

        let data = Data::Request(RequestData {
            ver: 2,
            id,
            name: telemetry.name,
            start_time: time_to_string(telemetry.start_time.unwrap_or_else(Utc::now)),
            duration,
            response_code: telemetry.response_code.to_string(),
            success: telemetry.success,
            http_method: telemetry.http_method,
            url: telemetry.url,
            properties: telemetry.properties,
            measurements: telemetry.measurements,
        });
        Ok(self.envelope(data, context))
    }

    /// Track an error.
    ///
    /// Without a backtrace in `telemetry` the stack is captured here, so the recorded stack always
    /// ends at the caller. The source line of each frame is added to the properties as `code_0`,
    /// `code_1`, ... in stack order.
    ///
    /// Source lines come from files below the working directory, read synchronously the first
    /// time a frame points into them and kept in memory afterwards. Other frames use their
    /// symbol instead.
    #[track_caller]
    pub fn track_exception<'a>(
        &'a self,
        telemetry: ExceptionTelemetry,
        context: &TelemetryContext,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a {
        let envelope = self.exception_envelope(telemetry, context, Location::caller());
        async move { self.channel.put(envelope).await }
    }

    pub(crate) fn exception_envelope(
        &self,
        mut telemetry: ExceptionTelemetry,
        context: &TelemetryContext,
        location: &Location<'_>,
    ) -> Envelope {
        let backtrace = telemetry
            .backtrace
            .take()
            .unwrap_or_else(Backtrace::force_capture);
        let captured = exception::capture(
            telemetry.type_name,
            telemetry.message,
            Some(&backtrace),
            telemetry.skip_frames,
            location,
        );

        let mut properties = telemetry.properties.unwrap_or_default();
        properties.extend(
            captured
                .code
                .into_iter()
                .enumerate()
                .map(|(index, text)| (format!("code_{}", index), text)),
        );

        let data = Data::Exception(ExceptionData {
            ver: 2,
            handled_at: "UserCode",
            exceptions: vec![captured.details],
            properties: Some(properties),
            measurements: telemetry.measurements,
        });
        self.envelope(data, context)
    }

    /// Send everything the channel buffered.
    pub async fn flush(&self) -> Result<(), Error> {
        self.channel.flush().await
    }

    /// Flush the channel, then dispose it.
    ///
    /// The channel is disposed even if the flush fails; the flush error is returned in that case.
    /// Disposing a disposed client does nothing.
    pub async fn dispose(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Ok(());
        }
        let flushed = self.channel.flush().await;
        let disposed = self.channel.dispose().await;
        flushed.and(disposed)
    }

    /// Whether [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.channel.is_disposed()
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    fn envelope(&self, data: Data, context: &TelemetryContext) -> Envelope {
        Envelope::new(self.instrumentation_key.clone(), data, self.get_tags(context))
    }

    async fn push(&self, data: Data, context: &TelemetryContext) -> Result<(), Error> {
        let envelope = self.envelope(data, context);
        self.channel.put(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{ChannelConfig, InMemoryTransport},
        context::{Session, User},
        models::{context_tag_keys as keys, Properties},
        tags::SDK_VERSION,
        SeverityLevel,
    };
    use chrono::TimeDelta;

    fn device() -> Device {
        Device {
            id: "host".into(),
            type_name: "PC".into(),
            os_version: "Linux".into(),
            locale: None,
        }
    }

    fn client(max_batch_len: usize) -> (TelemetryClient, InMemoryTransport) {
        let transport = InMemoryTransport::new();
        let channel = Channel::with_config(
            transport.clone(),
            ChannelConfig::default().with_max_batch_len(max_batch_len),
        );
        let client = TelemetryClient::new("abc", channel)
            .unwrap()
            .with_device(device());
        (client, transport)
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        for key in ["", "   "] {
            let channel = Channel::new(InMemoryTransport::new());
            let err = TelemetryClient::new(key, channel).unwrap_err();
            assert!(matches!(err, Error::ArgumentNull("instrumentation_key")));
        }
    }

    #[tokio::test]
    async fn end_to_end() {
        let (client, transport) = client(2);
        let context = TelemetryContext::default();

        client
            .track_event(EventTelemetry::new("Example"), &context)
            .await
            .unwrap();
        client
            .track_trace(
                TraceTelemetry::new("Foo").with_severity(SeverityLevel::Warning),
                &context,
            )
            .await
            .unwrap();
        let batches = transport.batches();
        assert_eq!(1, batches.len());
        assert_eq!(2, batches[0].len());
        assert_eq!("Microsoft.ApplicationInsights.Event", batches[0][0].name());
        assert_eq!("MessageData", batches[0][1].data_type_name());

        client
            .track_metric(MetricTelemetry::new("Something", 42.0), &context)
            .await
            .unwrap();
        assert_eq!(1, transport.batches().len());

        client.dispose().await.unwrap();
        let batches = transport.batches();
        assert_eq!(2, batches.len());
        assert_eq!(1, batches[1].len());
        assert_eq!("MetricData", batches[1][0].data_type_name());
        assert_eq!("abc", batches[1][0].instrumentation_key());
        assert!(transport.is_disposed());
    }

    #[tokio::test]
    async fn tags_follow_context() {
        let (client, _) = client(10);
        let client = client.with_application(Application::new("1.0.0"));
        let context = TelemetryContext::default()
            .with_operation(Operation::new("op", "GET /"))
            .with_user(User {
                session_id: Some("user-session".into()),
                ..User::new("u1")
            })
            .with_session(Session::new("session"));
        let tags = client.get_tags(&context);
        assert_eq!("host", tags[&keys::DEVICE_ID]);
        assert_eq!("1.0.0", tags[&keys::APPLICATION_VERSION]);
        assert_eq!("op", tags[&keys::OPERATION_ID]);
        assert_eq!("u1", tags[&keys::USER_ID]);
        assert_eq!("session", tags[&keys::SESSION_ID]);
        assert_eq!(SDK_VERSION, tags[&keys::INTERNAL_SDK_VERSION]);
    }

    #[tokio::test]
    async fn request_starts_operation() {
        let (client, transport) = client(1);
        client
            .track_request(
                RequestTelemetry::new("GET", "/users", "http://localhost/users", 200, true),
                &TelemetryContext::default(),
            )
            .await
            .unwrap();

        let envelope = &transport.envelopes()[0];
        let data = match envelope.data() {
            Data::Request(data) => data,
            _ => panic!("we should not get here"),
        };
        assert_eq!(36, data.id.len());
        assert_eq!("00:00:00.000", data.duration);
        assert_eq!("200", data.response_code);
        assert_eq!(&data.id, &envelope.tags()[&keys::OPERATION_ID]);
        assert_eq!("GET /users", envelope.tags()[&keys::OPERATION_NAME]);
    }

    #[tokio::test]
    async fn request_keeps_given_operation_and_id() {
        let (client, transport) = client(1);
        let context = TelemetryContext::default().with_operation(Operation::new("op", "job"));
        client
            .track_request(
                RequestTelemetry::new("POST", "/jobs", "http://localhost/jobs", 201, true)
                    .with_id("req")
                    .with_timing(Utc::now(), TimeDelta::milliseconds(16_150)),
                &context,
            )
            .await
            .unwrap();

        let envelope = &transport.envelopes()[0];
        match envelope.data() {
            Data::Request(data) => {
                assert_eq!("req", data.id);
                assert_eq!("00:00:16.150", data.duration);
            }
            _ => panic!("we should not get here"),
        }
        assert_eq!("op", envelope.tags()[&keys::OPERATION_ID]);
        assert_eq!("job", envelope.tags()[&keys::OPERATION_NAME]);
    }

    #[tokio::test]
    async fn negative_request_duration_is_rejected() {
        let (client, transport) = client(1);
        let err = client
            .track_request(
                RequestTelemetry::new("GET", "/", "http://localhost/", 200, true)
                    .with_timing(Utc::now(), TimeDelta::milliseconds(-1)),
                &TelemetryContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(transport.envelopes().is_empty());
    }

    #[tokio::test]
    async fn synthetic_exception_has_stack_and_code() {
        let (client, transport) = client(1);
        let mut properties = Properties::new();
        properties.insert("custom".into(), "value".into());
        client
            .track_exception(
                ExceptionTelemetry::new().with_properties(properties),
                &TelemetryContext::default(),
            )
            .await
            .unwrap();

        let envelope = &transport.envelopes()[0];
        assert_eq!("Microsoft.ApplicationInsights.Exception", envelope.name());
        let data = match envelope.data() {
            Data::Exception(data) => data,
            _ => panic!("we should not get here"),
        };
        let details = &data.exceptions[0];
        assert_eq!("Exception", details.type_name);
        assert_eq!("Technical exception", details.message);
        assert!(!details.parsed_stack.is_empty());

        let properties = data.properties.as_ref().unwrap();
        assert_eq!("value", properties["custom"]);
        for level in 0..details.parsed_stack.len() {
            assert!(properties.contains_key(&format!("code_{}", level)));
        }
        assert!(!properties.contains_key(&format!("code_{}", details.parsed_stack.len())));
    }

    #[tokio::test]
    async fn exception_from_error() {
        let (client, transport) = client(1);
        let error = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        client
            .track_exception(
                ExceptionTelemetry::from_error(&error),
                &TelemetryContext::default(),
            )
            .await
            .unwrap();
        match transport.envelopes()[0].data() {
            Data::Exception(data) => {
                assert_eq!(
                    std::any::type_name::<std::io::Error>(),
                    data.exceptions[0].type_name
                );
                assert_eq!("disk on fire", data.exceptions[0].message);
            }
            _ => panic!("we should not get here"),
        }
    }

    #[tokio::test]
    async fn dispose_surfaces_flush_error_and_still_disposes() {
        let (client, transport) = client(10);
        client
            .track_event(EventTelemetry::new("Example"), &TelemetryContext::default())
            .await
            .unwrap();
        transport.fail_with_status(Some(500));

        let err = client.dispose().await.unwrap_err();
        assert!(matches!(err, Error::TransmissionFailed { status: 500, .. }));
        assert!(transport.is_disposed());
    }

    #[tokio::test]
    async fn disposing_twice_is_a_no_op() {
        let (client, transport) = client(10);
        client
            .track_event(EventTelemetry::new("Example"), &TelemetryContext::default())
            .await
            .unwrap();
        client.dispose().await.unwrap();
        assert!(client.is_disposed());
        client.dispose().await.unwrap();
        assert_eq!(1, transport.batches().len());
    }

    #[tokio::test]
    async fn tracking_after_dispose_fails() {
        let (client, _) = client(10);
        client.dispose().await.unwrap();
        let err = client
            .track_event(EventTelemetry::new("late"), &TelemetryContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }
}
