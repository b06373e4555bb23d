use crate::{
    client::TelemetryClient, context::TelemetryContext, models::Properties,
    telemetry::ExceptionTelemetry,
};
use std::{
    any::Any,
    backtrace::Backtrace,
    fmt,
    panic::{self, Location},
    sync::Arc,
};
use tracing::warn;

const PANIC_TYPE_NAME: &str = "panic";

impl TelemetryClient {
    /// Track every panic as an exception before the previously installed panic hook runs.
    ///
    /// The exception is queued together with a flush request without waiting, so it is sent as
    /// soon as the channel's worker gets to run. Panics on the runtime's own threads may therefore
    /// not make it out if the process exits right away.
    ///
    /// The hook is process-wide. It stays installed until the returned guard is dropped, which
    /// restores the previous hook. The hook does not keep the client alive.
    ///
    /// ```no_run
    /// # async fn run() -> Result<(), async_application_insights::Error> {
    /// use async_application_insights::{Channel, InMemoryTransport, TelemetryClient};
    /// use std::sync::Arc;
    ///
    /// let client = Arc::new(TelemetryClient::new("ikey", Channel::new(InMemoryTransport::new()))?);
    /// let _guard = client.handle_panics();
    /// # Ok(())
    /// # }
    /// ```
    pub fn handle_panics(self: &Arc<Self>) -> PanicHookGuard {
        let client = Arc::downgrade(self);
        let previous = Arc::new(panic::take_hook());

        let chained = Arc::clone(&previous);
        panic::set_hook(Box::new(move |info| {
            if let Some(client) = client.upgrade() {
                let mut properties = Properties::new();
                if let Some(location) = info.location() {
                    properties.insert("location".into(), location.to_string());
                }
                let telemetry = ExceptionTelemetry::new()
                    .with_type_name(PANIC_TYPE_NAME)
                    .with_message(payload_message(info.payload()))
                    .with_backtrace(Backtrace::force_capture())
                    .with_properties(properties);
                let location = info.location().unwrap_or_else(|| Location::caller());
                let envelope =
                    client.exception_envelope(telemetry, &TelemetryContext::default(), location);
                if let Err(err) = client.channel().try_put_and_flush(envelope) {
                    warn!("Tracking panic failed: {}", err);
                }
            }
            (*chained)(info);
        }));

        PanicHookGuard {
            restore: Some(Box::new(move || {
                panic::set_hook(Box::new(move |info| (*previous)(info)));
            })),
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".into()
    }
}

/// Restores the panic hook that was installed before
/// [`TelemetryClient::handle_panics`] when dropped.
#[must_use = "the previous panic hook is restored as soon as the guard is dropped"]
pub struct PanicHookGuard {
    restore: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for PanicHookGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicHookGuard")
            .field("installed", &self.restore.is_some())
            .finish()
    }
}

impl Drop for PanicHookGuard {
    fn drop(&mut self) {
        // Replacing the hook while panicking aborts the process.
        if std::thread::panicking() {
            return;
        }
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}
