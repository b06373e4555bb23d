use crate::{
    context::{Application, Device, TelemetryContext},
    models::context_tag_keys::{self as tags, Tags},
};

/// SDK identity sent with every envelope.
pub(crate) const SDK_VERSION: &str = concat!("rsasync:", env!("CARGO_PKG_VERSION"));

/// Composes the tags of one envelope. Later groups override earlier ones on key collisions:
/// device, application, operation, user, session and finally the SDK version, which can never be
/// overridden.
pub(crate) fn get_tags(
    device: &Device,
    application: Option<&Application>,
    context: &TelemetryContext,
) -> Tags {
    let mut tags = device.tags();

    if let Some(application) = application {
        tags.extend(application.tags());
    }

    if let Some(operation) = &context.operation {
        tags.extend(operation.tags());
    }

    if let Some(user) = &context.user {
        tags.extend(user.tags());
    }

    if let Some(session) = &context.session {
        tags.extend(session.tags());
    }

    tags.insert(tags::INTERNAL_SDK_VERSION, SDK_VERSION.into());
    tags
}
