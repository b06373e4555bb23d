//! Context tag keys and the tag map carried by every envelope.
//!
//! Values longer than the collector accepts for a key are truncated when the envelope is
//! sanitized.

use crate::models::{truncate_chars, Sanitize};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Key of a context tag as understood by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextTagKey(&'static str);

impl ContextTagKey {
    const fn new(key: &'static str) -> Self {
        ContextTagKey(key)
    }

    /// The key as it appears on the wire, e.g. `ai.operation.id`.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Serialize for ContextTagKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0)
    }
}

/// Context tags of one envelope.
pub type Tags = BTreeMap<ContextTagKey, String>;

/// Application version. Information in the application context fields is always about the
/// application that is sending the telemetry.
pub const APPLICATION_VERSION: ContextTagKey = ContextTagKey::new("ai.application.ver");

/// Unique client device id. Computer name in most cases.
pub const DEVICE_ID: ContextTagKey = ContextTagKey::new("ai.device.id");

/// Device locale using <language>-<REGION> pattern, following RFC 5646. Example 'en-US'.
pub const DEVICE_LOCALE: ContextTagKey = ContextTagKey::new("ai.device.locale");

/// Operating system name and version of the device. Example 'Windows 10 Pro 10.0.10586.0'
pub const DEVICE_OS_VERSION: ContextTagKey = ContextTagKey::new("ai.device.osVersion");

/// The type of the device. Examples: 'PC', 'Phone', 'Browser'. 'PC' is the default value.
pub const DEVICE_TYPE: ContextTagKey = ContextTagKey::new("ai.device.type");

/// A unique identifier for the operation instance. The operation.id is created by either a request
/// or a page view. All other telemetry sets this to the value for the containing request or page
/// view.
pub const OPERATION_ID: ContextTagKey = ContextTagKey::new("ai.operation.id");

/// The name (group) of the operation, e.g. 'GET Home/Index'.
pub const OPERATION_NAME: ContextTagKey = ContextTagKey::new("ai.operation.name");

/// The unique identifier of the telemetry item's immediate parent.
pub const OPERATION_PARENT_ID: ContextTagKey = ContextTagKey::new("ai.operation.parentId");

/// Session ID - the instance of the user's interaction with the app.
pub const SESSION_ID: ContextTagKey = ContextTagKey::new("ai.session.id");

/// In multi-tenant applications this is the account ID or name which the user is acting with.
pub const USER_ACCOUNT_ID: ContextTagKey = ContextTagKey::new("ai.user.accountId");

/// Anonymous user id. Represents the end user of the application.
pub const USER_ID: ContextTagKey = ContextTagKey::new("ai.user.id");

/// Authenticated user id. Since it's PII information it is not collected by default.
pub const USER_AUTH_USER_ID: ContextTagKey = ContextTagKey::new("ai.user.authUserId");

/// SDK version. See
/// https://github.com/Microsoft/ApplicationInsights-Home/blob/master/SDK-AUTHORING.md#sdk-version-specification
/// for information.
pub const INTERNAL_SDK_VERSION: ContextTagKey = ContextTagKey::new("ai.internal.sdkVersion");

impl Sanitize for Tags {
    fn sanitize(&mut self) {
        for (key, value) in self.iter_mut() {
            truncate_chars(
                value,
                match *key {
                    APPLICATION_VERSION => 1024,
                    DEVICE_ID => 1024,
                    DEVICE_LOCALE => 64,
                    DEVICE_OS_VERSION => 256,
                    DEVICE_TYPE => 64,
                    OPERATION_ID => 128,
                    OPERATION_NAME => 1024,
                    OPERATION_PARENT_ID => 128,
                    SESSION_ID => 64,
                    USER_ACCOUNT_ID => 1024,
                    USER_ID => 128,
                    USER_AUTH_USER_ID => 1024,
                    INTERNAL_SDK_VERSION => 64,
                    _ => 1024,
                },
            );
        }
    }
}
