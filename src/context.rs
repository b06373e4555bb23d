//! Context that ends up in the tags of every envelope.
//!
//! [`Application`] and [`Device`] describe the process and are fixed when the client is built.
//! [`Operation`], [`Session`] and [`User`] describe a single call and are passed with each track
//! call through [`TelemetryContext`].

use crate::models::context_tag_keys::{self as keys, Tags};
use once_cell::sync::Lazy;
use sysinfo::System;

/// Information about the application sending telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    /// Application version.
    pub version: String,
}

impl Application {
    /// Create application metadata with the given version.
    pub fn new(version: impl Into<String>) -> Self {
        Application {
            version: version.into(),
        }
    }

    pub(crate) fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(keys::APPLICATION_VERSION, self.version.clone());
        tags
    }
}

static DETECTED_DEVICE: Lazy<Device> = Lazy::new(Device::detect);

/// Information about the device that is sending telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Unique device id. Host name in most cases.
    pub id: String,
    /// Device type, `PC` unless told otherwise.
    pub type_name: String,
    /// Operating system name and version.
    pub os_version: String,
    /// Locale in `ll-RR` form.
    pub locale: Option<String>,
}

impl Device {
    /// Describe the current machine. Detection runs once per process.
    pub fn current() -> Self {
        DETECTED_DEVICE.clone()
    }

    /// Describe the current machine with a different device type.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    fn detect() -> Self {
        Device {
            id: System::host_name().unwrap_or_default(),
            type_name: "PC".into(),
            os_version: System::long_os_version()
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            locale: ["LC_ALL", "LC_MESSAGES", "LANG"]
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find_map(|value| normalize_locale(&value)),
        }
    }

    pub(crate) fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(keys::DEVICE_ID, self.id.clone());
        if let Some(locale) = &self.locale {
            tags.insert(keys::DEVICE_LOCALE, locale.clone());
        }
        tags.insert(keys::DEVICE_OS_VERSION, self.os_version.clone());
        tags.insert(keys::DEVICE_TYPE, self.type_name.clone());
        tags
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::current()
    }
}

/// Turns POSIX locale names like `en_US.UTF-8` into `en-US`.
fn normalize_locale(value: &str) -> Option<String> {
    let name = value.split(['.', '@']).next()?.trim();
    if name.is_empty() || name == "C" || name == "POSIX" {
        return None;
    }
    Some(name.replace('_', "-"))
}

/// Correlation grouping for related telemetry, typically one per inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Operation id shared by all telemetry of the operation.
    pub id: String,
    /// Operation name, e.g. `GET /users`.
    pub name: String,
    /// Id of the telemetry item's immediate parent.
    pub parent_id: Option<String>,
}

impl Operation {
    /// Create an operation without a parent.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Operation {
            id: id.into(),
            name: name.into(),
            parent_id: None,
        }
    }

    /// Set the id of the parent telemetry item.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub(crate) fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(keys::OPERATION_ID, self.id.clone());
        tags.insert(keys::OPERATION_NAME, self.name.clone());
        if let Some(parent_id) = &self.parent_id {
            tags.insert(keys::OPERATION_PARENT_ID, parent_id.clone());
        }
        tags
    }
}

/// The instance of the user's interaction with the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id.
    pub id: String,
}

impl Session {
    /// Create a session with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Session { id: id.into() }
    }

    pub(crate) fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert(keys::SESSION_ID, self.id.clone());
        tags
    }
}

/// The end user of the application. Only the fields that are set become tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Account the user is acting with in multi-tenant applications.
    pub account_id: Option<String>,
    /// Anonymous user id.
    pub id: Option<String>,
    /// Authenticated user id.
    pub auth_user_id: Option<String>,
    /// Session the user is in.
    pub session_id: Option<String>,
}

impl User {
    /// Create a user with an anonymous id.
    pub fn new(id: impl Into<String>) -> Self {
        User {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub(crate) fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        let fields = [
            (keys::USER_ACCOUNT_ID, &self.account_id),
            (keys::SESSION_ID, &self.session_id),
            (keys::USER_ID, &self.id),
            (keys::USER_AUTH_USER_ID, &self.auth_user_id),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                tags.insert(key, value.clone());
            }
        }
        tags
    }
}

/// Per-call tag contributors. None of them outlive the envelope they annotate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryContext {
    /// Operation the telemetry belongs to.
    pub operation: Option<Operation>,
    /// Session the telemetry belongs to.
    pub session: Option<Session>,
    /// User the telemetry belongs to.
    pub user: Option<User>,
}

impl TelemetryContext {
    /// Set the operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Set the session.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}
