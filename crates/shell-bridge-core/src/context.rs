//! Device context for controller handshakes.

use serde::{Deserialize, Serialize};

use crate::traits::IdentityProvider;

/// Identity of this device as announced to the controller.
///
/// Queried once at startup and passed unchanged into every reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub device_id: String,
    pub device_name: String,
    pub os_description: String,
    pub app_version: String,
    /// Dashboard user id; empty when the device is unclaimed.
    #[serde(default)]
    pub user_id: String,
}

impl DeviceContext {
    /// Create a context from explicit values.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        os_description: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            os_description: os_description.into(),
            app_version: app_version.into(),
            user_id: String::new(),
        }
    }

    /// Build a context by querying an identity provider.
    #[must_use]
    pub fn from_provider(provider: &dyn IdentityProvider, app_version: impl Into<String>) -> Self {
        Self::new(
            provider.device_id(),
            provider.device_name(),
            provider.os_description(),
            app_version,
        )
    }

    /// Attach a user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Handshake query parameters, in wire order, unencoded.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = vec![
            ("type", "device"),
            ("id", self.device_id.as_str()),
            ("name", self.device_name.as_str()),
            ("os", self.os_description.as_str()),
            ("version", self.app_version.as_str()),
        ];
        if !self.user_id.is_empty() {
            pairs.push(("userId", self.user_id.as_str()));
        }
        pairs
    }

    /// Percent-encoded handshake query string, without the leading `?`.
    ///
    /// Alphanumerics and `- _ . ~` pass through; every other byte becomes `%XX`.
    #[must_use]
    pub fn query_string(&self) -> String {
        self.query_pairs()
            .into_iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
