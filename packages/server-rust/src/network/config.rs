//! Network configuration shared by every listener of a server instance.

use std::time::Duration;

/// Transport-level configuration applied to all listeners of an instance.
///
/// The port is not part of the configuration: one instance is built and
/// started once per port.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for every listener.
    pub host: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Normalizes a route prefix to `/segment[/segment...]` form.
///
/// Empty input and any run of slashes collapse to `/`; trailing slashes are
/// dropped so the prefix can be used for nesting.
#[must_use]
pub fn normalize_root_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}
