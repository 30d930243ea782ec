//! Device request options.
//!
//! A device request scans for peripherals whose advertised name starts with a
//! prefix and stops at the first match. The optional-service allowlist names
//! the GATT services the host grants access to once connected; any other
//! service on the chosen device is reported absent.

use std::time::Duration;

use uuid::Uuid;

use nevermore_types::uuids::{DEVICE_NAME_PREFIX, OPTIONAL_SERVICES};

/// Default time a device request scans before giving up.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a running scan is checked for new peripherals.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Options for a device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Advertised name prefix; `None` accepts any named device.
    pub name_prefix: Option<String>,
    /// Services the host grants access to.
    pub optional_services: Vec<Uuid>,
    /// How long to scan before reporting no match.
    pub timeout: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            name_prefix: Some(DEVICE_NAME_PREFIX.to_string()),
            optional_services: OPTIONAL_SERVICES.to_vec(),
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised name prefix.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Accept devices regardless of name.
    #[must_use]
    pub fn any_name(mut self) -> Self {
        self.name_prefix = None;
        self
    }

    /// Replace the optional-service allowlist.
    #[must_use]
    pub fn optional_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.optional_services = services.into_iter().collect();
        self
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the scan timeout in seconds.
    #[must_use]
    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    /// Whether an advertised name passes the name filter.
    ///
    /// Unnamed devices never match a prefix.
    pub fn matches(&self, name: Option<&str>) -> bool {
        match (&self.name_prefix, name) {
            (None, _) => true,
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ScanOptions::default();
        assert_eq!(options.name_prefix.as_deref(), Some("Nevermore"));
        assert_eq!(options.optional_services.len(), OPTIONAL_SERVICES.len());
        assert_eq!(options.timeout, DEFAULT_SCAN_TIMEOUT);
    }

    #[test]
    fn test_builder() {
        let options = ScanOptions::new()
            .name_prefix("Test")
            .timeout_secs(5)
            .optional_services([nevermore_types::uuids::FAN_SERVICE]);
        assert_eq!(options.name_prefix.as_deref(), Some("Test"));
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.optional_services.len(), 1);
    }

    #[test]
    fn test_name_matching() {
        let options = ScanOptions::default();
        assert!(options.matches(Some("Nevermore")));
        assert!(options.matches(Some("Nevermore Max 1")));
        assert!(!options.matches(Some("nevermore")));
        assert!(!options.matches(Some("Thermostat 12345")));
        assert!(!options.matches(None));

        let any = ScanOptions::default().any_name();
        assert!(any.matches(None));
        assert!(any.matches(Some("anything")));
    }
}
