//! Device identification type.

use std::sync::Arc;

/// Identifier of an audio device, as reported by the backend enumerator.
///
/// `DeviceId` wraps the backend's device-specifier string. The empty
/// identifier means "use the system default device". It uses `Arc<str>`
/// internally for cheap cloning between engine threads.
///
/// # Example
///
/// ```
/// use audio_device_engine::DeviceId;
///
/// let mic = DeviceId::new("USB Microphone");
/// assert!(!mic.is_default());
/// assert!(DeviceId::default_device().is_default());
/// assert_eq!(mic, DeviceId::new("USB Microphone"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a new device ID from a specifier string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The "system default" marker.
    pub fn default_device() -> Self {
        Self::new("")
    }

    /// Returns `true` if this ID selects the system default device.
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::default_device()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_default() {
            write!(f, "<default>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_equality() {
        let a = DeviceId::new("mic");
        let b = DeviceId::new("mic");
        let c = DeviceId::new("speaker");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(format!("{}", DeviceId::new("Headset")), "Headset");
        assert_eq!(format!("{}", DeviceId::default_device()), "<default>");
    }

    #[test]
    fn test_device_id_default_marker() {
        assert!(DeviceId::default().is_default());
        assert!(DeviceId::from(String::new()).is_default());
        assert!(!DeviceId::from("x").is_default());
    }
}
