//! Device enumeration and validation.

mod device_id;

use std::sync::Arc;

pub use device_id::DeviceId;

use crate::backend::{AudioBackend, DeviceKind};

/// Human-readable description of an enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Display name with the backend's name prefix removed.
    pub name: String,
    /// Raw device specifier, usable as a [`DeviceId`].
    pub guid: String,
}

/// Lists devices and resolves device identifiers against the backend.
///
/// Both engines validate their configured device through the same
/// enumerator, so an identifier that disappears is handled the same way
/// everywhere: the system default takes its place.
#[derive(Clone)]
pub struct DeviceEnumerator {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceEnumerator {
    /// Creates an enumerator over the given backend.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    /// Device specifiers of the given kind, in backend order.
    pub fn devices(&self, kind: DeviceKind) -> Vec<String> {
        self.backend.devices(kind)
    }

    /// Number of devices of the given kind.
    pub fn count(&self, kind: DeviceKind) -> usize {
        self.devices(kind).len()
    }

    /// Describes the device at `index`, or `None` if out of range.
    pub fn device_info(&self, kind: DeviceKind, index: usize) -> Option<DeviceInfo> {
        let guid = self.devices(kind).into_iter().nth(index)?;
        let name = match self.backend.name_prefix() {
            Some(prefix) => guid.strip_prefix(prefix).unwrap_or(&guid).to_string(),
            None => guid.clone(),
        };
        Some(DeviceInfo { name, guid })
    }

    /// The system default device of the given kind.
    pub fn default_device(&self, kind: DeviceKind) -> Option<DeviceId> {
        self.backend.default_device(kind).map(DeviceId::from)
    }

    /// Returns `true` if `id` names a currently enumerated device.
    ///
    /// The default marker is valid whenever a default device exists.
    pub fn is_valid(&self, kind: DeviceKind, id: &DeviceId) -> bool {
        if id.is_default() {
            return self.backend.default_device(kind).is_some();
        }
        self.devices(kind).iter().any(|d| d == id.as_str())
    }

    /// Resolves `id` to a device that can be opened.
    ///
    /// Returns `id` itself if it is enumerated, otherwise the system default.
    /// Returns `None` only when no default device exists.
    pub fn validate(&self, kind: DeviceKind, id: &DeviceId) -> Option<DeviceId> {
        if !id.is_default() && self.is_valid(kind, id) {
            return Some(id.clone());
        }

        match self.default_device(kind) {
            Some(default) => {
                if !id.is_default() {
                    tracing::warn!(
                        %kind,
                        device = %id,
                        fallback = %default,
                        "Device not found, falling back to default"
                    );
                }
                Some(default)
            }
            None => {
                tracing::error!(%kind, device = %id, "No {kind} device available");
                None
            }
        }
    }
}

impl std::fmt::Debug for DeviceEnumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEnumerator")
            .field("backend", &self.backend.name())
            .finish()
    }
}
