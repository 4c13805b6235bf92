//! Capture provider boundaries
//!
//! Traits for screen sources, device enumeration, media acquisition and
//! permissions, plus built-in test-pattern providers.

pub mod synthetic;
pub mod traits;

#[cfg(feature = "native-devices")]
pub mod native;

pub use traits::{
    CaptureError, CaptureSource, CaptureSourceProvider, DeviceDescriptor, DeviceEnumerator,
    DeviceKind, MediaAcquirer, MediaConstraints, PermissionProvider, PermissionStatus,
};
