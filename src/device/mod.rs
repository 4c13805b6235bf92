//! Camera and microphone stream management

pub mod coordinator;
pub mod enumeration;
pub mod manager;
pub mod state;

pub use coordinator::{
    CoordinatorOptions, CoordinatorStatus, DeviceCoordinator, DeviceEvent, InitLock, InitResult,
    PollingHandle, RequiredDevices,
};
pub use enumeration::{display_label, probe_permissions, DeviceCatalog};
pub use manager::DeviceStreamManager;
pub use state::{DeviceClass, DeviceStatus, DeviceStreamState, InitOutcome, LeasePurpose, StreamLease};
