//! Mesh node instance core.
//! Composition root of the stack: constructs the hosted subsystems, drives
//! init/finalize, relays state-change observers and scan results, and guards
//! destructive settings operations. No I/O; collaborators sit behind traits.

pub mod error;
pub mod instance;
pub mod observer;
pub mod persistence;
pub mod scan;
pub mod stack;
pub mod storage;
pub mod types;

pub use error::Error;
#[cfg(feature = "dynamic-log-level")]
pub use instance::DEFAULT_LOG_LEVEL;
pub use instance::Instance;
pub use observer::{ObserverRegistry, SlotId, StateCallback, MAX_STATE_CALLBACKS};
pub use scan::{ScanDispatcher, ScanSubscription};
pub use stack::{MeshInterface, NetworkLayer, Platform, Stack};
pub use storage::{InstanceBuffer, InstanceHandle, SingleHandle, SingleInstance};
pub use types::{
    ActiveScanCallback, ActiveScanResult, ChangedFlags, Context, DeviceRole, EnergyScanCallback,
    EnergyScanResult, ExtAddress, ExtendedPanId, NetworkName, StateChangedCallback,
};
