//! Seams between the instance and the subsystems it hosts.
//!
//! The instance never looks inside these collaborators. It constructs them
//! through a [`Stack`] in a fixed order and only sequences calls into them.

use crate::error::Error;
use crate::observer::{SlotId, StateCallback};
use crate::types::DeviceRole;

/// Platform layer below the stack: non-volatile settings and device reset.
pub trait Platform {
    /// Prepare the settings store for use. Called once per instance init.
    fn settings_init(&mut self);

    /// Erase every persisted setting.
    fn settings_wipe(&mut self);

    /// Reset the device. On real hardware this does not return to the
    /// caller in any meaningful way; the process restarts.
    fn reset(&mut self);
}

/// Network-layer (IPv6) stack.
pub trait NetworkLayer {
    /// Bring the network-layer interface up or down.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error>;

    fn is_enabled(&self) -> bool;
}

/// Mesh network interface: link establishment, routing and role changes.
///
/// Holds a relation to bound observer slots and is the one that actually
/// delivers state-change notifications.
pub trait MeshInterface {
    /// Restore network information from persisted settings.
    fn restore(&mut self) -> Result<(), Error>;

    /// Start or stop the mesh protocol.
    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error>;

    fn role(&self) -> DeviceRole;

    /// Whether the mesh protocol is configured to start right after init.
    fn auto_start(&self) -> bool;

    /// Start relaying state changes to the callback bound in `slot`.
    fn register_callback(&mut self, slot: SlotId, callback: StateCallback) -> Result<(), Error>;

    /// Stop relaying to `slot`.
    fn remove_callback(&mut self, slot: SlotId);
}

/// Build-time bundle naming the concrete subsystems an instance hosts.
///
/// The constructors are called in declaration order by instance
/// construction: platform, timers, network layer, mesh interface (which may
/// register itself with the network layer), optional modules, message pool.
pub trait Stack: Sized {
    type Platform: Platform;
    type TimerMilli;
    #[cfg(feature = "usec-timer")]
    type TimerMicro;
    type NetworkLayer: NetworkLayer;
    type MeshInterface: MeshInterface;
    #[cfg(feature = "raw-link")]
    type LinkRaw;
    #[cfg(feature = "app-transport")]
    type AppTransport;
    type MessagePool;

    fn platform() -> Self::Platform;

    fn timer_milli() -> Self::TimerMilli;

    #[cfg(feature = "usec-timer")]
    fn timer_micro() -> Self::TimerMicro;

    fn network_layer() -> Self::NetworkLayer;

    fn mesh_interface(network_layer: &mut Self::NetworkLayer) -> Self::MeshInterface;

    #[cfg(feature = "raw-link")]
    fn link_raw() -> Self::LinkRaw;

    #[cfg(feature = "app-transport")]
    fn app_transport() -> Self::AppTransport;

    fn message_pool() -> Self::MessagePool;
}
