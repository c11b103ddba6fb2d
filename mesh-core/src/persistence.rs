//! Destructive operations on persisted settings and device reset.

use log::{info, warn};

use crate::error::Error;
use crate::instance::Instance;
use crate::stack::{MeshInterface, Platform, Stack};
use crate::types::DeviceRole;

impl<S: Stack> Instance<S> {
    /// Reset the device through the platform. In-memory state is left as
    /// is; the platform restarts the process.
    pub fn reset(&mut self) {
        info!("platform reset");
        self.platform.reset();
    }

    /// Wipe all persisted settings, then reset. The wipe always completes
    /// before the reset so the next boot starts from empty settings.
    pub fn factory_reset(&mut self) {
        info!("factory reset: wiping settings");
        self.platform.settings_wipe();
        self.platform.reset();
    }

    /// Wipe persisted settings without resetting. Only allowed while the
    /// mesh protocol is disabled; otherwise [`Error::InvalidState`] and the
    /// settings are left untouched.
    pub fn erase_persistent_info(&mut self) -> Result<(), Error> {
        let role = self.mesh_interface.role();
        if role != DeviceRole::Disabled {
            warn!("refusing to erase persistent info while {}", role);
            return Err(Error::InvalidState);
        }
        self.platform.settings_wipe();
        info!("persistent info erased");
        Ok(())
    }
}
