//! Composition root: owns every hosted subsystem and drives its lifecycle.

#[cfg(feature = "dynamic-log-level")]
use log::LevelFilter;
#[cfg(feature = "auto-start")]
use log::warn;
use log::{debug, info};

use crate::error::Error;
use crate::observer::{ObserverRegistry, MAX_STATE_CALLBACKS};
use crate::scan::ScanDispatcher;
use crate::stack::{MeshInterface, NetworkLayer, Platform, Stack};
use crate::types::{
    ActiveScanCallback, ActiveScanResult, Context, EnergyScanCallback, EnergyScanResult,
    StateChangedCallback,
};

/// Log level an instance starts with when the level is adjustable at runtime.
#[cfg(feature = "dynamic-log-level")]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// One mesh stack instance.
///
/// Obtained through [`crate::SingleInstance::init_single`] or
/// [`Instance::init`]; both construct the subsystems and run the after-init
/// sequence before handing the instance out.
pub struct Instance<S: Stack> {
    // Fields drop in declaration order: hosted subsystems are listed in
    // reverse construction order so teardown mirrors construction.
    message_pool: S::MessagePool,
    #[cfg(feature = "app-transport")]
    app_transport: S::AppTransport,
    #[cfg(feature = "raw-link")]
    link_raw: S::LinkRaw,
    pub(crate) mesh_interface: S::MeshInterface,
    network_layer: S::NetworkLayer,
    #[cfg(feature = "usec-timer")]
    timer_micro: S::TimerMicro,
    timer_milli: S::TimerMilli,
    pub(crate) platform: S::Platform,
    observers: ObserverRegistry<MAX_STATE_CALLBACKS>,
    scan: ScanDispatcher,
    #[cfg(feature = "dynamic-log-level")]
    log_level: LevelFilter,
    initialized: bool,
}

impl<S: Stack> Instance<S> {
    /// Construct every hosted subsystem in the fixed order. The result is
    /// not initialized; callers always follow with [`Self::after_init`].
    pub(crate) fn new() -> Self {
        let platform = S::platform();
        let timer_milli = S::timer_milli();
        #[cfg(feature = "usec-timer")]
        let timer_micro = S::timer_micro();
        let mut network_layer = S::network_layer();
        let mesh_interface = S::mesh_interface(&mut network_layer);
        #[cfg(feature = "raw-link")]
        let link_raw = S::link_raw();
        #[cfg(feature = "app-transport")]
        let app_transport = S::app_transport();
        let message_pool = S::message_pool();
        debug!("instance constructed");

        Self {
            message_pool,
            #[cfg(feature = "app-transport")]
            app_transport,
            #[cfg(feature = "raw-link")]
            link_raw,
            mesh_interface,
            network_layer,
            #[cfg(feature = "usec-timer")]
            timer_micro,
            timer_milli,
            platform,
            observers: ObserverRegistry::new(),
            scan: ScanDispatcher::new(),
            #[cfg(feature = "dynamic-log-level")]
            log_level: DEFAULT_LOG_LEVEL,
            initialized: false,
        }
    }

    /// Runs once per construction: mark initialized, bring up settings,
    /// restore network info, then auto-start if configured.
    pub(crate) fn after_init(&mut self) {
        self.initialized = true;

        self.platform.settings_init();
        if let Err(err) = self.mesh_interface.restore() {
            info!("no network info restored: {}", err);
        }

        #[cfg(feature = "auto-start")]
        if self.mesh_interface.auto_start() {
            self.auto_start();
        }

        info!("instance initialized");
    }

    /// Enable the network layer, then the mesh protocol. A mesh failure
    /// takes the network layer back down; a network-layer failure stops
    /// before the mesh protocol is touched.
    #[cfg(feature = "auto-start")]
    fn auto_start(&mut self) {
        if let Err(err) = self.network_layer.set_enabled(true) {
            warn!("auto-start: network layer did not come up: {}", err);
            return;
        }
        if let Err(err) = self.mesh_interface.set_enabled(true) {
            warn!("auto-start: mesh protocol did not start ({}), disabling network layer", err);
            let _ = self.network_layer.set_enabled(false);
            return;
        }
        info!("auto-start: mesh protocol started");
    }

    /// Best-effort teardown. Subsystem errors are ignored; the instance
    /// always ends up finalized. No-op when not initialized.
    pub fn finalize(&mut self) {
        if !self.initialized {
            return;
        }
        let _ = self.mesh_interface.set_enabled(false);
        let _ = self.network_layer.set_enabled(false);
        self.initialized = false;
        info!("instance finalized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Subscribe to interface state changes. Fails with [`Error::NoBufs`]
    /// when all [`MAX_STATE_CALLBACKS`] slots are taken.
    pub fn register_state_changed_callback(
        &mut self,
        callback: StateChangedCallback,
        context: Context,
    ) -> Result<(), Error> {
        self.observers
            .register(callback, context, &mut self.mesh_interface)
    }

    /// Drop the first subscription matching the pair; unknown pairs are ignored.
    pub fn remove_state_changed_callback(&mut self, callback: StateChangedCallback, context: Context) {
        self.observers
            .remove(callback, context, &mut self.mesh_interface);
    }

    pub fn observers(&self) -> &ObserverRegistry<MAX_STATE_CALLBACKS> {
        &self.observers
    }

    pub fn register_active_scan_callback(
        &mut self,
        callback: Option<ActiveScanCallback>,
        context: Context,
    ) {
        self.scan.register_active(callback, context);
    }

    pub fn register_energy_scan_callback(
        &mut self,
        callback: Option<EnergyScanCallback>,
        context: Context,
    ) {
        self.scan.register_energy(callback, context);
    }

    /// Deliver an active-scan result (or the `None` completion marker).
    /// Dropped when nobody is subscribed.
    pub fn invoke_active_scan_callback(&self, result: Option<&ActiveScanResult>) {
        self.scan.invoke_active(result);
    }

    /// Deliver an energy-scan result (or the `None` completion marker).
    pub fn invoke_energy_scan_callback(&self, result: Option<&EnergyScanResult>) {
        self.scan.invoke_energy(result);
    }

    #[cfg(feature = "dynamic-log-level")]
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Change the runtime log level; also caps the global `log` filter.
    #[cfg(feature = "dynamic-log-level")]
    pub fn set_log_level(&mut self, level: LevelFilter) {
        self.log_level = level;
        log::set_max_level(level);
    }

    pub fn platform(&self) -> &S::Platform {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut S::Platform {
        &mut self.platform
    }

    pub fn timer_milli(&self) -> &S::TimerMilli {
        &self.timer_milli
    }

    pub fn timer_milli_mut(&mut self) -> &mut S::TimerMilli {
        &mut self.timer_milli
    }

    #[cfg(feature = "usec-timer")]
    pub fn timer_micro(&self) -> &S::TimerMicro {
        &self.timer_micro
    }

    #[cfg(feature = "usec-timer")]
    pub fn timer_micro_mut(&mut self) -> &mut S::TimerMicro {
        &mut self.timer_micro
    }

    pub fn network_layer(&self) -> &S::NetworkLayer {
        &self.network_layer
    }

    pub fn network_layer_mut(&mut self) -> &mut S::NetworkLayer {
        &mut self.network_layer
    }

    pub fn mesh_interface(&self) -> &S::MeshInterface {
        &self.mesh_interface
    }

    pub fn mesh_interface_mut(&mut self) -> &mut S::MeshInterface {
        &mut self.mesh_interface
    }

    #[cfg(feature = "raw-link")]
    pub fn link_raw(&self) -> &S::LinkRaw {
        &self.link_raw
    }

    #[cfg(feature = "raw-link")]
    pub fn link_raw_mut(&mut self) -> &mut S::LinkRaw {
        &mut self.link_raw
    }

    #[cfg(feature = "app-transport")]
    pub fn app_transport(&self) -> &S::AppTransport {
        &self.app_transport
    }

    #[cfg(feature = "app-transport")]
    pub fn app_transport_mut(&mut self) -> &mut S::AppTransport {
        &mut self.app_transport
    }

    pub fn message_pool(&self) -> &S::MessagePool {
        &self.message_pool
    }

    pub fn message_pool_mut(&mut self) -> &mut S::MessagePool {
        &mut self.message_pool
    }
}
