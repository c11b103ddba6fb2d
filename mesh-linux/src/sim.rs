//! Simulated subsystems hosted by the instance: file-backed settings, a
//! network layer, and a mesh interface that walks through attach states.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use log::{debug, error, info, warn};
use mesh_core::{
    ChangedFlags, DeviceRole, Error, ExtendedPanId, MeshInterface, NetworkLayer, NetworkName,
    Platform, SlotId, Stack, StateCallback, MAX_STATE_CALLBACKS,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exit status used when re-executing after a platform reset fails.
pub const RESET_EXIT_CODE: i32 = 75;

const NETWORK_INFO_FILE: &str = "network-info.bin";

/// Ticks spent detached before forming a new partition.
const FORM_AFTER_TICKS: u32 = 3;

/// Ticks spent as a child before upgrading to router.
const ROUTER_AFTER_TICKS: u32 = 2;

/// Settings handed to the simulated stack before the instance is constructed.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub settings_dir: PathBuf,
    pub auto_start: bool,
    pub network_name: String,
    pub channel: u8,
    pub message_buffers: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            settings_dir: std::env::temp_dir().join("meshnode"),
            auto_start: false,
            network_name: "meshnode".to_string(),
            channel: 15,
            message_buffers: 44,
        }
    }
}

static SIM_CONFIG: OnceLock<SimConfig> = OnceLock::new();

/// Install the configuration the stack constructors read. Must run before
/// the first `init_single`.
pub fn install(config: SimConfig) -> anyhow::Result<()> {
    SIM_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("simulated stack already configured"))
}

fn sim_config() -> SimConfig {
    SIM_CONFIG.get().cloned().unwrap_or_default()
}

/// Stack bundle for the Linux daemon.
pub struct SimStack;

impl Stack for SimStack {
    type Platform = FilePlatform;
    type TimerMilli = MilliClock;
    #[cfg(feature = "usec-timer")]
    type TimerMicro = MicroClock;
    type NetworkLayer = SimNetworkLayer;
    type MeshInterface = SimMesh;
    #[cfg(feature = "raw-link")]
    type LinkRaw = ();
    #[cfg(feature = "app-transport")]
    type AppTransport = ();
    type MessagePool = SimMessagePool;

    fn platform() -> FilePlatform {
        FilePlatform::new(sim_config().settings_dir)
    }

    fn timer_milli() -> MilliClock {
        MilliClock::new()
    }

    #[cfg(feature = "usec-timer")]
    fn timer_micro() -> MicroClock {
        MicroClock::new()
    }

    fn network_layer() -> SimNetworkLayer {
        SimNetworkLayer::new()
    }

    fn mesh_interface(network_layer: &mut SimNetworkLayer) -> SimMesh {
        let cfg = sim_config();
        SimMesh::new(&cfg, network_layer)
    }

    #[cfg(feature = "raw-link")]
    fn link_raw() {}

    #[cfg(feature = "app-transport")]
    fn app_transport() {}

    fn message_pool() -> SimMessagePool {
        SimMessagePool::new(sim_config().message_buffers)
    }
}

/// Settings live as files in one directory.
#[derive(Debug)]
pub struct FilePlatform {
    dir: PathBuf,
}

impl FilePlatform {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Platform for FilePlatform {
    fn settings_init(&mut self) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!("settings dir {}: {}", self.dir.display(), e);
        }
    }

    fn settings_wipe(&mut self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("nothing to wipe in {}: {}", self.dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("cannot remove {}: {}", path.display(), e);
                }
            }
        }
        info!("settings wiped in {}", self.dir.display());
    }

    fn reset(&mut self) {
        warn!("platform reset: restarting");
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                error!("cannot locate executable: {}", e);
                std::process::exit(RESET_EXIT_CODE);
            }
        };
        // Drop one-shot flags so the restarted process does not repeat them.
        let args: Vec<std::ffi::OsString> = std::env::args_os()
            .skip(1)
            .filter(|a| a != "--factory-reset" && a != "--erase")
            .collect();
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let err = std::process::Command::new(&exe).args(&args).exec();
            error!("re-exec of {} failed: {}", exe.display(), err);
        }
        std::process::exit(RESET_EXIT_CODE);
    }
}

/// Millisecond clock since construction.
#[derive(Debug)]
pub struct MilliClock {
    start: Instant,
}

impl MilliClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MilliClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Microsecond clock since construction.
#[cfg(feature = "usec-timer")]
#[derive(Debug)]
pub struct MicroClock {
    start: Instant,
}

#[cfg(feature = "usec-timer")]
impl MicroClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

#[cfg(feature = "usec-timer")]
impl Default for MicroClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed number of message buffers; the daemon only reports it.
#[derive(Debug)]
pub struct SimMessagePool {
    capacity: usize,
}

impl SimMessagePool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Network layer whose only state is whether the interface is up. The
/// mesh interface shares the flag so it can refuse to start while down.
#[derive(Debug)]
pub struct SimNetworkLayer {
    up: Arc<AtomicBool>,
}

impl SimNetworkLayer {
    pub fn new() -> Self {
        Self {
            up: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a mesh interface: it gets a view of the up/down flag.
    fn attach(&mut self) -> Arc<AtomicBool> {
        self.up.clone()
    }
}

impl Default for SimNetworkLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkLayer for SimNetworkLayer {
    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        let was = self.up.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!("network layer {}", if enabled { "up" } else { "down" });
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Network parameters the simulated mesh persists. The encoding is bincode
/// and private to this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network_name: NetworkName,
    pub extended_pan_id: ExtendedPanId,
    pub pan_id: u16,
    pub channel: u8,
}

/// Mesh interface that attaches on its own after being enabled: rejoins a
/// restored network as a child, or forms a new one as leader.
#[derive(Debug)]
pub struct SimMesh {
    settings_dir: PathBuf,
    interface_up: Arc<AtomicBool>,
    auto_start: bool,
    form_name: String,
    form_channel: u8,
    role: DeviceRole,
    network: Option<NetworkInfo>,
    ticks_in_role: u32,
    pending: ChangedFlags,
    relays: [Option<StateCallback>; MAX_STATE_CALLBACKS],
}

impl SimMesh {
    pub fn new(cfg: &SimConfig, network_layer: &mut SimNetworkLayer) -> Self {
        Self {
            settings_dir: cfg.settings_dir.clone(),
            interface_up: network_layer.attach(),
            auto_start: cfg.auto_start,
            form_name: cfg.network_name.clone(),
            form_channel: cfg.channel,
            role: DeviceRole::Disabled,
            network: None,
            ticks_in_role: 0,
            pending: ChangedFlags::empty(),
            relays: [None; MAX_STATE_CALLBACKS],
        }
    }

    pub fn network(&self) -> Option<&NetworkInfo> {
        self.network.as_ref()
    }

    fn info_path(&self) -> PathBuf {
        self.settings_dir.join(NETWORK_INFO_FILE)
    }

    fn set_role(&mut self, role: DeviceRole) {
        if self.role != role {
            info!("role {} -> {}", self.role, role);
            self.role = role;
            self.ticks_in_role = 0;
            self.pending |= ChangedFlags::ROLE;
        }
    }

    fn save(&self, info: &NetworkInfo) {
        let bytes = match bincode::serialize(info) {
            Ok(b) => b,
            Err(e) => {
                error!("encode network info: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(self.info_path(), bytes) {
            warn!("persist network info: {}", e);
        }
    }

    fn form_network(&mut self) {
        let mut rng = rand::thread_rng();
        let name = NetworkName::new(&self.form_name).unwrap_or_default();
        let info = NetworkInfo {
            network_name: name,
            extended_pan_id: ExtendedPanId(rng.gen()),
            pan_id: rng.gen(),
            channel: self.form_channel,
        };
        info!(
            "formed network '{}' pan {:#06x} xpan {} on channel {}",
            info.network_name, info.pan_id, info.extended_pan_id, info.channel
        );
        self.save(&info);
        self.network = Some(info);
        self.pending |= ChangedFlags::PARTITION_ID
            | ChangedFlags::NETWORK_NAME
            | ChangedFlags::EXTENDED_PAN_ID
            | ChangedFlags::PAN_ID
            | ChangedFlags::CHANNEL
            | ChangedFlags::ACTIVE_DATASET;
        self.set_role(DeviceRole::Leader);
    }

    /// Advance the attach state machine by one tick and deliver any
    /// accumulated changes to the registered observers.
    pub fn tick(&mut self) -> ChangedFlags {
        self.ticks_in_role = self.ticks_in_role.saturating_add(1);
        match self.role {
            DeviceRole::Detached if self.network.is_some() => {
                self.set_role(DeviceRole::Child);
            }
            DeviceRole::Detached if self.ticks_in_role >= FORM_AFTER_TICKS => {
                self.form_network();
            }
            DeviceRole::Child if self.ticks_in_role >= ROUTER_AFTER_TICKS => {
                self.set_role(DeviceRole::Router);
            }
            _ => {}
        }
        self.flush()
    }

    fn flush(&mut self) -> ChangedFlags {
        let flags = std::mem::replace(&mut self.pending, ChangedFlags::empty());
        if !flags.is_empty() {
            for relay in self.relays.iter().flatten() {
                relay.invoke(flags);
            }
        }
        flags
    }
}

impl MeshInterface for SimMesh {
    fn restore(&mut self) -> Result<(), Error> {
        let bytes = std::fs::read(self.info_path()).map_err(|_| Error::NotFound)?;
        let info: NetworkInfo = bincode::deserialize(&bytes).map_err(|e| {
            warn!("discarding unreadable network info: {}", e);
            Error::Failed
        })?;
        info!("restored network '{}'", info.network_name);
        self.network = Some(info);
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), Error> {
        if enabled {
            if !self.interface_up.load(Ordering::SeqCst) {
                return Err(Error::InvalidState);
            }
            if self.role == DeviceRole::Disabled {
                self.set_role(DeviceRole::Detached);
            }
        } else {
            self.set_role(DeviceRole::Disabled);
        }
        self.flush();
        Ok(())
    }

    fn role(&self) -> DeviceRole {
        self.role
    }

    fn auto_start(&self) -> bool {
        self.auto_start
    }

    fn register_callback(&mut self, slot: SlotId, callback: StateCallback) -> Result<(), Error> {
        let relay = self.relays.get_mut(slot.index()).ok_or(Error::InvalidArgs)?;
        *relay = Some(callback);
        Ok(())
    }

    fn remove_callback(&mut self, slot: SlotId) {
        if let Some(relay) = self.relays.get_mut(slot.index()) {
            *relay = None;
        }
    }
}
