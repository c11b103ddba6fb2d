//! Value types passed between the instance, its collaborators and application callbacks.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Participation level of this device in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Mesh protocol is stopped.
    #[default]
    Disabled,
    /// Running but not attached to any partition.
    Detached,
    /// Attached as an end device.
    Child,
    /// Attached as a router.
    Router,
    /// Attached as the partition leader.
    Leader,
}

impl DeviceRole {
    pub fn is_attached(self) -> bool {
        matches!(self, Self::Child | Self::Router | Self::Leader)
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Detached => "detached",
            Self::Child => "child",
            Self::Router => "router",
            Self::Leader => "leader",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// What changed on the mesh interface since the last notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangedFlags: u32 {
        const ADDRESS_ADDED = 1 << 0;
        const ADDRESS_REMOVED = 1 << 1;
        /// Device role changed.
        const ROLE = 1 << 2;
        const LINK_LOCAL_ADDRESS = 1 << 3;
        const MESH_LOCAL_ADDRESS = 1 << 4;
        const ROUTING_LOCATOR_ADDED = 1 << 5;
        const ROUTING_LOCATOR_REMOVED = 1 << 6;
        const PARTITION_ID = 1 << 7;
        const KEY_SEQUENCE = 1 << 8;
        const NETWORK_DATA = 1 << 9;
        const CHILD_ADDED = 1 << 10;
        const CHILD_REMOVED = 1 << 11;
        const MULTICAST_SUBSCRIBED = 1 << 12;
        const MULTICAST_UNSUBSCRIBED = 1 << 13;
        const CHANNEL = 1 << 16;
        const PAN_ID = 1 << 17;
        const NETWORK_NAME = 1 << 18;
        const EXTENDED_PAN_ID = 1 << 19;
        const MASTER_KEY = 1 << 20;
        const PSKC = 1 << 21;
        const SECURITY_POLICY = 1 << 22;
        const ACTIVE_DATASET = 1 << 23;
        const PENDING_DATASET = 1 << 24;
        /// Network interface went up or down.
        const INTERFACE_STATE = 1 << 26;
    }
}

/// Opaque word handed back to a callback. Pairs compare by value, so a
/// context is usually the address of the caller's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Context(usize);

impl Context {
    pub const NONE: Context = Context(0);

    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    pub fn value(self) -> usize {
        self.0
    }
}

/// Called with the set of changes whenever the mesh interface state changes.
pub type StateChangedCallback = fn(flags: ChangedFlags, context: Context);

/// Called once per discovered neighbour, then once with `None` when the scan completes.
pub type ActiveScanCallback = fn(result: Option<&ActiveScanResult>, context: Context);

/// Called once per scanned channel, then once with `None` when the scan completes.
pub type EnergyScanCallback = fn(result: Option<&EnergyScanResult>, context: Context);

/// IEEE 802.15.4 extended address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtAddress(pub [u8; 8]);

/// Extended PAN identifier of a mesh network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExtendedPanId(pub [u8; 8]);

macro_rules! hex_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    };
}

hex_display!(ExtAddress);
hex_display!(ExtendedPanId);

/// Human-readable network name, at most 16 bytes of UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NetworkName {
    bytes: [u8; NetworkName::MAX_LEN],
    len: u8,
}

impl NetworkName {
    pub const MAX_LEN: usize = 16;

    pub fn new(name: &str) -> Result<Self, Error> {
        if name.len() > Self::MAX_LEN {
            return Err(Error::InvalidArgs);
        }
        let mut bytes = [0u8; Self::MAX_LEN];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            bytes,
            len: name.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        let len = usize::from(self.len).min(Self::MAX_LEN);
        std::str::from_utf8(&self.bytes[..len]).unwrap_or("")
    }
}

impl fmt::Display for NetworkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One neighbour found by an active scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActiveScanResult {
    pub ext_address: ExtAddress,
    pub network_name: NetworkName,
    pub extended_pan_id: ExtendedPanId,
    pub pan_id: u16,
    pub channel: u8,
    /// Received signal strength in dBm.
    pub rssi: i8,
    pub lqi: u8,
    pub version: u8,
    pub is_native: bool,
    pub is_joinable: bool,
}

/// Energy measured on one channel by an energy scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnergyScanResult {
    pub channel: u8,
    /// Maximum RSSI seen on the channel, in dBm.
    pub max_rssi: i8,
}
