//! Simulated radio scans: make up neighbours and channel energy, and feed
//! them to the instance the way a MAC layer would.

use mesh_core::{
    ActiveScanResult, EnergyScanResult, ExtAddress, ExtendedPanId, Instance, NetworkName, Stack,
};
use rand::Rng;

/// IEEE 802.15.4 2.4 GHz channels.
pub const CHANNELS: std::ops::RangeInclusive<u8> = 11..=26;

const MAX_NEIGHBOURS: usize = 4;

/// Run an active scan: one result per simulated neighbour, then the
/// completion marker. Returns the number of neighbours reported.
pub fn active_scan<S: Stack, R: Rng>(instance: &Instance<S>, rng: &mut R) -> usize {
    let found = rng.gen_range(0..=MAX_NEIGHBOURS);
    for i in 0..found {
        let result = neighbour(rng, i);
        instance.invoke_active_scan_callback(Some(&result));
    }
    instance.invoke_active_scan_callback(None);
    found
}

/// Run an energy scan over every channel, then the completion marker.
pub fn energy_scan<S: Stack, R: Rng>(instance: &Instance<S>, rng: &mut R) {
    for channel in CHANNELS {
        let result = EnergyScanResult {
            channel,
            max_rssi: rng.gen_range(-100..=-40),
        };
        instance.invoke_energy_scan_callback(Some(&result));
    }
    instance.invoke_energy_scan_callback(None);
}

fn neighbour<R: Rng>(rng: &mut R, index: usize) -> ActiveScanResult {
    let name = format!("mesh-{}", index);
    ActiveScanResult {
        ext_address: ExtAddress(rng.gen()),
        network_name: NetworkName::new(&name).unwrap_or_default(),
        extended_pan_id: ExtendedPanId(rng.gen()),
        pan_id: rng.gen(),
        channel: rng.gen_range(CHANNELS),
        rssi: rng.gen_range(-95..=-30),
        lqi: rng.gen(),
        version: 2,
        is_native: false,
        is_joinable: rng.gen_bool(0.25),
    }
}
