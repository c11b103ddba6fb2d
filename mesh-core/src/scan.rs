//! Single-subscriber delivery of active and energy scan results.

use std::fmt;

use crate::types::{ActiveScanCallback, ActiveScanResult, Context, EnergyScanCallback, EnergyScanResult};

/// Current subscriber for one kind of scan result. A new registration
/// replaces the old one; nothing is queued.
pub struct ScanSubscription<R: 'static> {
    callback: Option<fn(Option<&R>, Context)>,
    context: Context,
}

impl<R: 'static> ScanSubscription<R> {
    pub const fn new() -> Self {
        Self {
            callback: None,
            context: Context::NONE,
        }
    }

    /// Replace the subscriber. `None` stops delivery.
    pub fn set(&mut self, callback: Option<fn(Option<&R>, Context)>, context: Context) {
        self.callback = callback;
        self.context = context;
    }

    pub fn is_set(&self) -> bool {
        self.callback.is_some()
    }

    /// Hand `result` to the subscriber, if any. `None` marks scan completion.
    pub fn invoke(&self, result: Option<&R>) {
        if let Some(callback) = self.callback {
            callback(result, self.context);
        }
    }
}

impl<R: 'static> fmt::Debug for ScanSubscription<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSubscription")
            .field("subscribed", &self.is_set())
            .field("context", &self.context)
            .finish()
    }
}

impl<R: 'static> Default for ScanSubscription<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Active-scan and energy-scan subscribers of one instance.
#[derive(Debug, Default)]
pub struct ScanDispatcher {
    active: ScanSubscription<ActiveScanResult>,
    energy: ScanSubscription<EnergyScanResult>,
}

impl ScanDispatcher {
    pub const fn new() -> Self {
        Self {
            active: ScanSubscription::new(),
            energy: ScanSubscription::new(),
        }
    }

    pub fn register_active(&mut self, callback: Option<ActiveScanCallback>, context: Context) {
        self.active.set(callback, context);
    }

    pub fn register_energy(&mut self, callback: Option<EnergyScanCallback>, context: Context) {
        self.energy.set(callback, context);
    }

    pub fn invoke_active(&self, result: Option<&ActiveScanResult>) {
        self.active.invoke(result);
    }

    pub fn invoke_energy(&self, result: Option<&EnergyScanResult>) {
        self.energy.invoke(result);
    }

    pub fn active(&self) -> &ScanSubscription<ActiveScanResult> {
        &self.active
    }

    pub fn energy(&self) -> &ScanSubscription<EnergyScanResult> {
        &self.energy
    }
}
