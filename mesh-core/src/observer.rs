//! Fixed-capacity registry of state-change observers.
//!
//! Slots are bound in stable index order and relayed to the mesh interface,
//! which does the actual delivery.

use crate::error::Error;
use crate::stack::MeshInterface;
use crate::types::{ChangedFlags, Context, StateChangedCallback};

/// Number of state-change observers an instance can hold.
pub const MAX_STATE_CALLBACKS: usize = 2;

/// Index of an observer slot. Stable for as long as the slot stays bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A bound (callback, context) pair.
#[derive(Debug, Clone, Copy)]
pub struct StateCallback {
    callback: StateChangedCallback,
    context: Context,
}

impl StateCallback {
    pub fn new(callback: StateChangedCallback, context: Context) -> Self {
        Self { callback, context }
    }

    /// True when this is exactly the given pair (callback compared by address).
    pub fn matches(&self, callback: StateChangedCallback, context: Context) -> bool {
        self.callback as usize == callback as usize && self.context == context
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn invoke(&self, flags: ChangedFlags) {
        (self.callback)(flags, self.context);
    }
}

/// Slot table of `N` optional observers.
#[derive(Debug)]
pub struct ObserverRegistry<const N: usize> {
    slots: [Option<StateCallback>; N],
}

impl<const N: usize> ObserverRegistry<N> {
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Bind the first free slot to the pair and hand it to the mesh interface.
    ///
    /// Fails with [`Error::NoBufs`] when every slot is bound. The same pair
    /// registered twice takes two slots and is delivered twice. If the mesh
    /// interface refuses the relay its error is returned and the slot stays bound.
    pub fn register<M>(
        &mut self,
        callback: StateChangedCallback,
        context: Context,
        mesh: &mut M,
    ) -> Result<(), Error>
    where
        M: MeshInterface + ?Sized,
    {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(Error::NoBufs)?;
        let bound = StateCallback::new(callback, context);
        *slot = Some(bound);
        log::debug!("state callback bound to slot {}", index);
        mesh.register_callback(SlotId(index), bound)
    }

    /// Unbind the first slot holding exactly this pair. Unknown pairs are ignored.
    pub fn remove<M>(&mut self, callback: StateChangedCallback, context: Context, mesh: &mut M)
    where
        M: MeshInterface + ?Sized,
    {
        let found = self.slots.iter_mut().enumerate().find(|(_, slot)| {
            slot.as_ref()
                .is_some_and(|bound| bound.matches(callback, context))
        });
        if let Some((index, slot)) = found {
            mesh.remove_callback(SlotId(index));
            *slot = None;
            log::debug!("state callback removed from slot {}", index);
        }
    }

    pub fn get(&self, slot: SlotId) -> Option<&StateCallback> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for ObserverRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
