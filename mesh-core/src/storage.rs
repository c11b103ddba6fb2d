//! Where instances live: one process-wide region, or caller-supplied buffers.

use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::{ptr, slice};

use log::{debug, warn};
use spin::{Mutex, MutexGuard};

use crate::error::Error;
use crate::instance::Instance;
use crate::stack::Stack;

/// Raw region plus the flag saying whether it holds a constructed instance.
struct Region<S: Stack> {
    constructed: bool,
    storage: MaybeUninit<Instance<S>>,
}

impl<S: Stack> Drop for Region<S> {
    fn drop(&mut self) {
        if self.constructed {
            // SAFETY: `constructed` is only set after `storage` was written.
            unsafe { self.storage.assume_init_drop() };
        }
    }
}

/// Storage for the single process-wide instance.
///
/// Place it in a `static`:
///
/// ```ignore
/// static INSTANCE: SingleInstance<MyStack> = SingleInstance::new();
/// let instance = INSTANCE.init_single()?;
/// ```
///
/// Access is serialised by a spin lock that is never waited on: a
/// [`SingleHandle`] holds it, and while one is alive `init_single` fails
/// with [`Error::Busy`] and `get` returns `None`. The stack runs to
/// completion on one thread, so a held lock means re-entry, for example
/// an observer reaching back into the region during dispatch.
pub struct SingleInstance<S: Stack> {
    region: Mutex<Region<S>>,
}

impl<S: Stack> SingleInstance<S> {
    pub const fn new() -> Self {
        Self {
            region: Mutex::new(Region {
                constructed: false,
                storage: MaybeUninit::uninit(),
            }),
        }
    }

    /// Return the live instance, constructing and initializing it first if
    /// the region is empty or holds a finalized instance. Calling this again
    /// while initialized hands back the same instance untouched.
    ///
    /// Fails with [`Error::Busy`] while another handle to the region is alive.
    pub fn init_single(&self) -> Result<SingleHandle<'_, S>, Error> {
        let mut region = self.region.try_lock().ok_or_else(|| {
            warn!("single instance is already borrowed");
            Error::Busy
        })?;
        // SAFETY: the storage is read only when `constructed` says it was written.
        let live = region.constructed && unsafe { region.storage.assume_init_ref() }.is_initialized();
        if !live {
            if region.constructed {
                region.constructed = false;
                // SAFETY: constructed, and the flag was cleared first.
                unsafe { region.storage.assume_init_drop() };
            }
            let instance = region.storage.write(Instance::new());
            instance.after_init();
            region.constructed = true;
            debug!("single instance initialized");
        }
        Ok(SingleHandle { region })
    }

    /// Handle to the instance in the region, or `None` before the first
    /// [`Self::init_single`] or while another handle is alive. A finalized
    /// instance is still returned.
    pub fn get(&self) -> Option<SingleHandle<'_, S>> {
        let region = self.region.try_lock()?;
        region.constructed.then_some(SingleHandle { region })
    }

    /// Drop whatever the region holds and return it to the empty state.
    /// Meant for tests that reuse one region across cases. Fails with
    /// [`Error::Busy`] while a handle is alive.
    pub fn clear(&self) -> Result<(), Error> {
        let mut region = self.region.try_lock().ok_or(Error::Busy)?;
        if region.constructed {
            region.constructed = false;
            // SAFETY: constructed, and the flag was cleared first.
            unsafe { region.storage.assume_init_drop() };
        }
        Ok(())
    }
}

impl<S: Stack> Default for SingleInstance<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locked access to the single instance.
pub struct SingleHandle<'a, S: Stack> {
    region: MutexGuard<'a, Region<S>>,
}

impl<S: Stack> Deref for SingleHandle<'_, S> {
    type Target = Instance<S>;

    fn deref(&self) -> &Instance<S> {
        // SAFETY: handles are only created over a constructed region and
        // hold its lock, so nothing can clear it meanwhile.
        unsafe { self.region.storage.assume_init_ref() }
    }
}

impl<S: Stack> DerefMut for SingleHandle<'_, S> {
    fn deref_mut(&mut self) -> &mut Instance<S> {
        // SAFETY: as in `deref`.
        unsafe { self.region.storage.assume_init_mut() }
    }
}

/// Correctly sized and aligned backing storage for [`Instance::init`].
pub struct InstanceBuffer<S: Stack> {
    storage: MaybeUninit<Instance<S>>,
}

impl<S: Stack> InstanceBuffer<S> {
    pub const fn new() -> Self {
        Self {
            storage: MaybeUninit::uninit(),
        }
    }

    /// The buffer as raw bytes, ready to pass to [`Instance::init`].
    pub fn as_bytes_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: any memory is valid as `MaybeUninit<u8>`; length and
        // lifetime are those of `self.storage`.
        unsafe {
            slice::from_raw_parts_mut(
                self.storage.as_mut_ptr().cast::<MaybeUninit<u8>>(),
                mem::size_of::<Instance<S>>(),
            )
        }
    }
}

impl<S: Stack> Default for InstanceBuffer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stack> Instance<S> {
    /// Bytes of storage one instance needs.
    pub const fn required_size() -> usize {
        mem::size_of::<Self>()
    }

    /// Construct and initialize an instance at the start of a caller buffer.
    ///
    /// `size` is the usable size the caller claims for `buffer`. When it is
    /// smaller than [`Self::required_size`] the required size is written
    /// back and [`Error::InsufficientBuffer`] returned, so passing `None`
    /// with a zero size is a size query. A missing or misaligned buffer
    /// fails with [`Error::InvalidArgs`].
    ///
    /// The buffer stays borrowed for as long as the handle lives; dropping
    /// the handle finalizes the instance and frees the buffer for reuse.
    pub fn init<'a>(
        buffer: Option<&'a mut [MaybeUninit<u8>]>,
        size: &mut usize,
    ) -> Result<InstanceHandle<'a, S>, Error> {
        let required = Self::required_size();
        if *size < required {
            *size = required;
            return Err(Error::InsufficientBuffer { required });
        }
        let buffer = buffer.ok_or(Error::InvalidArgs)?;
        if buffer.len() < required {
            *size = required;
            return Err(Error::InsufficientBuffer { required });
        }
        let place = buffer.as_mut_ptr().cast::<Self>();
        if place.align_offset(mem::align_of::<Self>()) != 0 {
            return Err(Error::InvalidArgs);
        }

        // SAFETY: `place` is aligned, points at `required` writable bytes
        // and is exclusively borrowed for 'a.
        let instance = unsafe {
            place.write(Self::new());
            &mut *place
        };
        instance.after_init();
        Ok(InstanceHandle {
            instance,
            _buffer: PhantomData,
        })
    }
}

/// Exclusive handle to an instance living in a caller buffer.
pub struct InstanceHandle<'a, S: Stack> {
    instance: &'a mut Instance<S>,
    _buffer: PhantomData<&'a mut [MaybeUninit<u8>]>,
}

impl<S: Stack> Deref for InstanceHandle<'_, S> {
    type Target = Instance<S>;

    fn deref(&self) -> &Instance<S> {
        self.instance
    }
}

impl<S: Stack> DerefMut for InstanceHandle<'_, S> {
    fn deref_mut(&mut self) -> &mut Instance<S> {
        self.instance
    }
}

impl<S: Stack> Drop for InstanceHandle<'_, S> {
    fn drop(&mut self) {
        self.instance.finalize();
        // SAFETY: the instance was written by `Instance::init` and this
        // handle is its only owner; the buffer is never read as an
        // instance again without another `init`.
        unsafe { ptr::drop_in_place(&mut *self.instance as *mut Instance<S>) };
    }
}
