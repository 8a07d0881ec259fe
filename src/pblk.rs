//! The PBlk object model and copy-on-write protocol (C2).
//!
//! A `Pblk<T>` is the durable unit data structures build on: a fixed header (§3) followed by a
//! `T` payload. `T` must be `Freeze` (no interior mutability) so that `open_read_unsafe` and
//! descriptor helping can take a torn snapshot of it soundly.
//!
//! The operations below (`register_alloc`, `open_read`, `open_write`, `register_update`, `retire`,
//! `reclaim`) are exposed as methods on `OpFrame` rather than free functions taking an implicit
//! "current op" - the frame *is* the capability to call them, so `EpochSysError::NotInOp` (§7
//! kind 1) is unrepresentable for any caller going through this API instead of being a runtime
//! check.

use crate::{
    error::{EpochSysError, Result},
    internal::pending::PendingPblk,
    op_frame::OpFrame,
};
use freeze::Freeze;
use std::{
    cell::UnsafeCell,
    mem::{self, ManuallyDrop},
    ptr::NonNull,
    sync::atomic::{AtomicU64, AtomicU8, Ordering::*},
};

const FLAG_VALID: u8 = 1 << 0;
const FLAG_TOMBSTONE: u8 = 1 << 1;
const FLAG_COPY: u8 = 1 << 2;

/// Identifies a `PblkPayload`'s concrete type for recovery dispatch (§3 `type_id`).
///
/// # Safety
/// `TYPE_ID` must be unique across every `PblkPayload` a given `EpochSys` instance recovers.
pub unsafe trait PblkPayload: Freeze + 'static {
    const TYPE_ID: u16;
}

/// The durable header every `Pblk<T>` carries ahead of its payload (§3).
#[repr(C)]
pub struct PblkHeader {
    type_id: u16,
    flags: AtomicU8,
    id: u64,
    birth_epoch: AtomicU64,
    retire_epoch: AtomicU64,
    payload_size: u32,
}

impl PblkHeader {
    #[inline]
    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn birth_epoch(&self) -> u64 {
        self.birth_epoch.load(Acquire)
    }

    #[inline]
    pub fn retire_epoch(&self) -> u64 {
        self.retire_epoch.load(Acquire)
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.flags.load(Acquire) & FLAG_TOMBSTONE != 0
    }

    #[inline]
    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }

    fn pending_ref(&self) -> PendingPblk {
        PendingPblk {
            ptr: NonNull::from(self).cast::<u8>(),
            size: mem::size_of::<PblkHeader>() + self.payload_size as usize,
        }
    }
}

#[cfg(test)]
impl PblkHeader {
    pub(crate) fn zeroed_for_test() -> Self {
        PblkHeader {
            type_id: 0,
            flags: AtomicU8::new(0),
            id: 0,
            birth_epoch: AtomicU64::new(0),
            retire_epoch: AtomicU64::new(0),
            payload_size: 0,
        }
    }

    pub(crate) fn set_for_test(&mut self, id: u64, birth: u64, retire: u64, tombstone: bool) {
        self.id = id;
        self.birth_epoch.store(birth, Relaxed);
        self.retire_epoch.store(retire, Relaxed);
        if tombstone {
            self.flags.fetch_or(FLAG_TOMBSTONE, Relaxed);
        }
    }
}

/// A durable object: header plus payload, laid out contiguously so a single `pmalloc` covers
/// both (§3: "followed by subclass payload").
#[repr(C)]
pub struct Pblk<T: PblkPayload> {
    header: PblkHeader,
    payload: UnsafeCell<ManuallyDrop<T>>,
}

// Shared across threads behind raw pointers guarded by the epoch protocol, not by the aliasing
// rules `UnsafeCell` normally implies.
unsafe impl<T: PblkPayload + Send> Sync for Pblk<T> {}

impl<T: PblkPayload> Pblk<T> {
    #[inline]
    pub fn header(&self) -> &PblkHeader {
        &self.header
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.header.id
    }

    /// Reads the payload without any epoch bookkeeping.
    ///
    /// # Safety
    /// The caller must already hold the appropriate access from `OpFrame::open_read`,
    /// `open_read_unsafe`, or `open_write` - this by itself performs no synchronization.
    #[inline]
    pub unsafe fn payload(&self) -> &T {
        &*(self.payload.get() as *const T)
    }

    /// Mutable payload access, valid only through `OpFrame::open_write`'s in-place path (the
    /// returned `Pblk` was allocated, or already copy-on-written, in the calling frame's epoch).
    ///
    /// # Safety
    /// Same requirement as [`Pblk::payload`], plus exclusivity: no other thread may be reading
    /// this `Pblk` concurrently.
    #[inline]
    pub unsafe fn payload_mut(&self) -> &mut T {
        &mut *(self.payload.get() as *mut T)
    }

    /// Unsynchronized field access for construction time or single-threaded recovery, strictly
    /// outside any op frame (§ supplemented features: `original_source`'s `get_unsafe_*`).
    /// Debug-asserts no frame is open on the calling thread; release builds trust the caller.
    ///
    /// # Safety
    /// The caller must have exclusive access to `self` - no other thread may be observing it.
    #[inline]
    pub unsafe fn field_unsafe(&self) -> &T {
        debug_assert!(
            crate::op_frame::no_frame_open(),
            "field_unsafe called from inside an open op frame"
        );
        self.payload()
    }

    /// The mutable counterpart of [`Pblk::field_unsafe`] (`original_source`'s `set_unsafe_*`).
    ///
    /// # Safety
    /// Same requirement as [`Pblk::field_unsafe`].
    #[inline]
    pub unsafe fn field_unsafe_mut(&self) -> &mut T {
        debug_assert!(
            crate::op_frame::no_frame_open(),
            "field_unsafe_mut called from inside an open op frame"
        );
        self.payload_mut()
    }
}

impl<'a> OpFrame<'a> {
    fn header_addr_size(size: usize) -> usize {
        mem::size_of::<PblkHeader>() + size
    }

    /// Allocates a fresh `Pblk<T>` through the configured `ChunkAllocator` with `id` and `value`,
    /// without yet registering it (call `register_alloc` next).
    pub fn alloc<T: PblkPayload>(&self, id: u64, value: T) -> Result<NonNull<Pblk<T>>> {
        let total = Self::header_addr_size(mem::size_of::<T>());
        let ptr = self
            .epoch_sys
            .allocator()
            .pmalloc(total)
            .ok_or(EpochSysError::AllocFailure)?;
        let pblk_ptr = ptr.cast::<Pblk<T>>();
        unsafe {
            let header = PblkHeader {
                type_id: T::TYPE_ID,
                flags: AtomicU8::new(FLAG_VALID),
                id,
                birth_epoch: AtomicU64::new(0),
                retire_epoch: AtomicU64::new(0),
                payload_size: mem::size_of::<T>() as u32,
            };
            std::ptr::write(&mut (*pblk_ptr.as_ptr()).header, header);
            std::ptr::write(
                (*pblk_ptr.as_ptr()).payload.get(),
                ManuallyDrop::new(value),
            );
        }
        Ok(pblk_ptr)
    }

    /// `register_alloc` (§4.2): called once per fresh PBlk inside this frame. Stamps
    /// `birth_epoch` and queues it in `in_construction[e]`.
    pub fn register_alloc<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> Result<()> {
        let header = unsafe { &pblk.as_ref().header };
        header.birth_epoch.store(self.epoch().get(), Release);
        self.epoch_sys
            .pending()
            .push_in_construction(self.epoch().slot(), header.pending_ref());
        Ok(())
    }

    /// `open_read` (§4.2): returns the payload iff its `birth_epoch <= self.epoch()`. Otherwise
    /// raises `OldSeesNew` - the caller must abort and retry in a later epoch.
    pub fn open_read<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> Result<&'a T> {
        let header = unsafe { &pblk.as_ref().header };
        let birth = header.birth_epoch();
        if birth != 0 && birth > self.epoch().get() {
            pds_stats::old_sees_new_retries();
            return Err(EpochSysError::OldSeesNew);
        }
        Ok(unsafe { pblk.as_ref().payload() })
    }

    /// `open_read_unsafe` (§4.2): tolerates `birth_epoch > self.epoch()`. Intended for idempotent
    /// read-only recomputation where a torn/ahead-of-epoch read cannot corrupt durable state.
    pub fn open_read_unsafe<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> &'a T {
        unsafe { pblk.as_ref().payload() }
    }

    /// `open_write` (§4.2): in place iff `birth_epoch == self.epoch()`, otherwise copy-on-write.
    /// The predecessor is superseded (`retire_epoch` stamped, queued for reclamation) in this
    /// frame's epoch, not tombstoned - it's an older live version, not a logical delete, and must
    /// still recover as live data if the crash lands before this copy is durable.
    pub fn open_write<T: PblkPayload + Clone>(
        &self,
        pblk: NonNull<Pblk<T>>,
    ) -> Result<NonNull<Pblk<T>>> {
        let header = unsafe { &pblk.as_ref().header };
        if header.birth_epoch() == self.epoch().get() {
            return Ok(pblk);
        }
        let copy_value = unsafe { pblk.as_ref().payload() }.clone();
        let new_pblk = self.alloc(header.id, copy_value)?;
        unsafe {
            new_pblk.as_ref().header.flags.fetch_or(FLAG_COPY, Relaxed);
        }
        self.register_alloc(new_pblk)?;
        self.supersede(pblk)?;
        Ok(new_pblk)
    }

    /// `register_update` (§4.2): marks `pblk` as needing flush before this frame's epoch closes.
    pub fn register_update<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> Result<()> {
        let header = unsafe { &pblk.as_ref().header };
        if header.birth_epoch() != self.epoch().get() {
            return Err(EpochSysError::UsageBug(
                "register_update called on a PBlk not opened for write in this frame",
            ));
        }
        self.epoch_sys
            .pending()
            .push_to_persist(self.epoch().slot(), header.pending_ref());
        Ok(())
    }

    /// `retire` (§4.2): logical delete. Sets the tombstone bit, stamps `retire_epoch`, and queues
    /// `pblk` for reclamation once this epoch is durable and no reservation can still see it.
    pub fn retire<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> Result<()> {
        let header = unsafe { &pblk.as_ref().header };
        header.flags.fetch_or(FLAG_TOMBSTONE, Release);
        self.supersede(pblk)?;
        pds_stats::pblks_retired();
        Ok(())
    }

    /// Version supersession (§3): stamps `retire_epoch` and queues `pblk` for reclamation once
    /// this epoch is durable and no reservation can still see it, without tombstoning it. Used
    /// both by `retire` (which tombstones first) and by `open_write`'s copy-on-write path, where
    /// the predecessor is simply an older live version, not a logical delete - recovery must still
    /// accept it as live data if the crash lands before the new copy is durable.
    fn supersede<T: PblkPayload>(&self, pblk: NonNull<Pblk<T>>) -> Result<()> {
        let header = unsafe { &pblk.as_ref().header };
        header.retire_epoch.store(self.epoch().get(), Release);
        self.epoch_sys
            .pending()
            .push_to_retire(self.epoch().slot(), header.pending_ref());
        Ok(())
    }

    /// `reclaim` (§4.2): immediate free, for objects never exposed (e.g. `register_alloc`
    /// happened but publication failed). Requires no op frame - the object was never shared.
    pub fn reclaim<T: PblkPayload>(epoch_sys: &crate::epochsys::EpochSys, pblk: NonNull<Pblk<T>>) {
        let header = unsafe { &pblk.as_ref().header };
        let pending = header.pending_ref();
        unsafe { epoch_sys.allocator().pfree(pending.ptr, pending.size) };
    }
}
