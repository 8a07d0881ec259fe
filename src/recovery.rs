//! The recovery driver (C9): reconstructs the live PBlk set after a restart.
//!
//! Recovery walks every chunk the `ChunkAllocator` reports as live at restart and decides, from
//! its header alone, whether it belongs to the durable state as of `E_durable` (§4.9). Concrete
//! payload reconstruction (turning `type_id` back into a live `Pblk<T>` a data structure can use)
//! is left to the caller - this module only classifies headers and frees what doesn't survive.

use crate::{
    chunk::ChunkAllocator,
    error::{EpochSysError, Result},
    internal::epoch::Epoch,
    pblk::PblkHeader,
};
use std::{collections::HashMap, mem, ptr::NonNull};

/// One surviving PBlk, as classified by the recovery walk. The caller dispatches on `type_id` to
/// reconstitute the concrete `Pblk<T>` this chunk actually holds.
#[derive(Clone, Copy, Debug)]
pub struct RecoveredPblk {
    pub addr: NonNull<u8>,
    pub size: usize,
    pub type_id: u16,
    pub id: u64,
    pub birth_epoch: Epoch,
    pub is_tombstone: bool,
}

/// Walks every chunk `allocator` reports as live, keeping exactly the PBlks that were durably
/// constructed (`birth_epoch <= durable_epoch`) and not durably retired
/// (`retire_epoch == NULL || retire_epoch > durable_epoch`), deduplicated by `id` (a copy-on-write
/// chain may leave more than one surviving copy of the same logical object; the one with the
/// greatest `birth_epoch` wins, per §4.9).
pub fn recover(
    allocator: &dyn ChunkAllocator,
    n_threads: usize,
    durable_epoch: Epoch,
) -> Result<Vec<RecoveredPblk>> {
    let header_size = mem::size_of::<PblkHeader>();
    let shards = n_threads.max(1);
    let mut by_id: HashMap<u64, RecoveredPblk> = HashMap::new();

    for shard in 0..shards {
        for (addr, size) in allocator.live_chunks(shards, shard) {
            if size < header_size {
                return Err(EpochSysError::RecoveryCorruption);
            }
            let header = unsafe { &*(addr.as_ptr() as *const PblkHeader) };
            let birth = Epoch::new(header.birth_epoch());
            let retire = Epoch::new(header.retire_epoch());

            let construction_durable = !birth.is_null() && birth.get() <= durable_epoch.get();
            let retirement_durable = !retire.is_null() && retire.get() <= durable_epoch.get();

            if !construction_durable || retirement_durable {
                unsafe { allocator.pfree(addr, size) };
                pds_stats::recovery_blocks_discarded();
                continue;
            }

            let candidate = RecoveredPblk {
                addr,
                size,
                type_id: header.type_id(),
                id: header.id(),
                birth_epoch: birth,
                is_tombstone: header.is_tombstone(),
            };

            match by_id.get(&candidate.id) {
                Some(existing) if existing.birth_epoch == candidate.birth_epoch => {
                    return Err(EpochSysError::RecoveryCorruption);
                }
                Some(existing) if existing.birth_epoch > candidate.birth_epoch => {
                    unsafe { allocator.pfree(candidate.addr, candidate.size) };
                    pds_stats::recovery_blocks_discarded();
                }
                Some(existing) => {
                    let stale = *existing;
                    by_id.insert(candidate.id, candidate);
                    unsafe { allocator.pfree(stale.addr, stale.size) };
                    pds_stats::recovery_blocks_discarded();
                }
                None => {
                    by_id.insert(candidate.id, candidate);
                    pds_stats::recovery_blocks_accepted();
                }
            }
        }
    }

    Ok(by_id.into_values().collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{chunk::HeapChunkAllocator, config::PwbKind, pblk::PblkHeader};

    fn plant(
        allocator: &HeapChunkAllocator,
        id: u64,
        birth: u64,
        retire: u64,
        tombstone: bool,
    ) -> (NonNull<u8>, usize) {
        let size = mem::size_of::<PblkHeader>();
        let ptr = allocator.pmalloc(size).unwrap();
        let mut header = PblkHeader::zeroed_for_test();
        header.set_for_test(id, birth, retire, tombstone);
        unsafe { std::ptr::write(ptr.as_ptr() as *mut PblkHeader, header) };
        (ptr, size)
    }

    #[test]
    fn discards_blocks_born_after_durable_epoch() {
        let allocator = HeapChunkAllocator::new(PwbKind::Clwb);
        plant(&allocator, 1, 5, 0, false);
        let recovered = recover(&allocator, 1, Epoch::new(3)).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn keeps_the_newest_surviving_copy() {
        let allocator = HeapChunkAllocator::new(PwbKind::Clwb);
        plant(&allocator, 1, 1, 0, false);
        plant(&allocator, 1, 2, 0, false);
        let recovered = recover(&allocator, 1, Epoch::new(5)).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].birth_epoch, Epoch::new(2));
    }

    #[test]
    fn drops_durably_retired_blocks() {
        let allocator = HeapChunkAllocator::new(PwbKind::Clwb);
        plant(&allocator, 1, 1, 2, false);
        let recovered = recover(&allocator, 1, Epoch::new(5)).unwrap();
        assert!(recovered.is_empty());
    }

    #[test]
    fn equal_birth_duplicate_id_is_fatal() {
        let allocator = HeapChunkAllocator::new(PwbKind::Clwb);
        plant(&allocator, 1, 2, 0, false);
        plant(&allocator, 1, 2, 0, false);
        let err = recover(&allocator, 1, Epoch::new(5)).unwrap_err();
        assert!(matches!(err, EpochSysError::RecoveryCorruption));
    }
}
