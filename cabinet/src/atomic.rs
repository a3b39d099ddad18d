//! Word-sized atomics on heap cells.
//!
//! A cell is resolved and operated on while the lock that pinned its drawer
//! is still held, so an eviction can never move the bytes between the two.
//! Cells hold little-endian words like every other heap field.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CabinetShared, MemoryError, Ptr, Result, cabinet::Intent};

impl CabinetShared {
    fn with_cell<R>(
        &self,
        addr: Ptr,
        intent: Intent<'_>,
        op: impl FnOnce(&AtomicU64) -> R,
    ) -> Result<R> {
        if !(addr.offset() as usize).is_multiple_of(Ptr::SIZE) {
            return Err(MemoryError::segfault(addr, "unaligned atomic cell"));
        }
        self.access(addr, Ptr::SIZE, intent, |arena, at| op(arena.atomic_cell(at)))
    }

    pub fn load_u64(&self, addr: Ptr) -> Result<u64> {
        self.with_cell(addr, Intent::Read, |cell| {
            u64::from_le(cell.load(Ordering::SeqCst))
        })
    }

    pub fn store_u64(&self, addr: Ptr, value: u64) -> Result<()> {
        self.with_cell(addr, Intent::Write, |cell| {
            cell.store(value.to_le(), Ordering::SeqCst)
        })
    }

    /// Replace the word at `addr` with `new` if it still equals `expected`.
    pub fn compare_and_swap_u64(&self, addr: Ptr, expected: u64, new: u64) -> Result<bool> {
        self.with_cell(addr, Intent::Write, |cell| {
            cell.compare_exchange(
                expected.to_le(),
                new.to_le(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        })
    }

    pub fn load(&self, addr: Ptr) -> Result<Ptr> {
        self.load_u64(addr).map(Ptr::from_raw)
    }

    pub fn store(&self, addr: Ptr, value: Ptr) -> Result<()> {
        self.store_u64(addr, value.raw())
    }

    pub fn compare_and_swap(&self, addr: Ptr, expected: Ptr, new: Ptr) -> Result<bool> {
        self.compare_and_swap_u64(addr, expected.raw(), new.raw())
    }
}
