use std::sync::atomic::{AtomicI64, Ordering};

use crate::{Lease, Ptr};

/// A bump-allocated half of a drawer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tray {
    pub start: Ptr,
    pub end: Ptr,
    pub current: Ptr,
}

impl Tray {
    pub fn new(drawer: u32, start: u32, end: u32) -> Self {
        Self {
            start: Ptr::new(drawer, start),
            end: Ptr::new(drawer, end),
            current: Ptr::new(drawer, start),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        (self.end.offset() - self.start.offset()) as usize
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        (self.end.offset() - self.current.offset()) as usize
    }

    #[inline]
    pub fn used(&self) -> usize {
        (self.current.offset() - self.start.offset()) as usize
    }

    /// Bump `size` bytes, `None` if they do not fit.
    pub fn bump(&mut self, size: usize) -> Option<Ptr> {
        if self.remaining() < size {
            return None;
        }
        let ptr = self.current;
        self.current = ptr.add(size as u32);
        Some(ptr)
    }
}

/// Where a drawer's bytes currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// In the given physical slot.
    Resident(u32),
    /// Evicted to the swap file at the given offset.
    Swapped(u64),
    /// Never backed by anything; logically zero-filled.
    Fresh,
}

/// A fixed-size virtual region: the unit of paging, swapping and leasing.
#[derive(Debug)]
pub struct Drawer {
    pub id: u32,
    pub trays: [Tray; 2],
    /// Tray that serves new allocations. The other one is kept for a copying
    /// collector and never allocated from.
    pub active_tray: usize,
    pub physical_slot: Option<u32>,
    pub is_swapped: bool,
    pub swap_offset: u64,
    /// LFU score, bumped on every resident resolve and halved by aging.
    pub access_count: AtomicI64,
    pub lease: Option<Lease>,
}

impl Drawer {
    pub fn new(id: u32, drawer_size: usize) -> Self {
        let half = (drawer_size / 2) as u32;
        // offset 0 of drawer 0 is the null pointer
        let first = if id == 0 { Ptr::SIZE as u32 } else { 0 };
        Self {
            id,
            trays: [Tray::new(id, first, half), Tray::new(id, half, half * 2)],
            active_tray: 0,
            physical_slot: None,
            is_swapped: false,
            swap_offset: 0,
            access_count: AtomicI64::new(0),
            lease: None,
        }
    }

    pub fn residency(&self) -> Residency {
        match self.physical_slot {
            Some(slot) => Residency::Resident(slot),
            None if self.is_swapped => Residency::Swapped(self.swap_offset),
            None => Residency::Fresh,
        }
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.physical_slot.is_some()
    }

    #[inline]
    pub fn is_leased(&self) -> bool {
        self.lease.as_ref().is_some_and(|l| l.is_active())
    }

    #[inline]
    pub fn active(&self) -> &Tray {
        &self.trays[self.active_tray]
    }

    #[inline]
    pub fn active_mut(&mut self) -> &mut Tray {
        &mut self.trays[self.active_tray]
    }

    #[inline]
    pub fn access_count(&self) -> i64 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_access_count(&self, count: i64) {
        self.access_count.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn touch(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Halve the LFU score, rounding toward negative infinity.
    pub fn age(&self) -> i64 {
        let halved = self.access_count().div_euclid(2);
        self.set_access_count(halved);
        halved
    }

    pub fn mark_resident(&mut self, slot: u32) {
        self.physical_slot = Some(slot);
        self.is_swapped = false;
    }

    pub fn mark_swapped(&mut self, offset: u64) {
        self.physical_slot = None;
        self.is_swapped = true;
        self.swap_offset = offset;
    }
}
