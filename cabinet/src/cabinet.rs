//! The paged heap: drawer table, physical slot map, allocator and MMU.
//!
//! Lock discipline: one `RwLock<CabinetState>` guards everything. Accesses to
//! already-resident bytes run under the shared lock; anything that can change
//! residency (page-in, eviction, allocation, leases, GC, snapshots) runs under
//! the exclusive lock. No guard outlives the public call that took it.

use std::{collections::HashMap, fmt, ops::Deref, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::{
    Arena, CabinetSettings, Drawer, Lease, LeaseError, MemoryError, Ptr, Residency, Result,
    RootProvider, SwapFile, gc::GcDaemon, ptr::align8,
};

/// Marks a physical slot with no resident drawer.
pub const EMPTY_SLOT: i32 = -1;

/// Mutable heap metadata. Only reachable through the cabinet lock.
#[derive(Debug)]
pub struct CabinetState {
    pub drawers: Vec<Drawer>,
    /// physical slot -> resident drawer id, `EMPTY_SLOT` if free
    pub ram_slots: Box<[i32]>,
    pub active_drawer: usize,
    /// Byte copies of leased drawers, keyed by lease snapshot id.
    pub snapshots: HashMap<i64, Vec<u8>>,
    pub next_snapshot_id: i64,
    pub swap: SwapFile,
}

impl CabinetState {
    pub fn free_slot(&self) -> Option<usize> {
        self.ram_slots.iter().position(|&id| id == EMPTY_SLOT)
    }

    pub fn free_slots(&self) -> usize {
        self.ram_slots.iter().filter(|&&id| id == EMPTY_SLOT).count()
    }

    /// Resident drawers in physical slot order.
    pub fn resident(&self) -> impl Iterator<Item = (usize, &Drawer)> {
        self.ram_slots
            .iter()
            .enumerate()
            .filter(|&(_, &id)| id != EMPTY_SLOT)
            .map(|(slot, &id)| (slot, &self.drawers[id as usize]))
    }
}

/// Why an access wants the bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Intent<'a> {
    Read,
    /// Mutation by anyone except a lease holder.
    Write,
    /// Mutation on behalf of the holder of this lease.
    LeasedWrite(&'a Lease),
}

/// Per-drawer metadata copied out of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawerInfo {
    pub id: u32,
    pub residency: Residency,
    pub access_count: i64,
    pub leased: bool,
    pub used_bytes: usize,
    pub free_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CabinetStats {
    pub drawers: usize,
    pub resident: usize,
    pub swapped: usize,
    pub fresh: usize,
    pub leased: usize,
    pub physical_slots: usize,
    pub free_slots: usize,
    pub allocated_bytes: usize,
    pub swap_bytes: u64,
}

/// Shared heap state behind [`Cabinet`].
pub struct CabinetShared {
    pub settings: CabinetSettings,
    pub(crate) arena: Arena,
    pub(crate) state: RwLock<CabinetState>,
    pub(crate) daemon: Mutex<Option<GcDaemon>>,
    pub(crate) roots: Mutex<Option<Box<dyn RootProvider>>>,
}

impl fmt::Debug for CabinetShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CabinetShared")
            .field("settings", &self.settings)
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

impl CabinetShared {
    fn new(settings: CabinetSettings) -> Result<Self> {
        settings.validate().map_err(MemoryError::InvalidSettings)?;

        let arena = Arena::new(settings.heap_size, settings.drawer_size)?;
        let swap_path = settings
            .swap_path
            .clone()
            .unwrap_or_else(SwapFile::temp_path);

        let state = CabinetState {
            drawers: Vec::new(),
            ram_slots: vec![EMPTY_SLOT; settings.physical_slots()].into_boxed_slice(),
            active_drawer: 0,
            snapshots: HashMap::new(),
            next_snapshot_id: 0,
            swap: SwapFile::new(swap_path),
        };

        let shared = Self {
            settings,
            arena,
            state: RwLock::new(state),
            daemon: Mutex::new(None),
            roots: Mutex::new(None),
        };
        {
            let mut state = shared.state.write();
            shared.install_first_drawer(&mut state)?;
        }
        log::info!(
            "cabinet ready: {} slots of {} bytes, up to {} drawers",
            shared.settings.physical_slots(),
            shared.settings.drawer_size,
            shared.settings.max_virtual_drawers
        );
        Ok(shared)
    }

    pub(crate) fn install_first_drawer(&self, state: &mut CabinetState) -> Result<()> {
        state.drawers.push(Drawer::new(0, self.settings.drawer_size));
        state.active_drawer = 0;
        self.bring_to_ram(state, 0)?;
        Ok(())
    }

    // ── Allocation ────────────────────────────────────────────────────

    /// Reserve `size` bytes (rounded up to 8) and return their address.
    ///
    /// When the active drawer's tray is full the allocator moves to another
    /// drawer with room, or creates one and pages it in, evicting a victim if
    /// every physical slot is taken.
    pub fn alloc(&self, size: usize) -> Result<Ptr> {
        let size = self.check_alloc_size(size)?;
        let mut state = self.state.write();
        self.bump(&mut state, size)
    }

    /// Allocate room for `bytes` and copy them in without releasing the
    /// exclusive lock, so no lease can land on the drawer in between.
    pub(crate) fn alloc_init(&self, bytes: &[u8]) -> Result<Ptr> {
        let size = self.check_alloc_size(bytes.len())?;
        let mut state = self.state.write();
        let ptr = self.bump(&mut state, size)?;
        let at = self.resolve_paging(&mut state, ptr, bytes.len())?;
        self.arena.write(at, bytes);
        Ok(ptr)
    }

    fn check_alloc_size(&self, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(MemoryError::InvalidSize { size });
        }
        let size = align8(size);
        if size > self.settings.tray_size() {
            return Err(MemoryError::oom(size, "request exceeds tray capacity"));
        }
        Ok(size)
    }

    fn bump(&self, state: &mut CabinetState, size: usize) -> Result<Ptr> {
        loop {
            let active = state.active_drawer;
            let drawer = &mut state.drawers[active];
            if !drawer.is_leased() {
                if let Some(ptr) = drawer.active_mut().bump(size) {
                    log::trace!("alloc {size} bytes at {ptr:?}");
                    return Ok(ptr);
                }
            }
            let next = self.next_allocation_drawer(state, size)?;
            state.active_drawer = next;
        }
    }

    fn next_allocation_drawer(&self, state: &mut CabinetState, size: usize) -> Result<usize> {
        if let Some(idx) = state
            .drawers
            .iter()
            .position(|d| !d.is_leased() && d.active().remaining() >= size)
        {
            return Ok(idx);
        }
        let id = self.create_drawer(state)?;
        self.bring_to_ram(state, id)?;
        log::debug!("allocation moved to new drawer {id}");
        Ok(id)
    }

    fn create_drawer(&self, state: &mut CabinetState) -> Result<usize> {
        let id = state.drawers.len();
        if id >= self.settings.max_virtual_drawers {
            return Err(MemoryError::oom(
                self.settings.drawer_size,
                "virtual drawer table exhausted",
            ));
        }
        state
            .drawers
            .push(Drawer::new(id as u32, self.settings.drawer_size));
        Ok(id)
    }

    /// Create an empty drawer without paging it in.
    pub fn add_drawer(&self) -> Result<u32> {
        let mut state = self.state.write();
        let id = self.create_drawer(&mut state)?;
        log::debug!("added drawer {id}");
        Ok(id as u32)
    }

    // ── Address resolution ────────────────────────────────────────────

    fn check_range(&self, state: &CabinetState, ptr: Ptr, len: usize) -> Result<()> {
        if ptr.is_null() {
            return Err(MemoryError::segfault(ptr, "null pointer"));
        }
        if ptr.drawer() as usize >= state.drawers.len() {
            return Err(MemoryError::segfault(ptr, "drawer out of range"));
        }
        let offset = ptr.offset() as usize;
        if offset >= self.settings.drawer_size || offset + len > self.settings.drawer_size {
            return Err(MemoryError::segfault(ptr, "access crosses drawer end"));
        }
        Ok(())
    }

    /// Arena offset of `ptr` if its drawer is resident, `None` on a page
    /// fault. Never changes residency, so it is valid under the shared lock.
    pub(crate) fn resolve_resident(
        &self,
        state: &CabinetState,
        ptr: Ptr,
        len: usize,
    ) -> Result<Option<usize>> {
        self.check_range(state, ptr, len)?;
        let drawer = &state.drawers[ptr.drawer() as usize];
        Ok(drawer.physical_slot.map(|slot| {
            drawer.touch();
            self.arena.frame_offset(slot as usize) + ptr.offset() as usize
        }))
    }

    /// Arena offset of `ptr`, paging its drawer in on a miss.
    pub(crate) fn resolve_paging(
        &self,
        state: &mut CabinetState,
        ptr: Ptr,
        len: usize,
    ) -> Result<usize> {
        if let Some(offset) = self.resolve_resident(state, ptr, len)? {
            return Ok(offset);
        }
        self.bring_to_ram(state, ptr.drawer() as usize)?;
        self.resolve_resident(state, ptr, len)?
            .ok_or(MemoryError::segfault(ptr, "drawer not resident after page-in"))
    }

    /// Physical arena offset of `ptr`.
    ///
    /// Only valid until the next operation that may evict the drawer.
    pub fn resolve(&self, ptr: Ptr) -> Result<usize> {
        let mut state = self.state.write();
        self.resolve_paging(&mut state, ptr, 0)
    }

    fn check_intent(&self, state: &CabinetState, ptr: Ptr, intent: Intent<'_>) -> Result<()> {
        let drawer = &state.drawers[ptr.drawer() as usize];
        match intent {
            Intent::Read => Ok(()),
            Intent::Write => match drawer.lease {
                Some(ref held) if held.is_active() => Err(LeaseError::Held {
                    drawer: drawer.id,
                }
                .into()),
                _ => Ok(()),
            },
            Intent::LeasedWrite(lease) => {
                Self::validate_lease(state, lease)?;
                if lease.drawer() != drawer.id {
                    return Err(LeaseError::Mismatch { drawer: drawer.id }.into());
                }
                Ok(())
            }
        }
    }

    /// Run `op` on the arena offset of `[ptr, ptr + len)`.
    ///
    /// First tries under the shared lock without paging. On a page fault it
    /// retries under the exclusive lock, where the drawer may be paged in.
    /// `op` runs exactly once, with the lock that pinned the drawer held.
    pub(crate) fn access<R>(
        &self,
        ptr: Ptr,
        len: usize,
        intent: Intent<'_>,
        op: impl FnOnce(&Arena, usize) -> R,
    ) -> Result<R> {
        {
            let state = self.state.read();
            self.check_range(&state, ptr, len)?;
            self.check_intent(&state, ptr, intent)?;
            if let Some(offset) = self.resolve_resident(&state, ptr, len)? {
                return Ok(op(&self.arena, offset));
            }
        }
        let mut state = self.state.write();
        self.check_range(&state, ptr, len)?;
        self.check_intent(&state, ptr, intent)?;
        let offset = self.resolve_paging(&mut state, ptr, len)?;
        Ok(op(&self.arena, offset))
    }

    /// Copy `bytes` to `ptr`.
    pub fn write(&self, ptr: Ptr, bytes: &[u8]) -> Result<()> {
        self.access(ptr, bytes.len(), Intent::Write, |arena, at| {
            arena.write(at, bytes)
        })
    }

    /// Copy `dst.len()` bytes starting at `ptr` into `dst`.
    pub fn read_into(&self, ptr: Ptr, dst: &mut [u8]) -> Result<()> {
        self.access(ptr, dst.len(), Intent::Read, |arena, at| {
            arena.read(at, dst)
        })
    }

    pub fn read(&self, ptr: Ptr, len: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0; len];
        self.read_into(ptr, &mut bytes)?;
        Ok(bytes)
    }

    // ── Paging ────────────────────────────────────────────────────────

    /// Make drawer `id` resident and return its slot.
    pub(crate) fn bring_to_ram(&self, state: &mut CabinetState, id: usize) -> Result<u32> {
        if let Some(slot) = state.drawers[id].physical_slot {
            return Ok(slot);
        }

        let slot = match state.free_slot() {
            Some(slot) => slot,
            None => {
                let victim = Self::select_victim(state).ok_or(MemoryError::oom(
                    self.settings.drawer_size,
                    "no resident drawer to evict",
                ))?;
                self.evict_drawer(state, victim)?
            }
        };

        match state.drawers[id].residency() {
            Residency::Swapped(offset) => {
                let mut bytes = vec![0; self.settings.drawer_size];
                state.swap.restore(offset, &mut bytes)?;
                self.arena.write_frame(slot, &bytes);
                log::trace!("paged drawer {id} in from swap offset {offset} to slot {slot}");
            }
            Residency::Fresh => {
                self.arena.zero_frame(slot);
                log::trace!("paged fresh drawer {id} into slot {slot}");
            }
            Residency::Resident(_) => unreachable!("checked above"),
        }

        state.ram_slots[slot] = id as i32;
        state.drawers[id].mark_resident(slot as u32);
        Ok(slot as u32)
    }

    /// Write a resident drawer to swap and free its slot.
    pub(crate) fn evict_drawer(&self, state: &mut CabinetState, id: usize) -> Result<usize> {
        let Some(slot) = state.drawers[id].physical_slot else {
            return Err(MemoryError::segfault(
                Ptr::new(id as u32, 0),
                "evicting a drawer that is not resident",
            ));
        };
        let slot = slot as usize;
        let bytes = self.arena.read_frame(slot);
        let offset = state.swap.spill(&bytes)?;

        state.ram_slots[slot] = EMPTY_SLOT;
        state.drawers[id].mark_swapped(offset);
        log::debug!(
            "evicted drawer {id} from slot {slot} to swap offset {offset} (score {})",
            state.drawers[id].access_count()
        );
        Ok(slot)
    }

    /// Force drawer `id` out to swap. Returns `false` if it was not resident.
    pub fn evict(&self, id: u32) -> Result<bool> {
        let mut state = self.state.write();
        let Some(drawer) = state.drawers.get(id as usize) else {
            return Err(MemoryError::segfault(Ptr::new(id, 0), "drawer out of range"));
        };
        if !drawer.is_resident() {
            return Ok(false);
        }
        self.evict_drawer(&mut state, id as usize)?;
        Ok(true)
    }

    // ── Whole-heap operations ─────────────────────────────────────────

    /// Zero the arena, drop the swap file and start over with one drawer.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.write();
        self.arena.reset();
        // swapped drawers are lost even if the file cannot be removed
        let cleared = state.swap.free_cache();
        state.drawers.clear();
        state.ram_slots.fill(EMPTY_SLOT);
        state.snapshots.clear();
        self.install_first_drawer(&mut state)?;
        cleared?;
        log::info!("cabinet reset");
        Ok(())
    }

    pub fn stats(&self) -> CabinetStats {
        let state = self.state.read();
        let mut stats = CabinetStats {
            drawers: state.drawers.len(),
            physical_slots: state.ram_slots.len(),
            free_slots: state.free_slots(),
            swap_bytes: state.swap.len(),
            ..Default::default()
        };
        for drawer in &state.drawers {
            match drawer.residency() {
                Residency::Resident(_) => stats.resident += 1,
                Residency::Swapped(_) => stats.swapped += 1,
                Residency::Fresh => stats.fresh += 1,
            }
            if drawer.is_leased() {
                stats.leased += 1;
            }
            stats.allocated_bytes += drawer.active().used();
        }
        stats
    }

    pub fn drawer_info(&self, id: u32) -> Option<DrawerInfo> {
        let state = self.state.read();
        state.drawers.get(id as usize).map(Self::info_of)
    }

    pub fn drawers(&self) -> Vec<DrawerInfo> {
        let state = self.state.read();
        state.drawers.iter().map(Self::info_of).collect()
    }

    fn info_of(drawer: &Drawer) -> DrawerInfo {
        DrawerInfo {
            id: drawer.id,
            residency: drawer.residency(),
            access_count: drawer.access_count(),
            leased: drawer.is_leased(),
            used_bytes: drawer.active().used(),
            free_bytes: drawer.active().remaining(),
        }
    }
}

// ── Cabinet (Arc wrapper) ─────────────────────────────────────────────

/// Handle to a paged heap. Cheap to clone and share between threads.
#[derive(Debug, Clone)]
pub struct Cabinet(Arc<CabinetShared>);

impl Cabinet {
    pub fn new(settings: CabinetSettings) -> Result<Self> {
        Ok(Self(Arc::new(CabinetShared::new(settings)?)))
    }

    pub(crate) fn shared(&self) -> &Arc<CabinetShared> {
        &self.0
    }
}

impl Deref for Cabinet {
    type Target = CabinetShared;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) const DRAWER: usize = 4096;
    pub(crate) const TRAY: usize = DRAWER / 2;

    /// Four physical slots of 4 KiB drawers, swapping into `dir`.
    pub(crate) fn small_cabinet(dir: &TempDir) -> Cabinet {
        Cabinet::new(CabinetSettings {
            heap_size: 4 * DRAWER,
            drawer_size: DRAWER,
            max_virtual_drawers: 16,
            reserved_free_slots: 2,
            swap_path: Some(dir.path().join("cabinet.swap")),
            ..Default::default()
        })
        .unwrap()
    }

    fn swapped(cab: &Cabinet) -> Vec<u32> {
        cab.drawers()
            .into_iter()
            .filter(|d| matches!(d.residency, Residency::Swapped(_)))
            .map(|d| d.id)
            .collect()
    }

    #[test]
    fn drawer_zero_is_resident_and_skips_null() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc(1).unwrap();
        assert_eq!(p, Ptr::new(0, 8));
        let q = cab.alloc(9).unwrap();
        assert_eq!(q, Ptr::new(0, 16));
        let r = cab.alloc(8).unwrap();
        assert_eq!(r, Ptr::new(0, 32));
        assert_eq!(
            cab.drawer_info(0).unwrap().residency,
            Residency::Resident(0)
        );
    }

    #[test]
    fn zero_and_oversized_requests_fail() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        assert!(matches!(
            cab.alloc(0),
            Err(MemoryError::InvalidSize { size: 0 })
        ));
        assert!(matches!(
            cab.alloc(TRAY + 1),
            Err(MemoryError::OutOfMemory { .. })
        ));
        // exactly a tray still fits, in a new drawer
        let p = cab.alloc(TRAY).unwrap();
        assert_eq!(p, Ptr::new(1, 0));
    }

    #[test]
    fn overflow_moves_to_a_new_drawer() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let a = cab.alloc(TRAY - 8).unwrap();
        assert_eq!(a.drawer(), 0);
        let b = cab.alloc(64).unwrap();
        assert_eq!(b, Ptr::new(1, 0));
        assert_eq!(
            cab.drawer_info(1).unwrap().residency,
            Residency::Resident(1)
        );
    }

    #[test]
    fn drawer_table_exhaustion_is_oom() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        // drawer 0 only has TRAY - 8 bytes, so each of these creates a drawer
        for _ in 0..15 {
            cab.alloc(TRAY).unwrap();
        }
        let err = cab.alloc(TRAY).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }));
        assert_eq!(cab.stats().drawers, 16);
    }

    #[test]
    fn filling_every_slot_then_allocating_swaps_exactly_one() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..3 {
            cab.alloc(TRAY).unwrap();
        }
        assert_eq!(cab.stats().free_slots, 0);
        assert!(swapped(&cab).is_empty());

        cab.alloc(TRAY).unwrap();

        let out = swapped(&cab);
        assert_eq!(out.len(), 1);
        match cab.drawer_info(out[0]).unwrap().residency {
            Residency::Swapped(offset) => assert_ne!(offset, 0),
            other => panic!("unexpected residency {other:?}"),
        }
        assert_eq!(cab.stats().resident, 4);
    }

    #[test]
    fn swapped_bytes_come_back_on_access() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc(TRAY).unwrap();
        let payload: Vec<u8> = (0..TRAY).map(|i| (i % 251) as u8).collect();
        cab.write(p, &payload).unwrap();

        assert!(cab.evict(p.drawer()).unwrap());
        assert!(!cab.evict(p.drawer()).unwrap());

        assert_eq!(cab.read(p, TRAY).unwrap(), payload);
        assert!(matches!(
            cab.drawer_info(p.drawer()).unwrap().residency,
            Residency::Resident(_)
        ));
    }

    #[test]
    fn page_in_under_pressure_cascades() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let mut ptrs = Vec::new();
        for i in 0..6u8 {
            let p = cab.alloc(TRAY).unwrap();
            cab.write(p, &[i + 1; 64]).unwrap();
            ptrs.push(p);
        }
        assert!(cab.stats().swapped >= 2);

        for (i, p) in ptrs.iter().enumerate() {
            assert_eq!(cab.read(*p, 64).unwrap(), vec![i as u8 + 1; 64]);
        }
        let stats = cab.stats();
        assert_eq!(stats.resident, 4);
        assert_eq!(stats.resident + stats.swapped + stats.fresh, stats.drawers);
    }

    #[test]
    fn resolve_rejects_null_and_out_of_range() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        assert!(matches!(
            cab.resolve(Ptr::NULL),
            Err(MemoryError::SegmentationFault { .. })
        ));
        assert!(matches!(
            cab.resolve(Ptr::new(9, 0)),
            Err(MemoryError::SegmentationFault { .. })
        ));
        assert!(matches!(
            cab.write(Ptr::new(0, (DRAWER - 4) as u32), &[0; 8]),
            Err(MemoryError::SegmentationFault { .. })
        ));
    }

    #[test]
    fn offset_at_drawer_end_is_out_of_range() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let end = Ptr::new(0, DRAWER as u32);
        assert!(matches!(
            cab.resolve(end),
            Err(MemoryError::SegmentationFault { .. })
        ));
        assert!(matches!(
            cab.read(end, 0),
            Err(MemoryError::SegmentationFault { .. })
        ));
        assert!(cab.resolve(Ptr::new(0, (DRAWER - 8) as u32)).is_ok());
    }

    #[test]
    fn typed_alloc_never_races_a_lease_onto_its_drawer() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let dir = TempDir::new().unwrap();
        let cab = Cabinet::new(CabinetSettings {
            heap_size: 4 * DRAWER,
            drawer_size: DRAWER,
            max_virtual_drawers: 64,
            swap_path: Some(dir.path().join("race.swap")),
            ..Default::default()
        })
        .unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let leaser = {
            let (cab, done) = (cab.clone(), done.clone());
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    if let Ok(mut lease) = cab.acquire_lease(1) {
                        cab.commit(&mut lease).unwrap();
                    }
                }
            })
        };

        let mut ptrs = Vec::new();
        for i in 0..1000 {
            ptrs.push(cab.alloc_integer(i).unwrap());
        }
        done.store(true, Ordering::Relaxed);
        leaser.join().unwrap();

        for (i, p) in ptrs.into_iter().enumerate() {
            assert_eq!(cab.read_integer(p).unwrap(), i as i64);
        }
    }

    #[test]
    fn resolve_maps_into_the_drawers_frame() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc(TRAY).unwrap();
        let slot = match cab.drawer_info(p.drawer()).unwrap().residency {
            Residency::Resident(slot) => slot as usize,
            other => panic!("unexpected residency {other:?}"),
        };
        assert_eq!(cab.resolve(p.add(40)).unwrap(), slot * DRAWER + 40);
    }

    #[test]
    fn explicit_drawers_start_fresh_and_read_as_zero() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let id = cab.add_drawer().unwrap();
        assert_eq!(cab.drawer_info(id).unwrap().residency, Residency::Fresh);
        assert_eq!(cab.read(Ptr::new(id, 0), 32).unwrap(), vec![0; 32]);
        assert!(cab.drawer_info(id).unwrap().residency != Residency::Fresh);
    }

    #[test]
    fn resident_access_bumps_the_score() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc(8).unwrap();
        let before = cab.drawer_info(0).unwrap().access_count;
        for _ in 0..5 {
            cab.read(p, 8).unwrap();
        }
        assert_eq!(cab.drawer_info(0).unwrap().access_count, before + 5);
    }

    #[test]
    fn reset_returns_to_a_single_zeroed_drawer() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc(16).unwrap();
        cab.write(p, &[9; 16]).unwrap();
        for _ in 0..5 {
            cab.alloc(TRAY).unwrap();
        }
        assert!(dir.path().join("cabinet.swap").exists());

        cab.reset().unwrap();
        assert!(!dir.path().join("cabinet.swap").exists());
        let stats = cab.stats();
        assert_eq!(stats.drawers, 1);
        assert_eq!(stats.resident, 1);
        assert_eq!(cab.read(p, 16).unwrap(), vec![0; 16]);
        assert_eq!(cab.alloc(8).unwrap(), Ptr::new(0, 8));
    }

    #[test]
    fn ram_slots_and_residency_agree() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..9 {
            let p = cab.alloc(TRAY).unwrap();
            cab.write(p, &[1; 8]).unwrap();
        }
        let state = cab.state.read();
        for (slot, &id) in state.ram_slots.iter().enumerate() {
            if id != EMPTY_SLOT {
                assert_eq!(
                    state.drawers[id as usize].physical_slot,
                    Some(slot as u32)
                );
            }
        }
        for d in &state.drawers {
            if let Some(slot) = d.physical_slot {
                assert_eq!(state.ram_slots[slot as usize], d.id as i32);
            }
        }
    }
}
