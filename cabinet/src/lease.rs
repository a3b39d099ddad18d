//! Exclusive per-drawer scratch space with commit/rollback.
//!
//! Acquiring a lease copies the drawer's bytes aside. While the lease is
//! active the allocator skips the drawer and only the holder may mutate it
//! (through [`CabinetShared::write_leased`]). Rolling back puts the copy back;
//! committing just drops it.
//!
//! A lease carries no thread identity, so typed writers and atomics cannot
//! tell the holder from anyone else: they are refused with
//! [`LeaseError::Held`] for everybody. The holder edits typed objects by
//! writing their payload bytes at the layout offsets.

use crate::{
    CabinetShared, LeaseError, Ptr, Result,
    cabinet::{CabinetState, Intent},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    drawer_id: u32,
    unit_id: u64,
    snapshot_id: i64,
    is_active: bool,
}

impl Lease {
    pub fn drawer(&self) -> u32 {
        self.drawer_id
    }

    pub fn unit(&self) -> u64 {
        self.unit_id
    }

    pub fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl CabinetShared {
    /// Lease the first resident drawer without an active lease.
    pub fn acquire_lease(&self, unit_id: u64) -> Result<Lease> {
        let mut state = self.state.write();
        let Some((slot, id)) = state
            .resident()
            .find(|(_, drawer)| !drawer.is_leased())
            .map(|(slot, drawer)| (slot, drawer.id))
        else {
            return Err(LeaseError::Unavailable.into());
        };

        let snapshot_id = state.next_snapshot_id;
        state.next_snapshot_id += 1;
        let bytes = self.arena.read_frame(slot);
        state.snapshots.insert(snapshot_id, bytes);

        let lease = Lease {
            drawer_id: id,
            unit_id,
            snapshot_id,
            is_active: true,
        };
        state.drawers[id as usize].lease = Some(lease.clone());
        log::debug!("unit {unit_id} leased drawer {id} (snapshot {snapshot_id})");
        Ok(lease)
    }

    /// Check that `lease` is active and still the one attached to its drawer.
    pub(crate) fn validate_lease(state: &CabinetState, lease: &Lease) -> Result<usize> {
        if !lease.is_active {
            return Err(LeaseError::Inactive.into());
        }
        let idx = lease.drawer_id as usize;
        match state.drawers.get(idx).and_then(|d| d.lease.as_ref()) {
            Some(attached) if attached == lease => Ok(idx),
            _ => Err(LeaseError::Mismatch {
                drawer: lease.drawer_id,
            }
            .into()),
        }
    }

    fn release(state: &mut CabinetState, idx: usize, lease: &mut Lease) -> Option<Vec<u8>> {
        state.drawers[idx].lease = None;
        lease.is_active = false;
        state.snapshots.remove(&lease.snapshot_id)
    }

    /// Keep everything written under the lease.
    pub fn commit(&self, lease: &mut Lease) -> Result<()> {
        let mut state = self.state.write();
        let idx = Self::validate_lease(&state, lease)?;
        Self::release(&mut state, idx, lease);
        log::debug!("unit {} committed drawer {idx}", lease.unit_id);
        Ok(())
    }

    /// Restore the drawer to its bytes at acquisition time.
    ///
    /// The drawer is paged back in first if it was evicted meanwhile.
    pub fn rollback(&self, lease: &mut Lease) -> Result<()> {
        let mut state = self.state.write();
        let idx = Self::validate_lease(&state, lease)?;
        let slot = self.bring_to_ram(&mut state, idx)?;
        if let Some(bytes) = Self::release(&mut state, idx, lease) {
            self.arena.write_frame(slot as usize, &bytes);
        }
        log::debug!("unit {} rolled back drawer {idx}", lease.unit_id);
        Ok(())
    }

    /// Write into the leased drawer on behalf of the lease holder. This is
    /// the only mutation path into a leased drawer.
    pub fn write_leased(&self, lease: &Lease, ptr: Ptr, bytes: &[u8]) -> Result<()> {
        self.access(ptr, bytes.len(), Intent::LeasedWrite(lease), |arena, at| {
            arena.write(at, bytes)
        })
    }
}
