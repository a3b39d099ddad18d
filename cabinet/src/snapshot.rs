//! Whole-heap checkpoints.
//!
//! ```text
//! magic "CABSNAP\x01", version u32
//! settings: heap_size u64, drawer_size u64, max_virtual_drawers u64
//! drawer_count u64, then per drawer:
//!     id u32, active_tray u8, 2 x tray (start, end, current: Ptr)
//!     physical_slot i64 (-1 = none), is_swapped u8, swap_offset u64,
//!     access_count i64
//! slot_count u64, slot_count x i32 (ram slot table)
//! active_drawer u64, next_snapshot_id i64
//! drawer_count x drawer_size raw bytes, in table order
//! ```
//!
//! Restoring never makes anything resident: every drawer goes to a fresh
//! swap file and is paged in on first touch.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use crate::{
    CabinetShared, Drawer, Ptr, Result, Tray,
    cabinet::{CabinetState, EMPTY_SLOT},
};

const SNAPSHOT_MAGIC: &[u8; 8] = b"CABSNAP\x01";
const SNAPSHOT_VERSION: u32 = 1;

struct DrawerRecord {
    id: u32,
    active_tray: usize,
    trays: [Tray; 2],
    access_count: i64,
}

impl CabinetShared {
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_snapshot(&mut writer)?;
        writer.flush()?;
        log::info!("snapshot saved to {}", path.display());
        Ok(())
    }

    pub fn write_snapshot(&self, w: &mut dyn Write) -> Result<()> {
        // exclusive: swap reads move the file cursor
        let mut state = self.state.write();

        w.write_all(SNAPSHOT_MAGIC)?;
        write_u32(w, SNAPSHOT_VERSION)?;
        write_u64(w, self.settings.heap_size as u64)?;
        write_u64(w, self.settings.drawer_size as u64)?;
        write_u64(w, self.settings.max_virtual_drawers as u64)?;

        write_u64(w, state.drawers.len() as u64)?;
        for drawer in &state.drawers {
            write_drawer(w, drawer)?;
        }
        write_u64(w, state.ram_slots.len() as u64)?;
        for &slot in state.ram_slots.iter() {
            write_u32(w, slot as u32)?;
        }
        write_u64(w, state.active_drawer as u64)?;
        write_u64(w, state.next_snapshot_id as u64)?;

        let mut bytes = vec![0u8; self.settings.drawer_size];
        for id in 0..state.drawers.len() {
            self.drawer_bytes(&mut state, id, &mut bytes)?;
            w.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Current contents of a drawer wherever they live.
    fn drawer_bytes(&self, state: &mut CabinetState, id: usize, out: &mut [u8]) -> Result<()> {
        match state.drawers[id].residency() {
            crate::Residency::Resident(slot) => {
                self.arena.read(self.arena.frame_offset(slot as usize), out)
            }
            crate::Residency::Swapped(offset) => state.swap.restore(offset, out)?,
            crate::Residency::Fresh => out.fill(0),
        }
        Ok(())
    }

    pub fn restore_snapshot(&self, path: &Path) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        self.read_snapshot(&mut reader)?;
        log::info!("snapshot restored from {}", path.display());
        Ok(())
    }

    /// Replace the whole heap with a snapshot. Outstanding leases become
    /// invalid. If the old swap cannot be dropped or the drawer bytes cannot
    /// be read, the heap is left reset.
    pub fn read_snapshot(&self, r: &mut dyn Read) -> Result<()> {
        let mut state = self.state.write();

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(invalid_data("invalid snapshot magic").into());
        }
        if read_u32(r)? != SNAPSHOT_VERSION {
            return Err(invalid_data("unsupported snapshot version").into());
        }
        let _heap_size = read_u64(r)?;
        let drawer_size = read_u64(r)? as usize;
        let _max_drawers = read_u64(r)?;
        if drawer_size != self.settings.drawer_size {
            return Err(invalid_data("snapshot drawer size does not match").into());
        }

        let count = read_u64(r)? as usize;
        if count == 0 || count > self.settings.max_virtual_drawers {
            return Err(invalid_data("snapshot drawer count out of range").into());
        }
        let mut records = Vec::with_capacity(count);
        for expected in 0..count {
            let record = read_drawer(r, drawer_size)?;
            if record.id as usize != expected {
                return Err(invalid_data("snapshot drawer table out of order").into());
            }
            records.push(record);
        }
        let slots = read_u64(r)? as usize;
        for _ in 0..slots {
            // residency is not restored
            read_u32(r)?;
        }
        let active_drawer = read_u64(r)? as usize;
        let next_snapshot_id = read_u64(r)? as i64;
        if active_drawer >= count {
            return Err(invalid_data("snapshot active drawer out of range").into());
        }

        self.arena.reset();
        state.snapshots.clear();
        state.ram_slots.fill(EMPTY_SLOT);
        state.drawers.clear();

        let loaded = match state.swap.free_cache() {
            Ok(()) => self.load_drawers(&mut state, r, records),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = loaded {
            log::warn!("snapshot restore failed, resetting heap: {e}");
            state.drawers.clear();
            if let Err(swap) = state.swap.free_cache() {
                log::warn!("could not remove partial swap file: {swap}");
            }
            self.install_first_drawer(&mut state)?;
            return Err(e);
        }
        state.active_drawer = active_drawer;
        state.next_snapshot_id = state.next_snapshot_id.max(next_snapshot_id);
        Ok(())
    }

    fn load_drawers(
        &self,
        state: &mut CabinetState,
        r: &mut dyn Read,
        records: Vec<DrawerRecord>,
    ) -> Result<()> {
        let mut bytes = vec![0u8; self.settings.drawer_size];
        for record in records {
            r.read_exact(&mut bytes)?;
            let offset = state.swap.spill(&bytes)?;
            let mut drawer = Drawer::new(record.id, self.settings.drawer_size);
            drawer.trays = record.trays;
            drawer.active_tray = record.active_tray;
            drawer.set_access_count(record.access_count);
            drawer.mark_swapped(offset);
            state.drawers.push(drawer);
        }
        Ok(())
    }
}

fn write_drawer(w: &mut dyn Write, d: &Drawer) -> io::Result<()> {
    write_u32(w, d.id)?;
    write_u8(w, d.active_tray as u8)?;
    for tray in &d.trays {
        write_u64(w, tray.start.raw())?;
        write_u64(w, tray.end.raw())?;
        write_u64(w, tray.current.raw())?;
    }
    write_u64(w, d.physical_slot.map_or(-1, i64::from) as u64)?;
    write_u8(w, d.is_swapped as u8)?;
    write_u64(w, d.swap_offset)?;
    write_u64(w, d.access_count() as u64)?;
    Ok(())
}

fn read_drawer(r: &mut dyn Read, drawer_size: usize) -> io::Result<DrawerRecord> {
    let id = read_u32(r)?;
    let active_tray = read_u8(r)? as usize;
    if active_tray > 1 {
        return Err(invalid_data("invalid active tray in snapshot"));
    }
    let mut trays = [Tray::new(id, 0, 0); 2];
    for tray in &mut trays {
        let start = Ptr::from_raw(read_u64(r)?);
        let end = Ptr::from_raw(read_u64(r)?);
        let current = Ptr::from_raw(read_u64(r)?);
        let in_drawer = [start, end, current].iter().all(|p| p.drawer() == id);
        let ordered = start.offset() <= current.offset() && current.offset() <= end.offset();
        if !in_drawer || !ordered || end.offset() as usize > drawer_size {
            return Err(invalid_data("invalid tray bounds in snapshot"));
        }
        *tray = Tray {
            start,
            end,
            current,
        };
    }
    let _physical_slot = read_u64(r)?;
    let _is_swapped = read_u8(r)?;
    let _swap_offset = read_u64(r)?;
    let access_count = read_u64(r)? as i64;
    Ok(DrawerRecord {
        id,
        active_tray,
        trays,
        access_count,
    })
}

fn write_u8(w: &mut dyn Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn read_u8(r: &mut dyn Read) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn write_u32(w: &mut dyn Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut dyn Read) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn write_u64(w: &mut dyn Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u64(r: &mut dyn Read) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use crate::{
        MemoryError, Residency,
        cabinet::tests::{TRAY, small_cabinet},
    };
    use tempfile::TempDir;

    #[test]
    fn restore_rewinds_values_and_allocations() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let a = cab.alloc_integer(1).unwrap();
        let b = cab.alloc_string("b").unwrap();
        let path = dir.path().join("heap.snap");
        cab.save_snapshot(&path).unwrap();

        cab.write_integer(a, 2).unwrap();
        let c = cab.alloc_integer(3).unwrap();
        assert_eq!(c.drawer(), a.drawer());

        cab.restore_snapshot(&path).unwrap();
        assert_eq!(cab.read_integer(a).unwrap(), 1);
        assert_eq!(cab.read_string(b).unwrap(), "b");
        assert_eq!(cab.read_integer(c).unwrap(), 0);
        // the bump pointer went back too
        assert_eq!(cab.alloc_integer(4).unwrap(), c);
    }

    #[test]
    fn restored_drawers_start_swapped() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let mut ptrs = Vec::new();
        for i in 0..6 {
            let p = cab.alloc(TRAY).unwrap();
            cab.write(p, &[i as u8 + 1; 16]).unwrap();
            ptrs.push(p);
        }
        let mut image = Vec::new();
        cab.write_snapshot(&mut image).unwrap();
        let before = cab.drawers();

        cab.read_snapshot(&mut image.as_slice()).unwrap();
        let after = cab.drawers();
        assert_eq!(after.len(), before.len());
        for (b, a) in before.iter().zip(&after) {
            assert!(matches!(a.residency, Residency::Swapped(_)));
            assert_eq!(a.access_count, b.access_count);
            assert_eq!(a.used_bytes, b.used_bytes);
        }
        for (i, p) in ptrs.iter().enumerate() {
            assert_eq!(cab.read(*p, 16).unwrap(), vec![i as u8 + 1; 16]);
        }
    }

    #[test]
    fn restore_invalidates_leases() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let mut image = Vec::new();
        cab.write_snapshot(&mut image).unwrap();
        let mut lease = cab.acquire_lease(1).unwrap();
        cab.read_snapshot(&mut image.as_slice()).unwrap();
        assert!(matches!(
            cab.commit(&mut lease),
            Err(MemoryError::Lease(_))
        ));
        assert_eq!(cab.stats().leased, 0);
    }

    #[test]
    fn swap_cleanup_failure_leaves_a_usable_heap() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..6 {
            cab.alloc(TRAY).unwrap();
        }
        assert!(cab.stats().swapped > 0);
        let mut image = Vec::new();
        cab.write_snapshot(&mut image).unwrap();

        // a directory in place of the swap file cannot be removed as a file
        let swap = dir.path().join("cabinet.swap");
        std::fs::remove_file(&swap).unwrap();
        std::fs::create_dir(&swap).unwrap();

        assert!(matches!(
            cab.read_snapshot(&mut image.as_slice()),
            Err(MemoryError::Io(_))
        ));
        let stats = cab.stats();
        assert_eq!(stats.drawers, 1);
        assert_eq!(stats.resident, 1);
        assert_eq!(stats.swapped, 0);
        let p = cab.alloc_integer(5).unwrap();
        assert_eq!(cab.read_integer(p).unwrap(), 5);
    }

    #[test]
    fn foreign_and_truncated_images_are_rejected() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let p = cab.alloc_integer(9).unwrap();

        let err = cab.read_snapshot(&mut &b"NOTASNAPSHOT"[..]).unwrap_err();
        assert!(matches!(err, MemoryError::Io(_)));
        // a rejected header leaves the heap alone
        assert_eq!(cab.read_integer(p).unwrap(), 9);

        let mut image = Vec::new();
        cab.write_snapshot(&mut image).unwrap();
        image.truncate(image.len() - 100);
        assert!(cab.read_snapshot(&mut image.as_slice()).is_err());
        assert_eq!(cab.stats().drawers, 1);
        assert_eq!(cab.read_integer(p).unwrap(), 0);
    }
}
