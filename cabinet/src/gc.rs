//! LFU aging, victim selection and the background daemon that runs them.

use std::{
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Sender, bounded, select, tick};

use crate::{Cabinet, CabinetShared, MemoryError, Result, cabinet::CabinetState};

/// What one GC pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcReport {
    pub aged: usize,
    pub free_slots: usize,
    pub evicted: Option<u32>,
}

impl CabinetShared {
    /// Resident drawer with the lowest access score. Ties go to the lowest
    /// physical slot.
    pub(crate) fn select_victim(state: &CabinetState) -> Option<usize> {
        let mut best: Option<(i64, usize)> = None;
        for (_, drawer) in state.resident() {
            let score = drawer.access_count();
            if best.is_none_or(|(low, _)| score < low) {
                best = Some((score, drawer.id as usize));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Age every drawer, then evict one victim if fewer than the reserved
    /// number of slots are free.
    pub fn gc_cycle(&self) -> Result<GcReport> {
        let mut state = self.state.write();
        for drawer in &state.drawers {
            drawer.age();
        }
        let mut report = GcReport {
            aged: state.drawers.len(),
            free_slots: state.free_slots(),
            evicted: None,
        };

        if report.free_slots < self.settings.reserved_free_slots {
            if let Some(victim) = Self::select_victim(&state) {
                self.evict_drawer(&mut state, victim)?;
                report.evicted = Some(victim as u32);
                report.free_slots += 1;
            }
        }
        log::debug!("gc cycle: {report:?}");
        Ok(report)
    }
}

/// Handle to the running GC thread. Dropping `stop` ends it.
#[derive(Debug)]
pub(crate) struct GcDaemon {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl GcDaemon {
    fn spawn(cabinet: Weak<CabinetShared>, interval: std::time::Duration) -> Result<Self> {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("cabinet-gc".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stopped) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(shared) = cabinet.upgrade() else { break };
                            if let Err(e) = shared.gc_cycle() {
                                log::warn!("gc cycle failed: {e}");
                            }
                        }
                    }
                }
                log::debug!("gc daemon exiting");
            })
            .map_err(MemoryError::Io)?;
        Ok(Self { stop, handle })
    }

    fn shutdown(self) {
        drop(self.stop);
        // the daemon may hold the last strong reference and end up here itself
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::error!("gc daemon panicked");
        }
    }
}

impl Cabinet {
    /// Start the periodic GC thread, replacing any running one.
    pub fn start_gc_daemon(&self) -> Result<()> {
        let daemon = GcDaemon::spawn(Arc::downgrade(self.shared()), self.settings.gc_interval)?;
        let previous = self.daemon.lock().replace(daemon);
        if let Some(previous) = previous {
            previous.shutdown();
        }
        log::info!("gc daemon started, interval {:?}", self.settings.gc_interval);
        Ok(())
    }

    /// Stop the GC thread and wait for it. Returns whether one was running.
    pub fn stop_gc_daemon(&self) -> bool {
        let daemon = self.daemon.lock().take();
        match daemon {
            Some(daemon) => {
                daemon.shutdown();
                log::info!("gc daemon stopped");
                true
            }
            None => false,
        }
    }

    pub fn gc_daemon_running(&self) -> bool {
        self.daemon.lock().is_some()
    }
}

impl Drop for CabinetShared {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.get_mut().take() {
            daemon.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CabinetSettings, Ptr,
        cabinet::tests::{DRAWER, TRAY, small_cabinet},
    };
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn victim_is_least_frequently_used() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..3 {
            cab.alloc(TRAY).unwrap();
        }
        {
            let state = cab.state.read();
            for (id, count) in [(0, 10), (1, 1), (2, 5), (3, 5)] {
                state.drawers[id].set_access_count(count);
            }
            assert_eq!(CabinetShared::select_victim(&state), Some(1));
        }

        cab.alloc(TRAY).unwrap();
        let out = cab.drawer_info(1).unwrap();
        assert!(matches!(out.residency, crate::Residency::Swapped(_)));
    }

    #[test]
    fn swap_in_under_pressure_evicts_the_least_used() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        let ptrs: Vec<Ptr> = (0..3).map(|_| cab.alloc(TRAY).unwrap()).collect();
        let cold = ptrs[2];
        assert_eq!(cold.drawer(), 3);
        cab.write(cold, &[7; 8]).unwrap();
        assert!(cab.evict(3).unwrap());
        // drawer 4 takes the freed slot, RAM is full again
        assert_eq!(cab.alloc(TRAY).unwrap().drawer(), 4);
        assert_eq!(cab.stats().free_slots, 0);

        {
            let state = cab.state.read();
            for (id, count) in [(0, 10), (1, 1), (2, 5), (4, 5)] {
                state.drawers[id].set_access_count(count);
            }
        }
        assert_eq!(cab.read(cold, 8).unwrap(), vec![7; 8]);

        assert!(matches!(
            cab.drawer_info(1).unwrap().residency,
            crate::Residency::Swapped(_)
        ));
        for id in [0, 2, 3, 4] {
            assert!(matches!(
                cab.drawer_info(id).unwrap().residency,
                crate::Residency::Resident(_)
            ));
        }
    }

    #[test]
    fn ties_go_to_the_lowest_slot() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..3 {
            cab.alloc(TRAY).unwrap();
        }
        let state = cab.state.read();
        for (id, count) in [(0, 9), (1, 4), (2, 4), (3, 4)] {
            state.drawers[id].set_access_count(count);
        }
        assert_eq!(CabinetShared::select_victim(&state), Some(1));
    }

    #[test]
    fn aging_halves_every_score() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        cab.state.read().drawers[0].set_access_count(100);
        for expected in [50, 25, 12] {
            cab.gc_cycle().unwrap();
            assert_eq!(cab.drawer_info(0).unwrap().access_count, expected);
        }
    }

    #[test]
    fn pressure_evicts_one_drawer_per_cycle() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        for _ in 0..3 {
            cab.alloc(TRAY).unwrap();
        }
        let report = cab.gc_cycle().unwrap();
        assert_eq!(report.aged, 4);
        assert!(report.evicted.is_some());
        assert_eq!(report.free_slots, 1);

        let report = cab.gc_cycle().unwrap();
        assert!(report.evicted.is_some());
        assert_eq!(report.free_slots, 2);

        // reserve met
        assert_eq!(cab.gc_cycle().unwrap().evicted, None);
        assert_eq!(cab.stats().free_slots, 2);
    }

    #[test]
    fn daemon_relieves_pressure_in_the_background() {
        let dir = TempDir::new().unwrap();
        let cab = Cabinet::new(CabinetSettings {
            heap_size: 4 * DRAWER,
            drawer_size: DRAWER,
            max_virtual_drawers: 16,
            reserved_free_slots: 2,
            gc_interval: Duration::from_millis(5),
            swap_path: Some(dir.path().join("gc.swap")),
        })
        .unwrap();
        for _ in 0..3 {
            cab.alloc(TRAY).unwrap();
        }
        assert_eq!(cab.stats().free_slots, 0);

        cab.start_gc_daemon().unwrap();
        assert!(cab.gc_daemon_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while cab.stats().free_slots < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(cab.stop_gc_daemon());
        assert!(!cab.stop_gc_daemon());
        assert_eq!(cab.stats().free_slots, 2);
    }

    #[test]
    fn dropping_the_cabinet_stops_the_daemon() {
        let dir = TempDir::new().unwrap();
        let cab = small_cabinet(&dir);
        cab.start_gc_daemon().unwrap();
        cab.start_gc_daemon().unwrap();
        let p = cab.alloc_integer(3).unwrap();
        assert_eq!(cab.read_integer(p).unwrap(), 3);
        assert_ne!(p, Ptr::NULL);
        drop(cab);
    }
}
