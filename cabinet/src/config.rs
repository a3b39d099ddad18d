//! Cabinet configuration.
//!
//! Settings are plain data with reference defaults. They can be overlaid from
//! the environment:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `CABINET_HEAP_SIZE` | `heap_size` | 10 MiB |
//! | `CABINET_DRAWER_SIZE` | `drawer_size` | 64 KiB |
//! | `CABINET_MAX_DRAWERS` | `max_virtual_drawers` | 1024 |
//! | `CABINET_RESERVED_SLOTS` | `reserved_free_slots` | 2 |
//! | `CABINET_GC_INTERVAL_MS` | `gc_interval` | 100 |
//! | `CABINET_SWAP_PATH` | `swap_path` | temp dir |

use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Configuration for the paged heap.
#[derive(Debug, Clone)]
pub struct CabinetSettings {
    /// Total arena bytes. Must be a multiple of `drawer_size`.
    pub heap_size: usize,
    /// Bytes per drawer. Each of the two trays gets half of it.
    pub drawer_size: usize,
    /// Upper bound of the virtual drawer table.
    pub max_virtual_drawers: usize,
    /// The GC evicts one drawer per tick while fewer slots than this are free.
    pub reserved_free_slots: usize,
    /// Period of the background aging/eviction daemon.
    pub gc_interval: Duration,
    /// Location of the swap file. `None` picks a unique file in the temp dir.
    pub swap_path: Option<PathBuf>,
}

impl Default for CabinetSettings {
    fn default() -> Self {
        Self {
            heap_size: 10 * 1024 * 1024, // 10 MiB
            drawer_size: 64 * 1024,      // 64 KiB => 160 frames
            max_virtual_drawers: 1024,
            reserved_free_slots: 2,
            gc_interval: Duration::from_millis(100),
            swap_path: None,
        }
    }
}

impl CabinetSettings {
    /// Defaults overlaid with any `CABINET_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(v) = env_parse("CABINET_HEAP_SIZE") {
            settings.heap_size = v;
        }
        if let Some(v) = env_parse("CABINET_DRAWER_SIZE") {
            settings.drawer_size = v;
        }
        if let Some(v) = env_parse("CABINET_MAX_DRAWERS") {
            settings.max_virtual_drawers = v;
        }
        if let Some(v) = env_parse("CABINET_RESERVED_SLOTS") {
            settings.reserved_free_slots = v;
        }
        if let Some(ms) = env_parse::<u64>("CABINET_GC_INTERVAL_MS") {
            settings.gc_interval = Duration::from_millis(ms);
        }
        if let Ok(path) = env::var("CABINET_SWAP_PATH") {
            settings.swap_path = Some(PathBuf::from(path));
        }
        settings
    }

    #[inline]
    pub fn physical_slots(&self) -> usize {
        self.heap_size / self.drawer_size
    }

    #[inline]
    pub fn tray_size(&self) -> usize {
        self.drawer_size / 2
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.heap_size == 0 || self.drawer_size == 0 {
            return Err("sizes must be > 0");
        }
        if !self.drawer_size.is_multiple_of(16) {
            return Err("drawer_size must be a multiple of 16");
        }
        if self.drawer_size > u32::MAX as usize {
            return Err("drawer_size must fit a 32-bit offset");
        }
        if !self.heap_size.is_multiple_of(self.drawer_size) {
            return Err("heap_size must be a multiple of drawer_size");
        }
        if self.reserved_free_slots >= self.physical_slots() {
            return Err("reserved_free_slots must leave at least one usable slot");
        }
        if self.max_virtual_drawers == 0 || self.max_virtual_drawers > u32::MAX as usize {
            return Err("max_virtual_drawers must be within 1..2^32");
        }
        if self.gc_interval.is_zero() {
            return Err("gc_interval must be > 0");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = CabinetSettings::default();
        assert_eq!(s.validate(), Ok(()));
        assert_eq!(s.physical_slots(), 160);
        assert_eq!(s.tray_size(), 32 * 1024);
    }

    #[test]
    fn rejects_heap_not_multiple_of_drawer() {
        let s = CabinetSettings {
            heap_size: 4096 * 3 + 16,
            drawer_size: 4096,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_reserving_every_slot() {
        let s = CabinetSettings {
            heap_size: 4096 * 2,
            drawer_size: 4096,
            reserved_free_slots: 2,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_unaligned_drawers() {
        let s = CabinetSettings {
            heap_size: 1008 * 4,
            drawer_size: 1008,
            reserved_free_slots: 1,
            ..Default::default()
        };
        assert!(s.validate().is_ok());
        let s = CabinetSettings {
            heap_size: 1004 * 4,
            drawer_size: 1004,
            reserved_free_slots: 1,
            ..Default::default()
        };
        assert_eq!(s.validate(), Err("drawer_size must be a multiple of 16"));
    }
}
