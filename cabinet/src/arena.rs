//! Physical memory: one anonymous mapping split into drawer-sized frames.

use std::{
    ptr::{self, NonNull},
    sync::atomic::AtomicU64,
};

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;
    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Private anonymous read/write mapping, zero-filled by the kernel.
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: arguments describe a fresh private mapping
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// # Safety
    /// must be allocated by `anonymous_mmap` with the same length
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

/// The fixed byte arena standing in for physical RAM.
///
/// Frame `slot` occupies `[slot * frame_size, (slot + 1) * frame_size)`.
/// The arena performs no synchronization of its own: the cabinet's
/// readers-writer lock decides who may touch which frame.
#[derive(Debug)]
pub struct Arena {
    base: NonNull<u8>,
    size: usize,
    frame_size: usize,
}

// SAFETY: all access goes through raw copies guarded by the cabinet lock.
unsafe impl Send for Arena {}
// SAFETY: all access goes through raw copies guarded by the cabinet lock.
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new(size: usize, frame_size: usize) -> std::io::Result<Self> {
        debug_assert!(size.is_multiple_of(frame_size));
        // SAFETY: result is null-checked below
        let raw = unsafe { unix::anonymous_mmap(size) };
        let base = NonNull::new(raw).ok_or_else(std::io::Error::last_os_error)?;
        log::debug!("mapped arena of {size} bytes at {:p}", base.as_ptr());
        Ok(Self {
            base,
            size,
            frame_size,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.size / self.frame_size
    }

    #[inline]
    pub fn frame_offset(&self, slot: usize) -> usize {
        slot * self.frame_size
    }

    #[inline]
    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.size),
            "arena access {offset}+{len} outside {} bytes",
            self.size
        );
    }

    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        // SAFETY: range checked above, dst cannot alias the mapping
        unsafe {
            ptr::copy_nonoverlapping(
                self.base.as_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            )
        };
    }

    pub fn write(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: range checked above, src cannot alias the mapping
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.base.as_ptr().add(offset),
                src.len(),
            )
        };
    }

    pub fn fill_zero(&self, offset: usize, len: usize) {
        self.check(offset, len);
        // SAFETY: range checked above
        unsafe { self.base.as_ptr().add(offset).write_bytes(0, len) };
    }

    pub fn read_frame(&self, slot: usize) -> Vec<u8> {
        let mut bytes = vec![0; self.frame_size];
        self.read(self.frame_offset(slot), &mut bytes);
        bytes
    }

    pub fn write_frame(&self, slot: usize, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.frame_size);
        self.write(self.frame_offset(slot), bytes);
    }

    pub fn zero_frame(&self, slot: usize) {
        self.fill_zero(self.frame_offset(slot), self.frame_size);
    }

    pub fn reset(&self) {
        self.fill_zero(0, self.size);
    }

    /// View an 8-byte cell as an atomic.
    ///
    /// The mapping is page aligned, so any offset that is a multiple of 8 is
    /// naturally aligned for `AtomicU64`.
    pub fn atomic_cell(&self, offset: usize) -> &AtomicU64 {
        assert!(offset.is_multiple_of(8), "unaligned atomic cell {offset}");
        self.check(offset, 8);
        // SAFETY: aligned, in bounds and valid for the arena's lifetime
        unsafe { AtomicU64::from_ptr(self.base.as_ptr().add(offset).cast()) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: base/size come from the mapping created in `new`
        unsafe { unix::anonymous_munmap(self.base.as_ptr(), self.size) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn fresh_arena_is_zeroed() {
        let arena = Arena::new(4 * 4096, 4096).unwrap();
        assert_eq!(arena.frame_count(), 4);
        assert!(arena.read_frame(3).iter().all(|&b| b == 0));
    }

    #[test]
    fn frames_do_not_overlap() {
        let arena = Arena::new(2 * 4096, 4096).unwrap();
        arena.write_frame(0, &vec![0xAA; 4096]);
        arena.write_frame(1, &vec![0x55; 4096]);
        assert!(arena.read_frame(0).iter().all(|&b| b == 0xAA));
        assert!(arena.read_frame(1).iter().all(|&b| b == 0x55));

        arena.zero_frame(0);
        assert!(arena.read_frame(0).iter().all(|&b| b == 0));
        assert!(arena.read_frame(1).iter().all(|&b| b == 0x55));
    }

    #[test]
    fn atomic_cell_aliases_bytes() {
        let arena = Arena::new(4096, 4096).unwrap();
        arena.atomic_cell(16).store(0x0102_0304_0506_0708, Ordering::SeqCst);
        let mut bytes = [0u8; 8];
        arena.read(16, &mut bytes);
        assert_eq!(u64::from_ne_bytes(bytes), 0x0102_0304_0506_0708);
    }

    #[test]
    #[should_panic(expected = "unaligned atomic cell")]
    fn atomic_cell_rejects_unaligned_offsets() {
        let arena = Arena::new(4096, 4096).unwrap();
        arena.atomic_cell(12);
    }
}
