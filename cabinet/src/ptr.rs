use std::fmt;

/// A virtual address: drawer id in the high 32 bits, byte offset in the low.
///
/// `Ptr(0)` is null. It names drawer 0 offset 0, which the allocator never
/// hands out, so drawer 0 allocates from offset 8.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Ptr(u64);

impl Ptr {
    pub const NULL: Self = Self(0);
    pub const SIZE: usize = 8;

    #[inline(always)]
    pub const fn new(drawer: u32, offset: u32) -> Self {
        Self(((drawer as u64) << 32) | offset as u64)
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn drawer(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline(always)]
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` further into the same drawer.
    #[inline(always)]
    pub const fn add(self, bytes: u32) -> Self {
        Self::new(self.drawer(), self.offset() + bytes)
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Ptr(null)");
        }
        write!(f, "Ptr({}:{:#x})", self.drawer(), self.offset())
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Round `size` up to the next multiple of 8.
#[inline(always)]
pub const fn align8(size: usize) -> usize {
    (size + 7) & !7
}
