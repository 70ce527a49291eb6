use core::fmt;

/// A mask selecting a run of byte lanes in a big-endian doubleword.
///
/// Lane 0 is the most significant byte, matching guest memory order, so a mask of
/// `width` bytes at `alignment` covers the bytes a `width` byte access at offset
/// `alignment` would touch.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ByteMask8 {
    mask: u64,
}

impl ByteMask8 {
    #[inline(always)]
    pub fn new(width: u32, alignment: u32) -> Self {
        debug_assert!(width + alignment <= 8);
        let mask = (!0u64).wrapping_shl(64 - width * 8) >> (alignment * 8);
        ByteMask8 { mask: if width == 0 { 0 } else { mask } }
    }

    #[inline(always)]
    pub fn masked_insert(&self, dest: &mut u64, value: u64) {
        *dest = (*dest & !self.mask) | (value & self.mask);
    }

    #[inline(always)]
    pub fn value(&self) -> u64 {
        self.mask
    }
}

impl fmt::Debug for ByteMask8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteMask8({:016x})", self.mask)
    }
}
