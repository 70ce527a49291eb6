//! Bump allocated arena holding every compiled block's host code.
//!
//! Nothing is ever freed on its own. When a block doesn't fit, the owner flushes the whole
//! arena, which only resets the high water mark.

use std::ops::Range;

/// Where a block's code lives in the arena. Only meaningful for the generation it was
/// handed out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    pub offset: usize,
    pub len: usize,
    pub generation: u32,
}

impl CodeRange {
    fn bytes(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

#[derive(Debug)]
pub struct CodeCache {
    bytes: Vec<u8>,
    used: usize,
    generation: u32,
}

impl CodeCache {
    pub fn new(capacity: usize) -> CodeCache {
        CodeCache { bytes: vec![0; capacity], used: 0, generation: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Bumped by every flush
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Hand out the next `len` bytes, or `None` if they don't fit before the end
    pub fn reserve(&mut self, len: usize) -> Option<(CodeRange, &mut [u8])> {
        let end = self.used.checked_add(len).filter(|&end| end <= self.capacity())?;
        let range = CodeRange { offset: self.used, len, generation: self.generation };
        let start = self.used;
        self.used = end;
        Some((range, &mut self.bytes[start..end]))
    }

    /// Copy a finished block in
    pub fn insert(&mut self, code: &[u8]) -> Option<CodeRange> {
        let (range, dest) = self.reserve(code.len())?;
        dest.copy_from_slice(code);
        Some(range)
    }

    /// `None` once the range's generation has been flushed
    pub fn get(&self, range: CodeRange) -> Option<&[u8]> {
        if range.generation != self.generation {
            return None;
        }
        self.bytes.get(range.bytes())
    }

    pub fn flush(&mut self) {
        self.used = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_until_full() {
        let mut cache = CodeCache::new(16);
        let a = cache.insert(&[1; 10]).unwrap();
        assert_eq!(cache.used(), 10);
        assert!(cache.insert(&[2; 7]).is_none());
        let b = cache.insert(&[3; 6]).unwrap();
        assert_eq!(b.offset, 10);
        assert_eq!(cache.used(), cache.capacity());
        assert_eq!(cache.get(a), Some(&[1u8; 10][..]));
    }

    #[test]
    fn flush_retires_old_ranges() {
        let mut cache = CodeCache::new(16);
        let a = cache.insert(&[1; 10]).unwrap();
        cache.flush();
        assert_eq!(cache.used(), 0);
        assert_eq!(cache.get(a), None);
        let b = cache.insert(&[2; 10]).unwrap();
        assert_eq!(b.offset, a.offset);
        assert_eq!(cache.get(b), Some(&[2u8; 10][..]));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn ranges_past_four_gigabytes_keep_their_offset() {
        let range = CodeRange { offset: 0x1_0000_0010, len: 0x20, generation: 0 };
        assert_eq!(range.bytes(), 0x1_0000_0010..0x1_0000_0030);
    }
}
