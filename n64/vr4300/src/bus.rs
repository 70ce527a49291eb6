use tracing::warn;

/// Physical memory as seen by the CPU.
///
/// Accesses are big-endian and naturally aligned; `size` is 1, 2, 4 or 8 bytes. Values are
/// returned zero extended in the low bits.
pub trait Bus {
    fn read(&mut self, address: u32, size: u8) -> u64;
    fn write(&mut self, address: u32, size: u8, value: u64);

    fn fetch(&mut self, address: u32) -> u32 {
        self.read(address, 4) as u32
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read(&mut self, address: u32, size: u8) -> u64 {
        (**self).read(address, size)
    }

    fn write(&mut self, address: u32, size: u8, value: u64) {
        (**self).write(address, size, value)
    }
}

/// Flat RDRAM starting at physical address 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    pub fn new(size: usize) -> Ram {
        Ram { data: vec![0; size] }
    }

    /// Copy `bytes` in at `offset`, growing nothing. Returns false if it doesn't fit
    pub fn load(&mut self, offset: usize, bytes: &[u8]) -> bool {
        match self.data.get_mut(offset..offset + bytes.len()) {
            Some(dest) => {
                dest.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Store a sequence of instruction words at `offset`
    pub fn load_words(&mut self, offset: usize, words: &[u32]) -> bool {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.load(offset, &bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn range(&self, address: u32, size: u8) -> Option<std::ops::Range<usize>> {
        let start = address as usize;
        let end = start.checked_add(size as usize)?;
        (end <= self.data.len()).then_some(start..end)
    }
}

impl Bus for Ram {
    fn read(&mut self, address: u32, size: u8) -> u64 {
        let Some(range) = self.range(address, size) else {
            warn!(target: "BUS", "read{} from unmapped address {:#010x}", size * 8, address);
            return 0;
        };
        self.data[range].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    fn write(&mut self, address: u32, size: u8, value: u64) {
        let Some(range) = self.range(address, size) else {
            warn!(target: "BUS", "write{} to unmapped address {:#010x} ({:#x})", size * 8, address, value);
            return;
        };
        let bytes = value.to_be_bytes();
        self.data[range].copy_from_slice(&bytes[8 - size as usize..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_endian_access() {
        let mut ram = Ram::new(16);
        ram.write(0, 4, 0x1122_3344);
        assert_eq!(ram.bytes()[..4], [0x11, 0x22, 0x33, 0x44]);
        assert_eq!(ram.read(1, 2), 0x2233);
        ram.write(8, 8, 0x0102_0304_0506_0708);
        assert_eq!(ram.read(8, 8), 0x0102_0304_0506_0708);
        assert_eq!(ram.read(15, 1), 0x08);
    }

    #[test]
    fn out_of_range_reads_zero() {
        let mut ram = Ram::new(8);
        ram.write(6, 4, 0xffff_ffff);
        assert_eq!(ram.read(6, 4), 0);
        assert_eq!(ram.read(0xffff_fffc, 8), 0);
        assert!(!ram.load(6, &[1, 2, 3]));
    }
}
