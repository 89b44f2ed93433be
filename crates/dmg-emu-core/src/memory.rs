/// Byte-addressable storage or register block mapped into the address space.
///
/// Addresses are absolute bus addresses; each device translates them to its
/// own storage.
pub trait MemoryDevice {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, val: u8);
}

/// Fixed-size RAM block mapped at `base`.
#[derive(Debug, Clone)]
pub struct Ram {
    base: u16,
    data: Box<[u8]>,
}

impl Ram {
    pub fn new(size: usize, base: u16) -> Self {
        Self {
            base,
            data: vec![0; size].into_boxed_slice(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn offset(&self, addr: u16) -> usize {
        addr.wrapping_sub(self.base) as usize
    }
}

impl MemoryDevice for Ram {
    fn read(&self, addr: u16) -> u8 {
        self.data.get(self.offset(addr)).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, addr: u16, val: u8) {
        let idx = self.offset(addr);
        if let Some(b) = self.data.get_mut(idx) {
            *b = val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_translates_from_base() {
        let mut ram = Ram::new(0x7F, 0xFF80);
        ram.write(0xFF80, 0x12);
        ram.write(0xFFFE, 0x34);
        assert_eq!(ram.read(0xFF80), 0x12);
        assert_eq!(ram.read(0xFFFE), 0x34);
        assert_eq!(ram.data[0], 0x12);
        assert_eq!(ram.data[0x7E], 0x34);
    }

    #[test]
    fn out_of_range_reads_open_bus() {
        let mut ram = Ram::new(0x10, 0xFF30);
        ram.write(0xFF40, 0x55);
        assert_eq!(ram.read(0xFF40), 0xFF);
        assert_eq!(ram.read(0xFF2F), 0xFF);
    }
}
