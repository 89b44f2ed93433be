use crate::interrupts::Interrupt;

/// Everything the CPU sees of the machine.
///
/// Every `read`/`write` is one M-cycle worth of bus traffic, but timing is
/// advanced explicitly through [`Bus::tick`] so the CPU decides when each
/// access lands relative to the peripherals.
pub trait Bus {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, val: u8);

    /// Side-effect free read used by tracing and debuggers.
    fn peek(&self, addr: u16) -> u8;

    /// Advance all peripherals by `m_cycles` machine cycles.
    fn tick(&mut self, m_cycles: u8);

    fn interrupt_flags(&self) -> u8;
    fn interrupt_enable(&self) -> u8;

    /// Clear the IF bit of an interrupt that is being serviced.
    fn acknowledge(&mut self, irq: Interrupt);

    #[inline]
    fn pending_interrupts(&self) -> u8 {
        self.interrupt_flags() & self.interrupt_enable() & 0x1F
    }

    fn read_word(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr);
        let hi = self.read(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn write_word(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write(addr, lo);
        self.write(addr.wrapping_add(1), hi);
    }
}
