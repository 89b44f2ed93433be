use crate::interrupts::{Interrupt, Interrupts};

/// Internal clock shifts one bit per falling edge of this DIV counter bit
/// (8192 Hz on DMG).
const INTERNAL_CLOCK_BIT: u32 = 8;

/// Transport for the byte exchanged by a serial transfer.
pub trait LinkPort: Send {
    /// Exchange a byte with the partner. Called once per transfer, before
    /// the first bit is shifted.
    fn transfer(&mut self, byte: u8) -> u8;
}

/// Link port used when no cable is attached.
///
/// An unconnected line reads as all ones, so every transfer receives 0xFF.
/// With `loopback` set the outgoing byte is echoed back instead.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// SB/SC shift register.
///
/// Completed outgoing bytes accumulate in an output buffer which the host
/// drains with [`Serial::take_output`]; test ROMs print their results there.
pub struct Serial {
    sb: u8,
    sc: u8,
    out_buf: Vec<u8>,
    port: Box<dyn LinkPort>,
    transfer: Option<TransferState>,
}

struct TransferState {
    remaining_bits: u8,
    outgoing: u8,
    incoming: Option<u8>,
    pending_in: u8,
    internal_clock: bool,
}

impl TransferState {
    fn new(outgoing: u8, internal_clock: bool) -> Self {
        Self {
            remaining_bits: 8,
            outgoing,
            incoming: None,
            pending_in: 0,
            internal_clock,
        }
    }

    fn latch_incoming(&mut self, port: &mut dyn LinkPort) {
        if self.incoming.is_none() {
            let incoming = port.transfer(self.outgoing);
            self.incoming = Some(incoming);
            self.pending_in = incoming;
        }
    }

    /// Shift one bit in; returns true when the byte is complete.
    fn shift(&mut self, sb: &mut u8) -> bool {
        if self.remaining_bits == 0 {
            return true;
        }
        let incoming_bit = self.pending_in & 0x80 != 0;
        self.pending_in <<= 1;
        *sb = (*sb << 1) | incoming_bit as u8;
        self.remaining_bits -= 1;
        self.remaining_bits == 0
    }
}

impl Serial {
    pub fn new() -> Self {
        Self {
            sb: 0,
            sc: 0x7E,
            out_buf: Vec::new(),
            port: Box::new(NullLinkPort::default()),
            transfer: None,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => self.sc | 0x7E,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val;
                // Clearing bit 7 cancels; setting it (re)starts with the
                // current SB, even mid-transfer.
                self.transfer = if val & 0x80 != 0 {
                    Some(TransferState::new(self.sb, val & 0x01 != 0))
                } else {
                    None
                };
            }
            _ => {}
        }
    }

    /// Deliver clock pulses from a link partner driving the external clock.
    ///
    /// Without these pulses an external-clock transfer never completes.
    pub fn external_clock_pulse(&mut self, count: u8, irqs: &mut Interrupts) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        if state.internal_clock {
            return;
        }
        state.latch_incoming(self.port.as_mut());
        let mut complete = false;
        for _ in 0..count {
            if state.shift(&mut self.sb) {
                complete = true;
                break;
            }
        }
        if complete {
            self.finish(irqs);
        }
    }

    /// Clock an internal-clock transfer across the DIV change
    /// `prev_div -> curr_div`.
    pub fn step(&mut self, prev_div: u16, curr_div: u16, irqs: &mut Interrupts) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        if !state.internal_clock {
            return;
        }
        state.latch_incoming(self.port.as_mut());

        let mut div = prev_div;
        let mut prev_clock = (div >> INTERNAL_CLOCK_BIT) & 1 != 0;
        let mut complete = false;
        for _ in 0..curr_div.wrapping_sub(prev_div) {
            div = div.wrapping_add(1);
            let clock = (div >> INTERNAL_CLOCK_BIT) & 1 != 0;
            if prev_clock && !clock && state.shift(&mut self.sb) {
                complete = true;
                break;
            }
            prev_clock = clock;
        }
        if complete {
            self.finish(irqs);
        }
    }

    fn finish(&mut self, irqs: &mut Interrupts) {
        if let Some(state) = self.transfer.take() {
            self.sb = state.incoming.unwrap_or(0xFF);
            self.out_buf.push(state.outgoing);
            self.sc &= 0x7F;
            irqs.request(Interrupt::Serial);
        }
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out_buf)
    }

    pub fn peek_output(&self) -> &[u8] {
        &self.out_buf
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::new()
    }
}
