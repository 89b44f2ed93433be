use std::io::Write;

use crate::bus::Bus;
use crate::registers::Registers;

/// Destination for the per-instruction CPU trace.
pub trait TraceSink: Send {
    fn write(&mut self, line: &str);
}

/// Adapts any `io::Write` into a trace sink.
///
/// The first write error is logged and the sink goes quiet afterwards, so a
/// full disk cannot stall emulation.
pub struct WriterSink<W: Write + Send> {
    writer: W,
    failed: bool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failed: false,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TraceSink for WriterSink<W> {
    fn write(&mut self, line: &str) {
        if self.failed {
            return;
        }
        if let Err(err) = writeln!(self.writer, "{line}") {
            log::warn!("trace output disabled: {err}");
            self.failed = true;
        }
    }
}

/// Format the register file and the four bytes at PC in the common
/// log-comparison layout.
pub fn format_line<B: Bus + ?Sized>(regs: &Registers, bus: &B) -> String {
    let pc = regs.pc;
    let mem = [
        bus.peek(pc),
        bus.peek(pc.wrapping_add(1)),
        bus.peek(pc.wrapping_add(2)),
        bus.peek(pc.wrapping_add(3)),
    ];
    format!(
        "A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} PC:{:04X} PCMEM:{:02X},{:02X},{:02X},{:02X}",
        regs.a,
        regs.f(),
        regs.b,
        regs.c,
        regs.d,
        regs.e,
        regs.h,
        regs.l,
        regs.sp,
        pc,
        mem[0],
        mem[1],
        mem[2],
        mem[3],
    )
}
