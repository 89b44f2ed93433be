use crate::bus::Bus;
use crate::instructions::{
    AluOp, CB_OPCODES, CbInstruction, CbOp, Cond, Instruction, OPCODES, R8, R16, R16Mem, R16Stack,
};
use crate::interrupts::Interrupt;
use crate::registers::{Flag, Register, Registers};
use crate::trace::{self, TraceSink};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        log::trace!(target: "cpu", $($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

pub const CYCLES_PER_M_CYCLE: u64 = 4;

/// Result of a single [`Cpu::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted,
    /// An undefined opcode was executed; the CPU is locked.
    FatalOpcode(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
}

/// Where an undefined opcode was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalOpcode {
    pub opcode: u8,
    pub pc: u16,
}

pub struct Cpu {
    pub regs: Registers,
    pub ime: bool,
    state: CpuState,
    /// T-cycles executed since creation.
    cycles: u64,
    ime_enable_delay: u8,
    halt_bug: bool,
    /// IF as it was when HALT was entered.
    halt_flags: u8,
    fault: Option<IllegalOpcode>,
    trace: Option<Box<dyn TraceSink>>,
}

impl Cpu {
    /// CPU with the register state the boot ROM leaves behind.
    pub fn new() -> Self {
        Self::with_registers(Registers::post_boot())
    }

    /// CPU at PC=0 with zeroed registers, for running a boot ROM.
    pub fn new_power_on() -> Self {
        Self::with_registers(Registers::default())
    }

    fn with_registers(regs: Registers) -> Self {
        Self {
            regs,
            ime: false,
            state: CpuState::Running,
            cycles: 0,
            ime_enable_delay: 0,
            halt_bug: false,
            halt_flags: 0,
            fault: None,
            trace: None,
        }
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    pub fn halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn fault(&self) -> Option<IllegalOpcode> {
        self.fault
    }

    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace.take()
    }

    /// Formatted CPU state string for debugging.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} CY:{}",
            self.regs.read(Register::AF),
            self.regs.read(Register::BC),
            self.regs.read(Register::DE),
            self.regs.hl(),
            self.regs.pc,
            self.regs.sp,
            self.cycles
        )
    }

    #[inline]
    fn tick<B: Bus>(&mut self, bus: &mut B, m_cycles: u8) {
        self.cycles += CYCLES_PER_M_CYCLE * m_cycles as u64;
        bus.tick(m_cycles);
    }

    #[inline(always)]
    fn fetch8<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let val = bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        self.tick(bus, 1);
        val
    }

    #[inline(always)]
    fn fetch16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch8(bus) as u16;
        let hi = self.fetch8(bus) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn read8<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let val = bus.read(addr);
        self.tick(bus, 1);
        val
    }

    #[inline(always)]
    fn write8<B: Bus>(&mut self, bus: &mut B, addr: u16, val: u8) {
        bus.write(addr, val);
        self.tick(bus, 1);
    }

    fn push16<B: Bus>(&mut self, bus: &mut B, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, hi);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write8(bus, self.regs.sp, lo);
    }

    fn pop16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.read8(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read8(bus, self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(1);
        u16::from_le_bytes([lo, hi])
    }

    fn read_r8<B: Bus>(&mut self, bus: &mut B, r: R8) -> u8 {
        match r {
            R8::B => self.regs.b,
            R8::C => self.regs.c,
            R8::D => self.regs.d,
            R8::E => self.regs.e,
            R8::H => self.regs.h,
            R8::L => self.regs.l,
            R8::HlInd => self.read8(bus, self.regs.hl()),
            R8::A => self.regs.a,
        }
    }

    fn write_r8<B: Bus>(&mut self, bus: &mut B, r: R8, val: u8) {
        match r {
            R8::B => self.regs.b = val,
            R8::C => self.regs.c = val,
            R8::D => self.regs.d = val,
            R8::E => self.regs.e = val,
            R8::H => self.regs.h = val,
            R8::L => self.regs.l = val,
            R8::HlInd => {
                let addr = self.regs.hl();
                self.write8(bus, addr, val);
            }
            R8::A => self.regs.a = val,
        }
    }

    fn r16(&self, rr: R16) -> u16 {
        match rr {
            R16::BC => self.regs.read(Register::BC),
            R16::DE => self.regs.read(Register::DE),
            R16::HL => self.regs.hl(),
            R16::SP => self.regs.sp,
        }
    }

    fn set_r16(&mut self, rr: R16, val: u16) {
        match rr {
            R16::BC => self.regs.write(Register::BC, val),
            R16::DE => self.regs.write(Register::DE, val),
            R16::HL => self.regs.set_hl(val),
            R16::SP => self.regs.sp = val,
        }
    }

    fn stack_register(rr: R16Stack) -> Register {
        match rr {
            R16Stack::BC => Register::BC,
            R16Stack::DE => Register::DE,
            R16Stack::HL => Register::HL,
            R16Stack::AF => Register::AF,
        }
    }

    /// Address for an indirect access, applying HL+/HL- afterwards.
    fn mem_addr(&mut self, m: R16Mem) -> u16 {
        match m {
            R16Mem::BC => self.regs.read(Register::BC),
            R16Mem::DE => self.regs.read(Register::DE),
            R16Mem::HLI => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_add(1));
                hl
            }
            R16Mem::HLD => {
                let hl = self.regs.hl();
                self.regs.set_hl(hl.wrapping_sub(1));
                hl
            }
        }
    }

    fn condition(&self, cond: Option<Cond>) -> bool {
        match cond {
            None => true,
            Some(Cond::NZ) => !self.regs.flag(Flag::Z),
            Some(Cond::Z) => self.regs.flag(Flag::Z),
            Some(Cond::NC) => !self.regs.flag(Flag::C),
            Some(Cond::C) => self.regs.flag(Flag::C),
        }
    }

    fn alu(&mut self, op: AluOp, val: u8) {
        let a = self.regs.a;
        let carry_in = self.regs.flag(Flag::C) as u8;
        match op {
            AluOp::Add | AluOp::Adc => {
                let c = if op == AluOp::Adc { carry_in } else { 0 };
                let sum = a as u16 + val as u16 + c as u16;
                let res = sum as u8;
                self.regs.set_flags(
                    res == 0,
                    false,
                    (a & 0x0F) + (val & 0x0F) + c > 0x0F,
                    sum > 0xFF,
                );
                self.regs.a = res;
            }
            AluOp::Sub | AluOp::Sbc | AluOp::Cp => {
                let c = if op == AluOp::Sbc { carry_in } else { 0 };
                let res = a.wrapping_sub(val).wrapping_sub(c);
                self.regs.set_flags(
                    res == 0,
                    true,
                    (a & 0x0F) < (val & 0x0F) + c,
                    (a as u16) < val as u16 + c as u16,
                );
                if op != AluOp::Cp {
                    self.regs.a = res;
                }
            }
            AluOp::And => {
                self.regs.a &= val;
                self.regs.set_flags(self.regs.a == 0, false, true, false);
            }
            AluOp::Xor => {
                self.regs.a ^= val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
            AluOp::Or => {
                self.regs.a |= val;
                self.regs.set_flags(self.regs.a == 0, false, false, false);
            }
        }
    }

    /// SP plus a signed immediate; H and C come from the low byte.
    fn sp_offset(&mut self, offset: u8) -> u16 {
        let sp = self.regs.sp;
        let val = offset as i8 as i16 as u16;
        self.regs.set_flags(
            false,
            false,
            (sp & 0x0F) + (val & 0x0F) > 0x0F,
            (sp & 0xFF) + (val & 0xFF) > 0xFF,
        );
        sp.wrapping_add(val)
    }

    fn daa(&mut self) {
        let mut correction = 0u8;
        let mut carry = false;
        let subtract = self.regs.flag(Flag::N);
        if self.regs.flag(Flag::H) || (!subtract && (self.regs.a & 0x0F) > 9) {
            correction |= 0x06;
        }
        if self.regs.flag(Flag::C) || (!subtract && self.regs.a > 0x99) {
            correction |= 0x60;
            carry = true;
        }
        self.regs.a = if subtract {
            self.regs.a.wrapping_sub(correction)
        } else {
            self.regs.a.wrapping_add(correction)
        };
        self.regs.set_flags(self.regs.a == 0, subtract, false, carry);
    }

    fn shift(&mut self, op: CbOp, val: u8) -> u8 {
        let carry_in = self.regs.flag(Flag::C) as u8;
        let (res, carry) = match op {
            CbOp::Rlc => (val.rotate_left(1), val & 0x80 != 0),
            CbOp::Rrc => (val.rotate_right(1), val & 0x01 != 0),
            CbOp::Rl => ((val << 1) | carry_in, val & 0x80 != 0),
            CbOp::Rr => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
            CbOp::Sla => (val << 1, val & 0x80 != 0),
            CbOp::Sra => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            CbOp::Swap => (val.rotate_left(4), false),
            CbOp::Srl => (val >> 1, val & 0x01 != 0),
        };
        self.regs.set_flags(res == 0, false, false, carry);
        res
    }

    fn execute_cb<B: Bus>(&mut self, bus: &mut B, cb: CbInstruction) {
        match cb {
            CbInstruction::Shift(op, r) => {
                let val = self.read_r8(bus, r);
                let res = self.shift(op, val);
                self.write_r8(bus, r, res);
            }
            CbInstruction::Bit(bit, r) => {
                let val = self.read_r8(bus, r);
                self.regs.set_flag(Flag::Z, val & (1 << bit) == 0);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, true);
            }
            CbInstruction::Res(bit, r) => {
                let val = self.read_r8(bus, r);
                self.write_r8(bus, r, val & !(1 << bit));
            }
            CbInstruction::Set(bit, r) => {
                let val = self.read_r8(bus, r);
                self.write_r8(bus, r, val | (1 << bit));
            }
        }
    }

    fn enter_halt<B: Bus>(&mut self, bus: &mut B) {
        let pending = bus.pending_interrupts();
        if self.ime || pending == 0 || self.ime_enable_delay > 0 {
            self.state = CpuState::Halted;
            self.halt_flags = bus.interrupt_flags() & 0x1F;
        } else {
            // HALT bug: the next opcode byte is read twice.
            self.halt_bug = true;
        }
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, instr: Instruction) {
        match instr {
            Instruction::Nop => {}
            Instruction::Stop => {
                // The padding byte is skipped; no low-power mode.
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            Instruction::Halt => self.enter_halt(bus),
            Instruction::Di => {
                self.ime = false;
                self.ime_enable_delay = 0;
            }
            Instruction::Ei => {
                if !self.ime && self.ime_enable_delay == 0 {
                    self.ime_enable_delay = 2;
                }
            }
            Instruction::Ld8 { dst, src } => {
                let val = self.read_r8(bus, src);
                self.write_r8(bus, dst, val);
            }
            Instruction::Ld8Imm(dst) => {
                let val = self.fetch8(bus);
                self.write_r8(bus, dst, val);
            }
            Instruction::Ld16Imm(rr) => {
                let val = self.fetch16(bus);
                self.set_r16(rr, val);
            }
            Instruction::LdMemA(m) => {
                let addr = self.mem_addr(m);
                self.write8(bus, addr, self.regs.a);
            }
            Instruction::LdAMem(m) => {
                let addr = self.mem_addr(m);
                self.regs.a = self.read8(bus, addr);
            }
            Instruction::LdAbsSp => {
                let addr = self.fetch16(bus);
                let [hi, lo] = self.regs.sp.to_be_bytes();
                self.write8(bus, addr, lo);
                self.write8(bus, addr.wrapping_add(1), hi);
            }
            Instruction::Inc16(rr) => {
                self.set_r16(rr, self.r16(rr).wrapping_add(1));
                self.tick(bus, 1);
            }
            Instruction::Dec16(rr) => {
                self.set_r16(rr, self.r16(rr).wrapping_sub(1));
                self.tick(bus, 1);
            }
            Instruction::AddHl(rr) => {
                let hl = self.regs.hl();
                let val = self.r16(rr);
                let sum = hl as u32 + val as u32;
                self.regs.set_flag(Flag::N, false);
                self.regs
                    .set_flag(Flag::H, (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF);
                self.regs.set_flag(Flag::C, sum > 0xFFFF);
                self.regs.set_hl(sum as u16);
                self.tick(bus, 1);
            }
            Instruction::Inc8(r) => {
                let val = self.read_r8(bus, r);
                let res = val.wrapping_add(1);
                self.regs.set_flag(Flag::Z, res == 0);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, val & 0x0F == 0x0F);
                self.write_r8(bus, r, res);
            }
            Instruction::Dec8(r) => {
                let val = self.read_r8(bus, r);
                let res = val.wrapping_sub(1);
                self.regs.set_flag(Flag::Z, res == 0);
                self.regs.set_flag(Flag::N, true);
                self.regs.set_flag(Flag::H, val & 0x0F == 0);
                self.write_r8(bus, r, res);
            }
            Instruction::Rlca | Instruction::Rrca | Instruction::Rla | Instruction::Rra => {
                let op = match instr {
                    Instruction::Rlca => CbOp::Rlc,
                    Instruction::Rrca => CbOp::Rrc,
                    Instruction::Rla => CbOp::Rl,
                    _ => CbOp::Rr,
                };
                self.regs.a = self.shift(op, self.regs.a);
                // The accumulator forms always clear Z.
                self.regs.set_flag(Flag::Z, false);
            }
            Instruction::Daa => self.daa(),
            Instruction::Cpl => {
                self.regs.a = !self.regs.a;
                self.regs.set_flag(Flag::N, true);
                self.regs.set_flag(Flag::H, true);
            }
            Instruction::Scf => {
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, false);
                self.regs.set_flag(Flag::C, true);
            }
            Instruction::Ccf => {
                let carry = self.regs.flag(Flag::C);
                self.regs.set_flag(Flag::N, false);
                self.regs.set_flag(Flag::H, false);
                self.regs.set_flag(Flag::C, !carry);
            }
            Instruction::Jr(cond) => {
                let offset = self.fetch8(bus) as i8;
                if self.condition(cond) {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                    self.tick(bus, 1);
                }
            }
            Instruction::Alu { op, src } => {
                let val = self.read_r8(bus, src);
                self.alu(op, val);
            }
            Instruction::AluImm(op) => {
                let val = self.fetch8(bus);
                self.alu(op, val);
            }
            Instruction::Ret(None) => {
                self.regs.pc = self.pop16(bus);
                self.tick(bus, 1);
            }
            Instruction::Ret(cond) => {
                self.tick(bus, 1);
                if self.condition(cond) {
                    self.regs.pc = self.pop16(bus);
                    self.tick(bus, 1);
                }
            }
            Instruction::Reti => {
                self.regs.pc = self.pop16(bus);
                self.ime = true;
                self.tick(bus, 1);
            }
            Instruction::Pop(rr) => {
                let val = self.pop16(bus);
                self.regs.write(Self::stack_register(rr), val);
            }
            Instruction::Push(rr) => {
                let val = self.regs.read(Self::stack_register(rr));
                self.tick(bus, 1);
                self.push16(bus, val);
            }
            Instruction::Jp(cond) => {
                let addr = self.fetch16(bus);
                if self.condition(cond) {
                    self.regs.pc = addr;
                    self.tick(bus, 1);
                }
            }
            Instruction::JpHl => self.regs.pc = self.regs.hl(),
            Instruction::Call(cond) => {
                let addr = self.fetch16(bus);
                if self.condition(cond) {
                    self.tick(bus, 1);
                    self.push16(bus, self.regs.pc);
                    self.regs.pc = addr;
                }
            }
            Instruction::Rst(vector) => {
                self.tick(bus, 1);
                self.push16(bus, self.regs.pc);
                self.regs.pc = vector as u16;
            }
            Instruction::LdhImmA => {
                let offset = self.fetch8(bus);
                self.write8(bus, 0xFF00 | offset as u16, self.regs.a);
            }
            Instruction::LdhAImm => {
                let offset = self.fetch8(bus);
                self.regs.a = self.read8(bus, 0xFF00 | offset as u16);
            }
            Instruction::LdhCA => {
                self.write8(bus, 0xFF00 | self.regs.c as u16, self.regs.a);
            }
            Instruction::LdhAC => {
                self.regs.a = self.read8(bus, 0xFF00 | self.regs.c as u16);
            }
            Instruction::LdAbsA => {
                let addr = self.fetch16(bus);
                self.write8(bus, addr, self.regs.a);
            }
            Instruction::LdAAbs => {
                let addr = self.fetch16(bus);
                self.regs.a = self.read8(bus, addr);
            }
            Instruction::AddSpImm => {
                let offset = self.fetch8(bus);
                self.regs.sp = self.sp_offset(offset);
                self.tick(bus, 2);
            }
            Instruction::LdHlSpImm => {
                let offset = self.fetch8(bus);
                let val = self.sp_offset(offset);
                self.regs.set_hl(val);
                self.tick(bus, 1);
            }
            Instruction::LdSpHl => {
                self.regs.sp = self.regs.hl();
                self.tick(bus, 1);
            }
            Instruction::Prefix => {
                let op = self.fetch8(bus);
                self.execute_cb(bus, CB_OPCODES[op as usize]);
            }
            Instruction::Illegal(_) => unreachable!("illegal opcodes trap before execution"),
        }
    }

    /// Dispatch the highest-priority pending interrupt, if IME allows it.
    /// Returns true when an interrupt was serviced.
    fn handle_interrupts<B: Bus>(&mut self, bus: &mut B) -> bool {
        let pending = bus.pending_interrupts();
        if pending == 0 || !self.ime {
            return false;
        }
        let Some(irq) = Interrupt::highest(pending) else {
            return false;
        };
        cpu_trace!("interrupt {:?} from PC={:04X}", irq, self.regs.pc);
        self.ime = false;
        self.state = CpuState::Running;
        bus.acknowledge(irq);
        self.tick(bus, 2);
        self.push16(bus, self.regs.pc);
        self.regs.pc = irq.vector();
        self.tick(bus, 1);
        true
    }

    fn halted_step<B: Bus>(&mut self, bus: &mut B) -> StepOutcome {
        self.tick(bus, 1);
        let flags = bus.interrupt_flags() & 0x1F;
        let wake = bus.pending_interrupts() != 0 || (self.halt_flags == 0 && flags != 0);
        if wake {
            self.state = CpuState::Running;
            self.handle_interrupts(bus);
        }
        match self.state {
            CpuState::Halted => StepOutcome::Halted,
            CpuState::Running => StepOutcome::Continue,
        }
    }

    /// Execute one instruction, one HALT wait cycle, or one interrupt dispatch.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> StepOutcome {
        if let Some(fault) = self.fault {
            self.tick(bus, 1);
            return StepOutcome::FatalOpcode(fault.opcode);
        }
        if self.state == CpuState::Halted {
            return self.halted_step(bus);
        }

        if let Some(sink) = self.trace.as_mut() {
            sink.write(&trace::format_line(&self.regs, bus));
        }

        let enable_after = self.ime_enable_delay == 1;
        let pc = self.regs.pc;
        let opcode = if self.halt_bug {
            self.halt_bug = false;
            self.read8(bus, pc)
        } else {
            self.fetch8(bus)
        };

        let instr = OPCODES[opcode as usize];
        if let Instruction::Illegal(op) = instr {
            log::error!("illegal opcode {op:02X} at PC={pc:04X}, CPU locked");
            self.regs.pc = pc;
            self.fault = Some(IllegalOpcode { opcode: op, pc });
            return StepOutcome::FatalOpcode(op);
        }

        cpu_trace!("{:04X}: {:02X} {:?}", pc, opcode, instr);
        self.execute(bus, instr);

        if enable_after && self.ime_enable_delay > 0 {
            self.ime = true;
        }
        if self.ime_enable_delay > 0 {
            self.ime_enable_delay -= 1;
        }
        self.handle_interrupts(bus);

        match self.state {
            CpuState::Halted => StepOutcome::Halted,
            CpuState::Running => StepOutcome::Continue,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
