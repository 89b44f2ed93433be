// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

// Post-boot DMG register state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_A: u8 = 0x01;
const BOOT_F: u8 = 0xB0;
const BOOT_B: u8 = 0x00;
const BOOT_C: u8 = 0x13;
const BOOT_D: u8 = 0x00;
const BOOT_E: u8 = 0xD8;
const BOOT_H: u8 = 0x01;
const BOOT_L: u8 = 0x4D;
const BOOT_SP: u16 = 0xFFFE;
const BOOT_PC: u16 = 0x0100;

/// Every register id the CPU can address, including the paired views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
    AF,
    BC,
    DE,
    HL,
    SP,
    PC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Zero
    Z,
    /// Subtract
    N,
    /// Half carry
    H,
    /// Carry
    C,
}

impl Flag {
    pub const fn mask(self) -> u8 {
        match self {
            Flag::Z => FLAG_Z,
            Flag::N => FLAG_N,
            Flag::H => FLAG_H,
            Flag::C => FLAG_C,
        }
    }
}

/// The SM83 register file.
///
/// The paired registers (AF, BC, DE, HL) are views over the 8-bit storage.
/// F is kept private so its low nibble can never become non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Register contents after the DMG boot ROM hands control to the cartridge.
    pub fn post_boot() -> Self {
        Self {
            a: BOOT_A,
            f: BOOT_F,
            b: BOOT_B,
            c: BOOT_C,
            d: BOOT_D,
            e: BOOT_E,
            h: BOOT_H,
            l: BOOT_L,
            sp: BOOT_SP,
            pc: BOOT_PC,
        }
    }

    /// Read a register; 8-bit registers are zero-extended.
    pub fn read(&self, reg: Register) -> u16 {
        match reg {
            Register::A => self.a as u16,
            Register::F => self.f as u16,
            Register::B => self.b as u16,
            Register::C => self.c as u16,
            Register::D => self.d as u16,
            Register::E => self.e as u16,
            Register::H => self.h as u16,
            Register::L => self.l as u16,
            Register::AF => pair(self.a, self.f),
            Register::BC => pair(self.b, self.c),
            Register::DE => pair(self.d, self.e),
            Register::HL => pair(self.h, self.l),
            Register::SP => self.sp,
            Register::PC => self.pc,
        }
    }

    /// Write a register; 8-bit registers take the low byte of `val`.
    pub fn write(&mut self, reg: Register, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        match reg {
            Register::A => self.a = lo,
            Register::F => self.f = lo & 0xF0,
            Register::B => self.b = lo,
            Register::C => self.c = lo,
            Register::D => self.d = lo,
            Register::E => self.e = lo,
            Register::H => self.h = lo,
            Register::L => self.l = lo,
            Register::AF => {
                self.a = hi;
                self.f = lo & 0xF0;
            }
            Register::BC => {
                self.b = hi;
                self.c = lo;
            }
            Register::DE => {
                self.d = hi;
                self.e = lo;
            }
            Register::HL => {
                self.h = hi;
                self.l = lo;
            }
            Register::SP => self.sp = val,
            Register::PC => self.pc = val,
        }
    }

    #[inline]
    pub fn f(&self) -> u8 {
        self.f
    }

    #[inline]
    pub fn set_f(&mut self, val: u8) {
        self.f = val & 0xF0;
    }

    #[inline]
    pub fn flag(&self, flag: Flag) -> bool {
        self.f & flag.mask() != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, on: bool) {
        if on {
            self.f |= flag.mask();
        } else {
            self.f &= !flag.mask();
        }
    }

    #[inline]
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        self.f = if z { FLAG_Z } else { 0 }
            | if n { FLAG_N } else { 0 }
            | if h { FLAG_H } else { 0 }
            | if c { FLAG_C } else { 0 };
    }

    #[inline]
    pub fn hl(&self) -> u16 {
        pair(self.h, self.l)
    }

    #[inline]
    pub fn set_hl(&mut self, val: u16) {
        self.write(Register::HL, val);
    }
}

#[inline]
fn pair(hi: u8, lo: u8) -> u16 {
    u16::from_be_bytes([hi, lo])
}
