//! Single-step instruction vectors in the public SM83 JSON format.

mod common;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use common::FlatBus;
use dmg_emu_core::cpu::{Cpu, StepOutcome};
use dmg_emu_core::instructions::ILLEGAL_OPCODES;

const BASE_URL: &str = "https://raw.githubusercontent.com/SingleStepTests/sm83/main/v1";

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    initial: State,
    #[serde(rename = "final")]
    expected: State,
    cycles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct State {
    pc: u16,
    sp: u16,
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    f: u8,
    h: u8,
    l: u8,
    #[serde(default)]
    ime: u8,
    ram: Vec<(u16, u8)>,
}

fn vector_path(file: &str) -> PathBuf {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("test_roms/sm83/v1")
        .join(file);
    if !path.exists() {
        let url = format!("{BASE_URL}/{}", file.replace(' ', "%20"));
        common::download_file(&url, &path);
    }
    path
}

fn load_cases(file: &str) -> Vec<Case> {
    let data = std::fs::read(vector_path(file)).expect("failed to read vector file");
    serde_json::from_slice(&data).expect("failed to parse vector file")
}

fn apply(cpu: &mut Cpu, bus: &mut FlatBus, state: &State) {
    cpu.regs.pc = state.pc;
    cpu.regs.sp = state.sp;
    cpu.regs.a = state.a;
    cpu.regs.set_f(state.f);
    cpu.regs.b = state.b;
    cpu.regs.c = state.c;
    cpu.regs.d = state.d;
    cpu.regs.e = state.e;
    cpu.regs.h = state.h;
    cpu.regs.l = state.l;
    cpu.ime = state.ime != 0;
    for &(addr, val) in &state.ram {
        bus.mem[addr as usize] = val;
    }
}

fn check(cpu: &Cpu, bus: &FlatBus, case: &Case, compare_ime: bool) {
    let want = &case.expected;
    let got = (
        cpu.regs.pc,
        cpu.regs.sp,
        cpu.regs.a,
        cpu.regs.f(),
        cpu.regs.b,
        cpu.regs.c,
        cpu.regs.d,
        cpu.regs.e,
        cpu.regs.h,
        cpu.regs.l,
    );
    let expected = (
        want.pc, want.sp, want.a, want.f, want.b, want.c, want.d, want.e, want.h, want.l,
    );
    assert_eq!(got, expected, "{}: registers", case.name);
    for &(addr, val) in &want.ram {
        assert_eq!(bus.mem[addr as usize], val, "{}: ram[{addr:04X}]", case.name);
    }
    if compare_ime {
        assert_eq!(cpu.ime, want.ime != 0, "{}: ime", case.name);
    }
    assert_eq!(bus.ticks, case.cycles.len() as u64, "{}: m-cycles", case.name);
}

fn run_file(file: &str, compare_ime: bool) {
    for case in load_cases(file) {
        let mut cpu = Cpu::new();
        let mut bus = FlatBus::new();
        apply(&mut cpu, &mut bus, &case.initial);
        assert_eq!(cpu.step(&mut bus), StepOutcome::Continue, "{}", case.name);
        check(&cpu, &bus, &case, compare_ime);
    }
}

#[test]
#[ignore = "downloads instruction vectors"]
fn base_opcodes() {
    for op in 0..=0xFFu8 {
        // STOP and HALT depend on machine state the vectors do not model.
        if ILLEGAL_OPCODES.contains(&op) || matches!(op, 0x10 | 0x76 | 0xCB) {
            continue;
        }
        // EI only takes effect after the next instruction.
        run_file(&format!("{op:02x}.json"), op != 0xFB);
    }
}

#[test]
#[ignore = "downloads instruction vectors"]
fn cb_opcodes() {
    for op in 0..=0xFFu8 {
        run_file(&format!("cb {op:02x}.json"), true);
    }
}
