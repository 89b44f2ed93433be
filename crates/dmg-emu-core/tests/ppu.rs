use dmg_emu_core::interrupts::{Interrupt, Interrupts};
use dmg_emu_core::ppu::{DEFAULT_PALETTE, Mode, Ppu, SCREEN_WIDTH};

fn tick_until_vblank(ppu: &mut Ppu, irqs: &mut Interrupts) -> u64 {
    let mut ticks = 0;
    loop {
        let before = ppu.mode();
        ppu.tick(irqs);
        ticks += 1;
        if before != Mode::VBlank && ppu.mode() == Mode::VBlank {
            return ticks;
        }
    }
}

#[test]
fn vblank_entries_are_70224_ticks_apart() {
    let mut ppu = Ppu::new();
    let mut irqs = Interrupts::new();
    tick_until_vblank(&mut ppu, &mut irqs);
    for _ in 0..3 {
        assert_eq!(tick_until_vblank(&mut ppu, &mut irqs), 70_224);
    }
}

#[test]
fn ly_visits_every_line_once_per_frame() {
    let mut ppu = Ppu::new();
    let mut irqs = Interrupts::new();
    tick_until_vblank(&mut ppu, &mut irqs);

    let mut seen = Vec::new();
    let mut last = None;
    // Stop one tick short of the next VBlank entry.
    for _ in 0..70_223 {
        ppu.tick(&mut irqs);
        let ly = ppu.ly();
        if last != Some(ly) {
            seen.push(ly);
            last = Some(ly);
        }
    }
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(seen.len(), 154);
    assert_eq!(sorted, (0..=153).collect::<Vec<u8>>());
}

#[test]
fn vblank_requests_interrupt_and_publishes_frame() {
    let mut ppu = Ppu::new();
    let mut irqs = Interrupts::new();
    irqs.write_if(0);
    assert_eq!(ppu.frames(), 0);
    tick_until_vblank(&mut ppu, &mut irqs);
    assert_ne!(irqs.flags() & Interrupt::VBlank.bit(), 0);
    assert!(ppu.frame_ready());
    assert_eq!(ppu.frames(), 1);
    ppu.clear_frame_flag();
    assert!(!ppu.frame_ready());
}

#[test]
fn blank_vram_renders_lightest_shade() {
    let mut ppu = Ppu::new();
    let mut irqs = Interrupts::new();
    // BGP maps color 0 to shade 0.
    ppu.write_reg(0xFF47, 0xE4);
    tick_until_vblank(&mut ppu, &mut irqs);
    let frame = ppu.framebuffer();
    assert!(frame.iter().all(|&px| px == DEFAULT_PALETTE[0]));
    assert_eq!(frame.len(), SCREEN_WIDTH * 144);
}

#[test]
fn tile_data_reaches_framebuffer() {
    let mut ppu = Ppu::new();
    let mut irqs = Interrupts::new();
    ppu.write_reg(0xFF47, 0xE4);
    // Tile 0 row pixels all color 3; map entries default to tile 0.
    for row in 0..8u16 {
        ppu.write_vram(0x8000 + row * 2, 0xFF);
        ppu.write_vram(0x8001 + row * 2, 0xFF);
    }
    tick_until_vblank(&mut ppu, &mut irqs);
    let frame = ppu.framebuffer();
    assert_eq!(frame[0], DEFAULT_PALETTE[3]);
    assert_eq!(frame[SCREEN_WIDTH * 143 + 159], DEFAULT_PALETTE[3]);
}
