use dmg_emu_core::bus::Bus;
use dmg_emu_core::cartridge::Cartridge;
use dmg_emu_core::dma::{DMA_LENGTH, Dma};
use dmg_emu_core::interrupts::Interrupt;
use dmg_emu_core::joypad::Button;
use dmg_emu_core::mmu::Mmu;

#[test]
fn echo_ram_mirrors_every_wram_byte() {
    let mut mmu = Mmu::new();
    for addr in 0xC000u16..=0xDDFF {
        let val = (addr ^ (addr >> 8)) as u8;
        mmu.write_byte(addr, val);
        assert_eq!(mmu.read_byte(addr + 0x2000), val, "{addr:04X}");
    }
    for addr in 0xE000u16..=0xFDFF {
        let val = !(addr as u8);
        mmu.write_byte(addr, val);
        assert_eq!(mmu.read_byte(addr - 0x2000), val, "{addr:04X}");
    }
}

#[test]
fn word_access_is_little_endian() {
    let mut mmu = Mmu::new();
    mmu.write_word(0xC100, 0xBEEF);
    assert_eq!(mmu.read_byte(0xC100), 0xEF);
    assert_eq!(mmu.read_byte(0xC101), 0xBE);
    assert_eq!(mmu.read_word(0xC100), 0xBEEF);
}

#[test]
fn dma_controller_completes_after_162_ticks() {
    let source: Vec<u8> = (0..DMA_LENGTH).map(|i| i.wrapping_mul(7)).collect();
    let mut oam = [0u8; DMA_LENGTH as usize];
    let mut dma = Dma::new();
    dma.start(0xC0);

    for _ in 0..161 {
        if let Some((src, idx)) = dma.tick() {
            oam[idx as usize] = source[(src - 0xC000) as usize];
        }
    }
    assert!(dma.active());
    assert_ne!(&oam[..], &source[..]);

    if let Some((src, idx)) = dma.tick() {
        oam[idx as usize] = source[(src - 0xC000) as usize];
    }
    assert!(!dma.active());
    assert_eq!(&oam[..], &source[..]);
}

#[test]
fn dma_through_the_bus_fills_oam() {
    let mut mmu = Mmu::new();
    for i in 0..0xA0u16 {
        mmu.write_byte(0xC200 + i, 0xA0 - i as u8);
    }
    mmu.write_byte(0xFF46, 0xC2);
    mmu.tick(20);
    assert!(mmu.dma.active());
    assert_eq!(mmu.read_byte(0xFE10), 0xFF);
    mmu.tick(21);
    assert!(!mmu.dma.active());
    for i in 0..0xA0u16 {
        assert_eq!(mmu.read_byte(0xFE00 + i), 0xA0 - i as u8);
    }
}

#[test]
fn io_registers_read_with_unused_bits_set() {
    let mut mmu = Mmu::new();
    mmu.write_byte(0xFF0F, 0x00);
    assert_eq!(mmu.read_byte(0xFF0F), 0xE0);
    mmu.write_byte(0xFF07, 0x00);
    assert_eq!(mmu.read_byte(0xFF07), 0xF8);
    assert_eq!(mmu.read_byte(0xFF03), 0xFF);
    assert_eq!(mmu.read_byte(0xFF4C), 0xFF);
    assert_eq!(mmu.read_byte(0xFF02) & 0x7E, 0x7E);
}

#[test]
fn ly_is_read_only() {
    let mut mmu = Mmu::new();
    mmu.tick(200);
    let ly = mmu.read_byte(0xFF44);
    mmu.write_byte(0xFF44, 0x55);
    assert_eq!(mmu.read_byte(0xFF44), ly);
}

#[test]
fn joypad_reads_selected_group() {
    let mut mmu = Mmu::new();
    mmu.write_byte(0xFF0F, 0x00);
    mmu.press(Button::A);
    mmu.press(Button::Left);

    // Action buttons selected.
    mmu.write_byte(0xFF00, 0x10);
    assert_eq!(mmu.read_byte(0xFF00), 0xDE);
    // Directions selected.
    mmu.write_byte(0xFF00, 0x20);
    assert_eq!(mmu.read_byte(0xFF00), 0xED);
    // Nothing selected.
    mmu.write_byte(0xFF00, 0x30);
    assert_eq!(mmu.read_byte(0xFF00), 0xFF);

    mmu.release(Button::Left);
    mmu.write_byte(0xFF00, 0x20);
    mmu.press(Button::Up);
    assert_ne!(mmu.interrupt_flags() & Interrupt::Joypad.bit(), 0);
    assert_eq!(mmu.read_byte(0xFF00), 0xEB);
}

#[test]
fn cartridge_sees_rom_and_ram_ranges() {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0150] = 0x77;
    let mut mmu = Mmu::new();
    mmu.load_cart(Cartridge::from_bytes(rom).unwrap());
    assert_eq!(mmu.read_byte(0x0150), 0x77);
    mmu.write_byte(0xA010, 0x42);
    assert_eq!(mmu.read_byte(0xA010), 0x42);
}
