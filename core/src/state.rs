// Useful links:
// * [Guide to making a CHIP-8 emulator](https://tobiasvl.github.io/blog/write-a-chip-8-emulator/)
// * [Mastering SuperChip](https://github.com/JohnEarnest/Octo/blob/gh-pages/docs/SuperChip.md)

use log::info;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    display::{Display, WrapPolicy},
    error::Chip8Error,
    opcode::Opcode,
    timer::SharedTimers,
};

/// Addressable memory
pub const MEMORY_SIZE: usize = 0x1000;
/// Bytes past addressable memory holding the `0xFFFF` flow guard
pub const GUARD_SIZE: usize = 0x10;
pub const PROGRAM_START: u16 = 0x200;
pub const MAX_ROM_SIZE: usize = MEMORY_SIZE - PROGRAM_START as usize;
pub const STACK_DEPTH: usize = 16;

pub const FONT_ADDR: u16 = 0x000;
pub const FONT_GLYPH_SIZE: u16 = 5;
pub const BIG_FONT_ADDR: u16 = 0x050;
pub const BIG_FONT_GLYPH_SIZE: u16 = 10;
/// Super-CHIP RPL user flags
pub const RPL_FLAGS: usize = 8;

pub static DEFAULT_FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// 8x10 glyphs used by `FX30`
pub static BIG_FONT: [u8; 160] = [
    0x3C, 0x7E, 0xE7, 0xC3, 0xC3, 0xC3, 0xC3, 0xE7, 0x7E, 0x3C, // 0
    0x18, 0x38, 0x58, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, // 1
    0x3E, 0x7F, 0xC3, 0x06, 0x0C, 0x18, 0x30, 0x60, 0xFF, 0xFF, // 2
    0x3C, 0x7E, 0xC3, 0x03, 0x0E, 0x0E, 0x03, 0xC3, 0x7E, 0x3C, // 3
    0x06, 0x0E, 0x1E, 0x36, 0x66, 0xC6, 0xFF, 0xFF, 0x06, 0x06, // 4
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFE, 0x03, 0xC3, 0x7E, 0x3C, // 5
    0x3E, 0x7C, 0xE0, 0xC0, 0xFC, 0xFE, 0xC3, 0xC3, 0x7E, 0x3C, // 6
    0xFF, 0xFF, 0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x60, 0x60, // 7
    0x3C, 0x7E, 0xC3, 0xC3, 0x7E, 0x7E, 0xC3, 0xC3, 0x7E, 0x3C, // 8
    0x3C, 0x7E, 0xC3, 0xC3, 0x7F, 0x3F, 0x03, 0x03, 0x3E, 0x7C, // 9
    0x18, 0x3C, 0x66, 0xC3, 0xC3, 0xFF, 0xFF, 0xC3, 0xC3, 0xC3, // A
    0xFC, 0xFE, 0xC3, 0xC3, 0xFE, 0xFE, 0xC3, 0xC3, 0xFE, 0xFC, // B
    0x3C, 0x7E, 0xC3, 0xC0, 0xC0, 0xC0, 0xC0, 0xC3, 0x7E, 0x3C, // C
    0xFC, 0xFE, 0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0xC3, 0xFE, 0xFC, // D
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFC, 0xC0, 0xC0, 0xFF, 0xFF, // E
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFC, 0xC0, 0xC0, 0xC0, 0xC0, // F
];

/// Instruction set. Super-CHIP adds the scroll, resolution, 16x16 sprite,
/// big font and RPL flag instructions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Chip8Mode {
    Chip8,
    #[default]
    SuperChip,
}

/// Compatibility toggles for behaviour that differs between interpreters.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Quirks {
    /// 8XY6/8XYE: copy VY into VX before shifting (COSMAC VIP)
    pub shift_uses_vy: bool,
    /// BNNN: jump to XNN + VX instead of NNN + V0 (CHIP-48)
    pub jump_uses_vx: bool,
    /// FX55/FX65: advance I by X + 1 after the copy
    pub load_store_increment: bool,
    /// FX1E: keep I within 12 bits
    pub mask_index: bool,
}

impl Quirks {
    pub const fn for_mode(mode: Chip8Mode) -> Quirks {
        Quirks {
            shift_uses_vy: false,
            jump_uses_vx: false,
            load_store_increment: matches!(mode, Chip8Mode::SuperChip),
            mask_index: false,
        }
    }
}

impl Default for Quirks {
    fn default() -> Self {
        Quirks::for_mode(Chip8Mode::default())
    }
}

/// The complete machine: memory, registers, stack, timers and screen.
pub struct MachineState {
    /// General purpose registers
    pub(crate) regs: [u8; 16],
    /// Index register
    pub(crate) index: u16,
    /// Program counter
    pub(crate) pc: u16,
    /// Call stack
    pub(crate) stack: [u16; STACK_DEPTH],
    /// Stack pointer, number of pushed return addresses
    pub(crate) sp: u8,
    /// Delay and sound timers, shared with the timer thread
    pub(crate) timers: SharedTimers,
    /// Memory plus the guard region
    pub(crate) memory: Vec<u8>,
    pub(crate) display: Display,
    /// Super-CHIP RPL user flags
    pub(crate) rpl: [u8; RPL_FLAGS],
    pub(crate) mode: Chip8Mode,
    pub(crate) quirks: Quirks,
    pub(crate) rng: StdRng,
    font: [u8; 80],
}

impl MachineState {
    pub fn new(mode: Chip8Mode, quirks: Quirks, wrap: WrapPolicy, rng_seed: Option<u64>) -> MachineState {
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut state = MachineState {
            regs: [0u8; 16],
            index: 0,
            pc: PROGRAM_START,
            stack: [0u16; STACK_DEPTH],
            sp: 0,
            timers: SharedTimers::new(),
            memory: vec![0u8; MEMORY_SIZE + GUARD_SIZE],
            display: Display::new(wrap),
            rpl: [0u8; RPL_FLAGS],
            mode,
            quirks,
            rng,
            font: DEFAULT_FONT,
        };
        state.reset();
        state
    }

    /// Replace the hex font, takes effect on the next reset.
    pub fn set_font(&mut self, font: &[u8]) -> Result<(), Chip8Error> {
        self.font = font.try_into().map_err(|_| Chip8Error::InvalidFont {
            len: font.len(),
            expected: DEFAULT_FONT.len(),
        })?;
        Ok(())
    }

    /// Return to power-on state: everything zeroed, fonts reseeded, guard
    /// rewritten and `pc` at the program start. The timer pair is shared, so
    /// it is zeroed in place.
    pub fn reset(&mut self) {
        self.regs = [0; 16];
        self.index = 0;
        self.pc = PROGRAM_START;
        self.stack = [0; STACK_DEPTH];
        self.sp = 0;
        self.rpl = [0; RPL_FLAGS];
        self.timers.store(Default::default());
        self.display.reset();

        self.memory.fill(0);
        let font = FONT_ADDR as usize;
        self.memory[font..font + self.font.len()].copy_from_slice(&self.font);
        let big_font = BIG_FONT_ADDR as usize;
        self.memory[big_font..big_font + BIG_FONT.len()].copy_from_slice(&BIG_FONT);
        self.memory[MEMORY_SIZE..].fill(0xFF);
    }

    /// Reset, then copy `rom` to the program area.
    pub fn load_program(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
        if rom.is_empty() {
            return Err(Chip8Error::RomEmpty);
        }
        if rom.len() > MAX_ROM_SIZE {
            return Err(Chip8Error::RomTooLarge {
                size: rom.len(),
                max: MAX_ROM_SIZE,
            });
        }

        self.reset();
        let start = PROGRAM_START as usize;
        self.memory[start..start + rom.len()].copy_from_slice(rom);

        info!("Loaded ROM [size: {}]", rom.len());
        Ok(())
    }

    /// Big-endian fetch. Reads past the guard region come back as `0xFF`.
    pub fn fetch(&self, addr: u16) -> Opcode {
        let byte = |a: usize| self.memory.get(a).copied().unwrap_or(0xFF);
        let addr = addr as usize;
        Opcode::from_be_bytes([byte(addr), byte(addr + 1)])
    }

    /// Data read through the index register, wrapped to the 4 KiB window.
    pub(crate) fn read_u8(&self, addr: u16) -> u8 {
        self.memory[addr as usize % MEMORY_SIZE]
    }

    pub(crate) fn write_u8(&mut self, addr: u16, data: u8) {
        self.memory[addr as usize % MEMORY_SIZE] = data;
    }

    pub fn mode(&self) -> Chip8Mode {
        self.mode
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.regs[(reg & 0xF) as usize]
    }

    pub fn registers(&self) -> &[u8; 16] {
        &self.regs
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    /// Pushed return addresses, oldest first.
    pub fn stack(&self) -> &[u16] {
        &self.stack[..self.sp as usize]
    }

    /// Addressable memory, without the guard.
    pub fn memory(&self) -> &[u8] {
        &self.memory[..MEMORY_SIZE]
    }

    pub fn timers(&self) -> &SharedTimers {
        &self.timers
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn rpl_flags(&self) -> &[u8; RPL_FLAGS] {
        &self.rpl
    }
}
