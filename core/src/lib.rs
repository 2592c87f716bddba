//! CHIP-8 / Super-CHIP virtual machine.
//!
//! `Chip8Builder` assembles a machine from a ROM image and configuration.
//! `Chip8::step` runs one instruction, `Chip8::run` drives the machine
//! against a `DisplaySink` and a `Keypad`. The delay and sound timers tick on
//! their own thread through `TimerService`.

mod chip8;
mod dispatch;
mod display;
mod error;
mod instructions;
mod keypad;
mod opcode;
mod state;
mod timer;

pub use chip8::{Chip8, Chip8Builder, RunState, StepOutcome, Strategy, DEFAULT_PACING};
pub use dispatch::{DispatchTable, Entry};
pub use display::{
    Display, DisplaySink, Frame, Geometry, NullDisplay, WrapPolicy, HIRES_SCREEN_HEIGHT,
    HIRES_SCREEN_WIDTH, PIXEL_OFF, PIXEL_ON, SCREEN_HEIGHT, SCREEN_WIDTH,
};
pub use error::{Chip8Error, Fault};
pub use keypad::{Keypad, NullKeypad, SharedKeypad, KEY_COUNT};
pub use opcode::{Instruction, Mnemonic, Opcode};
pub use state::{
    Chip8Mode, MachineState, Quirks, BIG_FONT, DEFAULT_FONT, MAX_ROM_SIZE, MEMORY_SIZE,
    PROGRAM_START,
};
pub use timer::{Beeper, CountingBeeper, NullBeeper, SharedTimers, TimerPair, TimerService, TIMER_PERIOD};
