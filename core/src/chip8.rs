// CHIP-8 / Super-CHIP execution engine
//
// Useful links:
// * [Guide to making a CHIP-8 emulator](https://tobiasvl.github.io/blog/write-a-chip-8-emulator/)
// * [Building a CHIP-8 Emulator](https://austinmorlan.com/posts/chip8_emulator/)
// * [high-level assembler for the Chip8 virtual machine](https://github.com/JohnEarnest/Octo/blob/gh-pages/js/emulator.js)
//

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use log::{error, info, log, Level};

use crate::{
    dispatch::DispatchTable,
    display::{Display, DisplaySink, Frame, WrapPolicy},
    error::{Chip8Error, Fault},
    instructions::Effect,
    keypad::{Keypad, NullKeypad},
    opcode::{Instruction, Mnemonic, Opcode},
    state::{Chip8Mode, MachineState, Quirks},
    timer::{Beeper, SharedTimers, TimerService, TIMER_PERIOD},
};

/// Delay between instructions in `run`, about one instruction per 60 Hz frame
pub const DEFAULT_PACING: Duration = Duration::from_millis(16);

/// How opcodes are turned into handler calls. Both produce identical
/// state transitions.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Strategy {
    /// Decode into an `Instruction` and match on it
    Interpreter,
    /// Index a 65536-entry handler table by the raw opcode
    #[default]
    Table,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
    Running,
    /// Suspended in FX0A until a key is delivered for `register`
    AwaitingKey { register: u8 },
    Halted(Fault),
    /// Super-CHIP 00FD
    Exited,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    Continue,
    DisplayUpdated,
    AwaitingKey,
    Exited,
}

pub struct Chip8Builder {
    /// ROM
    rom: Option<Vec<u8>>,
    /// Font sprite
    font: Option<Vec<u8>>,
    // PRNG Seed
    rng_seed: Option<u64>,
    mode: Chip8Mode,
    /// Overrides the mode's default quirks
    quirks: Option<Quirks>,
    wrap: WrapPolicy,
    strategy: Strategy,
    pacing: Duration,
    timer_period: Duration,
    keypad: Option<Arc<dyn Keypad>>,
    /// Log every instruction at debug instead of trace level
    debug: bool,
}

pub struct Chip8 {
    state: MachineState,
    /// Present for `Strategy::Table`
    table: Option<DispatchTable>,
    run_state: RunState,
    keypad: Arc<dyn Keypad>,
    rom: Vec<u8>,
    pacing: Duration,
    timer_period: Duration,
    last_opcode: u16,
    debug: bool,
}

impl Default for Chip8Builder {
    fn default() -> Self {
        Chip8Builder::new()
    }
}

impl Chip8Builder {
    pub fn new() -> Chip8Builder {
        Chip8Builder {
            rom: None,
            font: None,
            rng_seed: None,
            mode: Chip8Mode::default(),
            quirks: None,
            wrap: WrapPolicy::default(),
            strategy: Strategy::default(),
            pacing: DEFAULT_PACING,
            timer_period: TIMER_PERIOD,
            keypad: None,
            debug: false,
        }
    }

    pub fn with_rom(mut self, rom: Vec<u8>) -> Self {
        self.rom = Some(rom);
        self
    }

    /// 80 byte hex font, 16 glyphs of 5 rows.
    pub fn with_font(mut self, font: Vec<u8>) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_mode(mut self, mode: Chip8Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = Some(quirks);
        self
    }

    pub fn with_wrap(mut self, wrap: WrapPolicy) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sleep between instructions in `run`, zero disables it.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_timer_period(mut self, period: Duration) -> Self {
        self.timer_period = period;
        self
    }

    pub fn with_keypad(mut self, keypad: Arc<dyn Keypad>) -> Self {
        self.keypad = Some(keypad);
        self
    }

    pub fn build(&self) -> Result<Chip8, Chip8Error> {
        let quirks = self.quirks.unwrap_or(Quirks::for_mode(self.mode));
        let mut state = MachineState::new(self.mode, quirks, self.wrap, self.rng_seed);

        if let Some(font) = &self.font {
            state.set_font(font)?;
        }

        let rom = self.rom.clone().unwrap_or_default();
        state.load_program(&rom)?;

        let table = match self.strategy {
            Strategy::Interpreter => None,
            Strategy::Table => Some(DispatchTable::new(self.mode)),
        };

        info!(
            "Built machine [mode: {:?}, strategy: {:?}, wrap: {:?}, quirks: {:?}]",
            self.mode, self.strategy, self.wrap, quirks
        );

        Ok(Chip8 {
            state,
            table,
            run_state: RunState::Running,
            keypad: self.keypad.clone().unwrap_or_else(|| Arc::new(NullKeypad)),
            rom,
            pacing: self.pacing,
            timer_period: self.timer_period,
            last_opcode: 0,
            debug: self.debug,
        })
    }
}

impl Chip8 {
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn display(&self) -> &Display {
        self.state.display()
    }

    /// Copy of the visible picture.
    pub fn frame(&self) -> Frame {
        self.state.display().frame()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn strategy(&self) -> Strategy {
        match self.table {
            Some(_) => Strategy::Table,
            None => Strategy::Interpreter,
        }
    }

    /// Diagnostics for the halt, if the machine halted.
    pub fn fault(&self) -> Option<Fault> {
        match self.run_state {
            RunState::Halted(fault) => Some(fault),
            _ => None,
        }
    }

    pub fn last_opcode(&self) -> u16 {
        self.last_opcode
    }

    /// Handle to the timer pair, for hosts driving their own timer thread.
    pub fn timers(&self) -> SharedTimers {
        self.state.timers().clone()
    }

    /// Start a thread ticking this machine's timers at the configured period.
    pub fn start_timers(&self, beeper: Arc<dyn Beeper>) -> io::Result<TimerService> {
        TimerService::spawn(self.timers(), self.timer_period, beeper)
    }

    /// Manual 60 Hz tick for hosts without a timer thread. Returns true on
    /// the tick the sound timer expires.
    pub fn step_timer(&mut self) -> bool {
        self.state.timers().tick()
    }

    /// Back to power-on state with the ROM reloaded.
    pub fn reset(&mut self) -> Result<(), Chip8Error> {
        self.state.load_program(&self.rom)?;
        self.run_state = RunState::Running;
        self.last_opcode = 0;
        Ok(())
    }

    /// Execute one instruction. Never blocks: while awaiting a key it
    /// returns `StepOutcome::AwaitingKey`, once halted it keeps returning
    /// the fault's error.
    pub fn step(&mut self) -> Result<StepOutcome, Chip8Error> {
        match self.run_state {
            RunState::Running => {}
            RunState::AwaitingKey { .. } => return Ok(StepOutcome::AwaitingKey),
            RunState::Halted(fault) => return Err(fault.error),
            RunState::Exited => return Ok(StepOutcome::Exited),
        }

        let pc = self.state.pc;
        let opcode = self.state.fetch(pc);
        self.last_opcode = opcode.raw();

        let result = match &self.table {
            Some(table) => {
                let entry = table.lookup(opcode);
                trace_instruction(self.debug, pc, opcode, entry.mnemonic);
                (entry.handler)(&mut self.state, opcode, self.keypad.as_ref())
            }
            None => {
                let ins = Instruction::decode(opcode, self.state.mode);
                trace_instruction(self.debug, pc, opcode, ins.mnemonic());
                self.state.execute(ins, self.keypad.as_ref())
            }
        };

        match result {
            Ok(Effect::Next) => Ok(StepOutcome::Continue),
            Ok(Effect::Redraw) => Ok(StepOutcome::DisplayUpdated),
            Ok(Effect::AwaitKey(register)) => {
                self.run_state = RunState::AwaitingKey { register };
                Ok(StepOutcome::AwaitingKey)
            }
            Ok(Effect::Exit) => {
                info!("Program exited [pc: 0x{:03x}]", pc);
                self.run_state = RunState::Exited;
                Ok(StepOutcome::Exited)
            }
            Err(err) => {
                let fault = Fault {
                    error: err,
                    opcode: opcode.raw(),
                    pc,
                };
                error!("Halted: {}", fault);
                self.run_state = RunState::Halted(fault);
                Err(err)
            }
        }
    }

    /// Complete a pending FX0A. Returns false if no key was awaited.
    pub fn resume_with_key(&mut self, key: u8) -> bool {
        match self.run_state {
            RunState::AwaitingKey { register } => {
                self.state.deliver_key(register, key);
                self.run_state = RunState::Running;
                true
            }
            _ => false,
        }
    }

    /// Drive the machine until it exits, halts, `stop` is raised or the
    /// keypad closes while a key is awaited.
    ///
    /// Frames go to `sink` after each instruction that changed the screen.
    /// Waiting for a key parks this thread on the keypad, the timer thread
    /// keeps running. `stop` is not seen while parked: a host stopping a run
    /// that may be waiting for a key must also close the keypad.
    pub fn run(&mut self, sink: &mut dyn DisplaySink, stop: &AtomicBool) -> Result<(), Chip8Error> {
        sink.present(&self.frame());

        while !stop.load(Ordering::Acquire) {
            match self.step()? {
                StepOutcome::Continue => {}
                StepOutcome::DisplayUpdated => sink.present(&self.frame()),
                StepOutcome::AwaitingKey if stop.load(Ordering::Acquire) => break,
                StepOutcome::AwaitingKey => match self.keypad.wait_for_any_key() {
                    Some(key) => {
                        self.resume_with_key(key);
                    }
                    None => {
                        info!("Keypad closed while waiting for a key");
                        return Ok(());
                    }
                },
                StepOutcome::Exited => return Ok(()),
            }

            if !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }
        }

        Ok(())
    }
}

fn trace_instruction(debug: bool, pc: u16, opcode: Opcode, mnemonic: Mnemonic) {
    let level = if debug { Level::Debug } else { Level::Trace };
    log!(level, "0x{:03x}: {} {}", pc, opcode, mnemonic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        display::{PIXEL_OFF, SCREEN_HEIGHT, SCREEN_WIDTH},
        keypad::SharedKeypad,
        timer::TimerPair,
    };

    fn assert_stack(chip: &Chip8, expected: &[u16]) {
        assert_eq!(chip.state.sp as usize, expected.len(), "Unexpected stack size");
        assert_eq!(chip.state.stack(), expected, "Unexpected stack content");
    }

    fn assert_regs(chip: &Chip8, non_zero_regs: &[(u8, u8)]) {
        for reg in 0..16u8 {
            let expected = non_zero_regs
                .iter()
                .find(|v| v.0 == reg)
                .map(|v| v.1)
                .unwrap_or(0);
            assert_eq!(
                chip.state.regs[reg as usize], expected,
                "Expected register 0x{:x} to contain 0x{:02x}",
                reg, expected
            );
        }
    }

    fn builder(rom: &[u8]) -> Chip8Builder {
        Chip8Builder::new()
            .with_rom(rom.to_vec())
            .with_rng_seed(310349960114u64)
            .with_strategy(Strategy::Interpreter)
            .with_pacing(Duration::ZERO)
            .with_debug(true)
    }

    fn setup(rom: &[u8]) -> Chip8 {
        builder(rom).build().unwrap()
    }

    fn setup_chip8(rom: &[u8]) -> Chip8 {
        builder(rom).with_mode(Chip8Mode::Chip8).build().unwrap()
    }

    #[derive(Default)]
    struct RecordingSink(Vec<Frame>);

    impl DisplaySink for RecordingSink {
        fn present(&mut self, frame: &Frame) {
            self.0.push(frame.clone());
        }
    }

    #[test]
    fn test_build_rejects_bad_rom() {
        let too_big = Chip8Builder::new().with_rom(vec![0; 3585]).build();
        assert!(matches!(too_big, Err(Chip8Error::RomTooLarge { size: 3585, .. })));

        let missing = Chip8Builder::new().build();
        assert!(matches!(missing, Err(Chip8Error::RomEmpty)));

        let bad_font = builder(&[0x00, 0xE0]).with_font(vec![0; 5]).build();
        assert!(matches!(bad_font, Err(Chip8Error::InvalidFont { len: 5, .. })));
    }

    #[test]
    fn test_timers() {
        // Arrange: Setup chip8 emulator
        let mut chip = setup(&[0x1F, 0xFF]);
        chip.state.timers.store(TimerPair::new(10, 1));

        // Act: Step timers
        let first = chip.step_timer();
        let second = chip.step_timer();

        // Assert: Timer state
        assert!(first);
        assert!(!second);
        assert_eq!(chip.state.timers.load(), TimerPair::new(8, 0));
    }

    #[test]
    fn test_clear_screen() {
        // Arrange: Setup chip8 emulator
        let mut chip = setup(&[0x00, 0xe0]);

        // Enable all pixels
        chip.state.display.fill();

        // Act: Step CPU Instruction
        let outcome = chip.step();

        // Assert: CPU State
        assert_eq!(outcome, Ok(StepOutcome::DisplayUpdated));
        assert_regs(&chip, &[]);
        assert_eq!(chip.state.index, 0);
        assert_eq!(chip.state.pc, 0x202);
        assert_stack(&chip, &[]);

        // Assert: Screen clear
        assert_eq!(chip.display().buffer().len(), SCREEN_WIDTH * SCREEN_HEIGHT);
        assert!(chip.display().buffer().iter().all(|&p| p == PIXEL_OFF));
    }

    #[test]
    fn test_jump() {
        // Arrange: Setup chip8 emulator
        let mut chip = setup(&[0x1A, 0xB1]);

        // Act: Step CPU Instruction
        chip.step().unwrap();

        // Assert: CPU State, odd targets are allowed
        assert_regs(&chip, &[]);
        assert_eq!(chip.state.pc, 0xAB1);
        assert_stack(&chip, &[]);
    }

    #[test]
    fn test_call_subroutine() {
        // Arrange: Setup chip8 emulator
        let mut chip = setup(&[0x2A, 0xBA]);

        // Act: Step CPU Instruction
        chip.step().unwrap();

        // Assert: Return address is the instruction after the call
        assert_regs(&chip, &[]);
        assert_eq!(chip.state.pc, 0x0ABA);
        assert_stack(&chip, &[0x202]);
    }

    #[test]
    fn test_call_then_return() {
        // Arrange: CALL 0x206, then RET at 0x206
        let mut chip = setup(&[0x22, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0xEE]);

        // Act
        chip.step().unwrap();
        chip.step().unwrap();

        // Assert
        assert_eq!(chip.state.pc, 0x202);
        assert_stack(&chip, &[]);
    }

    #[test]
    fn test_return_masks_address() {
        // Arrange
        let mut chip = setup(&[0x00, 0xEE]);
        chip.state.sp = 1;
        chip.state.stack[0] = 0xABBA;

        // Act
        chip.step().unwrap();

        // Assert
        assert_eq!(chip.state.pc, 0xBBA);
        assert_stack(&chip, &[]);
    }

    #[test]
    fn test_return_empty_stack() {
        // Arrange
        let mut chip = setup(&[0x00, 0xEE]);

        // Act
        let result = chip.step();

        // Assert: Halted, nothing moved
        assert_eq!(result, Err(Chip8Error::StackUnderflow { pc: 0x200 }));
        assert_eq!(chip.state.pc, 0x200);
        assert_eq!(
            chip.fault(),
            Some(Fault {
                error: Chip8Error::StackUnderflow { pc: 0x200 },
                opcode: 0x00EE,
                pc: 0x200
            })
        );
    }

    #[test]
    fn test_call_stack_overflow() {
        // Arrange: Stack already holds 16 return addresses
        let mut chip = setup(&[0x23, 0x00]);
        chip.state.sp = 16;
        chip.state.stack = [0x111; 16];

        // Act
        let result = chip.step();

        // Assert: State unmodified
        assert_eq!(result, Err(Chip8Error::StackOverflow { pc: 0x200 }));
        assert_eq!(chip.state.pc, 0x200);
        assert_eq!(chip.state.sp, 16);
        assert_eq!(chip.state.stack, [0x111; 16]);
        assert!(matches!(chip.run_state(), RunState::Halted(_)));
    }

    #[test]
    fn test_halt_is_sticky() {
        let mut chip = setup(&[0x51, 0x21, 0x60, 0x01]);

        let first = chip.step();
        let second = chip.step();

        assert_eq!(first, Err(Chip8Error::IllegalOpcode { opcode: 0x5121, pc: 0x200 }));
        assert_eq!(second, first);
        assert_eq!(chip.state.pc, 0x200);
        assert_regs(&chip, &[]);
    }

    #[test]
    fn test_skip_eq_immediate() {
        // Arrange: V0 == 0xAA is false, V1 == 0x00 is true
        let mut chip = setup(&[0x30, 0xAA, 0x31, 0x00]);

        // Act & Assert
        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x202);
        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x206);
    }

    #[test]
    fn test_skip_neq_immediate() {
        let mut chip = setup(&[0x40, 0x00, 0x00, 0x00, 0x40, 0x01]);

        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x202);

        chip.state.pc = 0x204;
        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x208);
    }

    #[test]
    fn test_skip_eq_reg() {
        // Arrange
        let mut chip = setup(&[0x51, 0x20]);
        chip.state.regs[0x1] = 0x42;
        chip.state.regs[0x2] = 0x42;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x1, 0x42), (0x2, 0x42)]);
        assert_eq!(chip.state.pc, 0x204);
    }

    #[test]
    fn test_skip_neq_reg() {
        // Arrange
        let mut chip = setup(&[0x91, 0x20]);
        chip.state.regs[0x1] = 0x42;
        chip.state.regs[0x2] = 0x43;

        // Act
        chip.step().unwrap();

        // Assert
        assert_eq!(chip.state.pc, 0x204);
    }

    #[test]
    fn test_skip_ignores_skipped_instruction() {
        // Arrange: The skipped word is illegal, it must never be decoded
        let mut chip = setup(&[0x30, 0x00, 0xFF, 0xFF, 0x60, 0x07]);

        // Act
        chip.step().unwrap();
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x0, 0x07)]);
        assert_eq!(chip.state.pc, 0x206);
    }

    #[test]
    fn test_skip_on_key() {
        // Arrange
        let keypad = SharedKeypad::new();
        let mut chip = builder(&[0xE1, 0x9E, 0x00, 0x00, 0xE1, 0xA1])
            .with_keypad(Arc::new(keypad.clone()))
            .build()
            .unwrap();
        chip.state.regs[0x1] = 0x1C; // only the low nibble selects the key
        keypad.press(0xC);

        // Act & Assert: SKP taken
        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x204);

        // Act & Assert: SKNP not taken
        chip.step().unwrap();
        assert_eq!(chip.state.pc, 0x206);
    }

    #[test]
    fn test_set_and_add_immediate() {
        // Arrange
        let mut chip = setup(&[0x6A, 0xF0, 0x7A, 0x20]);
        chip.state.regs[0xF] = 0x5;

        // Act
        chip.step().unwrap();
        chip.step().unwrap();

        // Assert: wraps, VF untouched
        assert_regs(&chip, &[(0xA, 0x10), (0xF, 0x5)]);
        assert_eq!(chip.state.pc, 0x204);
    }

    #[test]
    fn test_bitwise() {
        // Arrange: OR, AND, XOR into V1, V2, V3 from V0
        let mut chip = setup(&[0x81, 0x01, 0x82, 0x02, 0x83, 0x03, 0x84, 0x00]);
        chip.state.regs[0x0] = 0b1100;
        chip.state.regs[0x1] = 0b1010;
        chip.state.regs[0x2] = 0b1010;
        chip.state.regs[0x3] = 0b1010;

        // Act
        for _ in 0..4 {
            chip.step().unwrap();
        }

        // Assert
        assert_regs(
            &chip,
            &[(0x0, 0b1100), (0x1, 0b1110), (0x2, 0b1000), (0x3, 0b0110), (0x4, 0b1100)],
        );
    }

    #[test]
    fn test_add_reg_carry() {
        // Arrange
        let mut chip = setup(&[0x81, 0x24]);
        chip.state.regs[0x1] = 0xFF;
        chip.state.regs[0x2] = 0x02;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x1, 0x01), (0x2, 0x02), (0xF, 0x1)]);
    }

    #[test]
    fn test_sub_reg_no_borrow_when_equal() {
        // Arrange
        let mut chip = setup(&[0x81, 0x25]);
        chip.state.regs[0x1] = 0x33;
        chip.state.regs[0x2] = 0x33;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x2, 0x33), (0xF, 0x1)]);
    }

    #[test]
    fn test_sub_reg_borrow() {
        // Arrange
        let mut chip = setup(&[0x81, 0x25]);
        chip.state.regs[0x1] = 0x01;
        chip.state.regs[0x2] = 0x02;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x1, 0xFF), (0x2, 0x02)]);
    }

    #[test]
    fn test_subn() {
        // Arrange
        let mut chip = setup(&[0x81, 0x27, 0x83, 0x47]);
        chip.state.regs[0x1] = 0x10;
        chip.state.regs[0x2] = 0x30;
        chip.state.regs[0x3] = 0x05;
        chip.state.regs[0x4] = 0x01;

        // Act & Assert: 0x30 - 0x10, no borrow
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0x1], 0x20);
        assert_eq!(chip.state.regs[0xF], 1);

        // Act & Assert: 0x01 - 0x05, borrow
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0x3], 0xFC);
        assert_eq!(chip.state.regs[0xF], 0);
    }

    #[test]
    fn test_shr() {
        // Arrange
        let mut chip = setup(&[0x81, 0x26]);
        chip.state.regs[0x1] = 0x05;
        chip.state.regs[0x2] = 0xF0;

        // Act
        chip.step().unwrap();

        // Assert: VY ignored, VF gets bit 0
        assert_regs(&chip, &[(0x1, 0x02), (0x2, 0xF0), (0xF, 0x1)]);
    }

    #[test]
    fn test_shl() {
        // Arrange
        let mut chip = setup(&[0x81, 0x2E]);
        chip.state.regs[0x1] = 0x81;

        // Act
        chip.step().unwrap();

        // Assert: VF gets bit 7
        assert_regs(&chip, &[(0x1, 0x02), (0xF, 0x1)]);
    }

    #[test]
    fn test_shift_uses_vy_quirk() {
        // Arrange
        let quirks = Quirks {
            shift_uses_vy: true,
            ..Quirks::default()
        };
        let mut chip = builder(&[0x81, 0x26]).with_quirks(quirks).build().unwrap();
        chip.state.regs[0x1] = 0x44;
        chip.state.regs[0x2] = 0xFF;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x1, 0x7F), (0x2, 0xFF), (0xF, 0x1)]);
    }

    #[test]
    fn test_vf_as_destination_keeps_flag() {
        // Arrange: ADD VF, V1 and SUB VF, V1
        let mut chip = setup(&[0x8F, 0x14, 0x8F, 0x15]);
        chip.state.regs[0xF] = 0xF0;
        chip.state.regs[0x1] = 0x20;

        // Act & Assert: sum 0x10 is overwritten by carry 1
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0xF], 1);

        // Act & Assert: 1 - 0x20 borrows, flag 0 wins
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0xF], 0);
    }

    #[test]
    fn test_vf_as_source() {
        // Arrange: ADD V1, VF
        let mut chip = setup(&[0x81, 0xF4]);
        chip.state.regs[0x1] = 0x10;
        chip.state.regs[0xF] = 0x01;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x1, 0x11), (0xF, 0x0)]);
    }

    #[test]
    fn test_set_index() {
        let mut chip = setup(&[0xAF, 0xED]);

        chip.step().unwrap();

        assert_eq!(chip.state.index, 0xFED);
        assert_eq!(chip.state.pc, 0x202);
    }

    #[test]
    fn test_jmp_with_offset() {
        // Arrange
        let mut chip = setup(&[0xBF, 0xF0]);
        chip.state.regs[0x0] = 0x20;

        // Act
        chip.step().unwrap();

        // Assert: 0xFF0 + 0x20 wraps within 12 bits
        assert_eq!(chip.state.pc, 0x010);
    }

    #[test]
    fn test_jmp_with_offset_quirk() {
        // Arrange
        let quirks = Quirks {
            jump_uses_vx: true,
            ..Quirks::default()
        };
        let mut chip = builder(&[0xB4, 0x00]).with_quirks(quirks).build().unwrap();
        chip.state.regs[0x4] = 0xF0;
        chip.state.regs[0x0] = 0x01;

        // Act
        chip.step().unwrap();

        // Assert
        assert_eq!(chip.state.pc, 0x04F0);
    }

    #[test]
    fn test_rng() {
        // Arrange: Same seed on two machines
        let rom = [0xC0, 0xFF, 0xC1, 0x0F, 0xC2, 0x00];
        let mut a = setup(&rom);
        let mut b = setup(&rom);

        // Act
        for _ in 0..3 {
            a.step().unwrap();
            b.step().unwrap();
        }

        // Assert: deterministic and masked
        assert_eq!(a.state.regs, b.state.regs);
        assert_eq!(a.state.regs[0x1] & 0xF0, 0);
        assert_eq!(a.state.regs[0x2], 0);
        assert_eq!(a.state.pc, 0x206);
    }

    #[test]
    fn test_draw_font_glyph() {
        // Arrange: V0 = 0xA, LD F, V0 then DRW V1, V1, 5
        let mut chip = setup(&[0x60, 0x0A, 0xF0, 0x29, 0xD1, 0x15]);

        // Act
        chip.step().unwrap();
        chip.step().unwrap();
        let outcome = chip.step().unwrap();

        // Assert
        assert_eq!(outcome, StepOutcome::DisplayUpdated);
        assert_eq!(chip.state.index, 0xA * 5);
        assert_eq!(chip.state.regs[0xF], 0);
        let frame = chip.frame();
        // Top row of "A" is 0xF0
        assert!((0..4).all(|x| frame.pixel(x, 0)));
        assert!(!frame.pixel(4, 0));
        // Second row of "A" is 0x90
        assert!(frame.pixel(0, 1) && !frame.pixel(1, 1) && frame.pixel(3, 1));
    }

    #[test]
    fn test_draw_collision() {
        // Arrange: the same sprite drawn twice
        let mut chip = setup(&[0xA2, 0x08, 0xD0, 0x01, 0xD0, 0x01, 0x00, 0x00, 0xFF]);

        // Act & Assert
        chip.step().unwrap();
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0xF], 0);
        chip.step().unwrap();
        assert_eq!(chip.state.regs[0xF], 1);
        assert!(chip.display().buffer().iter().all(|&p| p == PIXEL_OFF));
    }

    #[test]
    fn test_draw_zero_rows_in_chip8_mode() {
        let mut chip = setup_chip8(&[0xD0, 0x00]);
        chip.state.regs[0xF] = 1;

        chip.step().unwrap();

        assert_eq!(chip.state.regs[0xF], 0);
        assert!(chip.display().buffer().iter().all(|&p| p == PIXEL_OFF));
    }

    #[test]
    fn test_draw_wide_sprite() {
        // Arrange: 32 bytes of 0xFF at 0x300
        let mut rom = vec![0x00, 0xFF, 0xA3, 0x00, 0xD0, 0x10];
        rom.resize(0x100, 0);
        rom.extend_from_slice(&[0xFF; 32]);
        let mut chip = setup(&rom);

        // Act
        for _ in 0..3 {
            chip.step().unwrap();
        }

        // Assert: 16x16 block lit on the 128x64 screen
        let frame = chip.frame();
        assert_eq!((frame.width, frame.height), (128, 64));
        assert_eq!(frame.pixels.iter().filter(|&&p| p != PIXEL_OFF).count(), 256);
        assert!(frame.pixel(15, 15));
        assert!(!frame.pixel(16, 0));
    }

    #[test]
    fn test_timer_instructions() {
        // Arrange: V1 = 0x30, LD DT, V1, LD ST, V1, LD V2, DT
        let mut chip = setup(&[0x61, 0x30, 0xF1, 0x15, 0xF1, 0x18, 0xF2, 0x07]);

        // Act
        chip.step().unwrap();
        chip.step().unwrap();
        chip.step().unwrap();
        chip.step_timer();
        chip.step().unwrap();

        // Assert
        assert_eq!(chip.state.timers.load(), TimerPair::new(0x2F, 0x2F));
        assert_regs(&chip, &[(0x1, 0x30), (0x2, 0x2F)]);
    }

    #[test]
    fn test_get_key_suspends_and_resumes() {
        // Arrange
        let mut chip = setup(&[0xF5, 0x0A, 0x60, 0x01]);

        // Act: Suspend
        assert_eq!(chip.step(), Ok(StepOutcome::AwaitingKey));
        assert_eq!(chip.step(), Ok(StepOutcome::AwaitingKey));

        // Assert: Nothing moved while waiting
        assert_eq!(chip.run_state(), RunState::AwaitingKey { register: 5 });
        assert_eq!(chip.state.pc, 0x200);

        // Act: Deliver key
        assert!(chip.resume_with_key(0xB));
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x0, 0x01), (0x5, 0xB)]);
        assert_eq!(chip.state.pc, 0x204);
        assert!(!chip.resume_with_key(0x1));
    }

    #[test]
    fn test_add_index_not_masked() {
        // Arrange
        let mut chip = setup(&[0xF1, 0x1E]);
        chip.state.index = 0xFFF;
        chip.state.regs[0x1] = 0x02;

        // Act
        chip.step().unwrap();

        // Assert: VF untouched, no 12-bit mask
        assert_eq!(chip.state.index, 0x1001);
        assert_regs(&chip, &[(0x1, 0x02)]);
    }

    #[test]
    fn test_add_index_masked_quirk() {
        let quirks = Quirks {
            mask_index: true,
            ..Quirks::default()
        };
        let mut chip = builder(&[0xF1, 0x1E]).with_quirks(quirks).build().unwrap();
        chip.state.index = 0xFFF;
        chip.state.regs[0x1] = 0x02;

        chip.step().unwrap();

        assert_eq!(chip.state.index, 0x001);
    }

    #[test]
    fn test_store_bcd() {
        // Arrange
        let mut chip = setup(&[0xF3, 0x33]);
        chip.state.index = 0x300;
        chip.state.regs[0x3] = 209;

        // Act
        chip.step().unwrap();

        // Assert
        assert_eq!(&chip.state.memory()[0x300..0x303], &[2, 0, 9]);
        assert_eq!(chip.state.index, 0x300);
    }

    #[test]
    fn test_store_super_chip_increments_index() {
        // Arrange
        let mut chip = setup(&[0xFF, 0x55]);
        chip.state.index = 0x400;
        chip.state.regs[0x2] = 0x22;
        chip.state.regs[0xA] = 0xAA;
        chip.state.regs[0xF] = 0xFF;

        // Act
        chip.step().unwrap();

        // Assert
        assert_regs(&chip, &[(0x2, 0x22), (0xA, 0xAA), (0xF, 0xFF)]);
        assert_eq!(chip.state.index, 0x410);
        assert_eq!(chip.state.memory()[0x402], 0x22);
        assert_eq!(chip.state.memory()[0x40A], 0xAA);
        assert_eq!(chip.state.memory()[0x40F], 0xFF);
    }

    #[test]
    fn test_load_chip8_keeps_index() {
        // Arrange
        let mut chip = setup_chip8(&[0xF4, 0x65]);
        chip.state.index = 0x400;
        chip.state.memory[0x401] = 0x11;
        chip.state.memory[0x404] = 0x44;
        chip.state.memory[0x405] = 0x55;

        // Act
        chip.step().unwrap();

        // Assert: V5 beyond X stays zero
        assert_regs(&chip, &[(0x1, 0x11), (0x4, 0x44)]);
        assert_eq!(chip.state.index, 0x400);
    }

    #[test]
    fn test_big_font_and_rpl_flags() {
        // Arrange: V0 = 7, LD HF, V0, then save V0..V2 to RPL, clear, restore
        let mut chip = setup(&[
            0x60, 0x07, 0x61, 0x11, 0x62, 0x22, 0xF0, 0x30, 0xF2, 0x75, 0x60, 0x00, 0xF1, 0x85,
        ]);

        // Act
        for _ in 0..7 {
            chip.step().unwrap();
        }

        // Assert
        assert_eq!(chip.state.index, 80 + 7 * 10);
        assert_eq!(&chip.state.rpl_flags()[..3], &[0x07, 0x11, 0x22]);
        assert_regs(&chip, &[(0x0, 0x07), (0x1, 0x11), (0x2, 0x22)]);
    }

    #[test]
    fn test_super_chip_opcodes_illegal_in_chip8_mode() {
        let mut chip = setup_chip8(&[0x00, 0xFF]);

        assert_eq!(
            chip.step(),
            Err(Chip8Error::IllegalOpcode { opcode: 0x00FF, pc: 0x200 })
        );
    }

    #[test]
    fn test_exit() {
        let mut chip = setup(&[0x00, 0xFD]);

        assert_eq!(chip.step(), Ok(StepOutcome::Exited));
        assert_eq!(chip.step(), Ok(StepOutcome::Exited));
        assert_eq!(chip.run_state(), RunState::Exited);
    }

    #[test]
    fn test_flow_guard_after_last_word() {
        // Arrange: JP 0xFFE, the last word of memory holds LD V0, 0x01
        let mut rom = vec![0u8; 0xE00];
        rom[0] = 0x1F;
        rom[1] = 0xFE;
        rom[0xDFE] = 0x60;
        rom[0xDFF] = 0x01;
        let mut chip = setup(&rom);

        // Act
        chip.step().unwrap();
        chip.step().unwrap();
        let result = chip.step();

        // Assert
        assert_eq!(result, Err(Chip8Error::InstructionFlowGuard { pc: 0x1000 }));
        assert_eq!(chip.fault().map(|f| f.opcode), Some(0xFFFF));
        assert_eq!(chip.last_opcode(), 0xFFFF);
    }

    #[test]
    fn test_ffff_inside_memory_is_illegal() {
        let mut chip = setup(&[0xFF, 0xFF]);

        assert_eq!(
            chip.step(),
            Err(Chip8Error::IllegalOpcode { opcode: 0xFFFF, pc: 0x200 })
        );
    }

    #[test]
    fn test_reset_reloads_rom() {
        let mut chip = setup(&[0x60, 0x42, 0x00, 0xEE]);
        chip.step().unwrap();
        let _ = chip.step();

        chip.reset().unwrap();

        assert_eq!(chip.run_state(), RunState::Running);
        assert_regs(&chip, &[]);
        assert_eq!(chip.state.pc, 0x200);
        assert_eq!(chip.state.fetch(0x200).raw(), 0x6042);
    }

    #[test]
    fn test_run_presents_frames_until_exit() {
        // Arrange: CLS, DRW V0, V0, 1, EXIT
        let mut chip = setup(&[0x00, 0xE0, 0xD0, 0x01, 0x00, 0xFD]);
        let mut sink = RecordingSink::default();
        let stop = AtomicBool::new(false);

        // Act
        let result = chip.run(&mut sink, &stop);

        // Assert: initial frame plus one per display update
        assert_eq!(result, Ok(()));
        assert_eq!(sink.0.len(), 3);
        assert_eq!(chip.run_state(), RunState::Exited);
    }

    #[test]
    fn test_run_surfaces_fault() {
        let mut chip = setup(&[0x00, 0xEE]);
        let stop = AtomicBool::new(false);

        let result = chip.run(&mut crate::display::NullDisplay, &stop);

        assert_eq!(result, Err(Chip8Error::StackUnderflow { pc: 0x200 }));
    }

    #[test]
    fn test_run_stops_when_keypad_closes() {
        // Arrange: LD V0, K with a keypad that never delivers
        let keypad = SharedKeypad::new();
        keypad.close();
        let mut chip = builder(&[0xF0, 0x0A])
            .with_keypad(Arc::new(keypad))
            .build()
            .unwrap();
        let stop = AtomicBool::new(false);

        // Act
        let result = chip.run(&mut crate::display::NullDisplay, &stop);

        // Assert
        assert_eq!(result, Ok(()));
        assert_eq!(chip.run_state(), RunState::AwaitingKey { register: 0 });
    }

    #[test]
    fn test_run_ignores_released_key() {
        // Arrange: LD V0, K then EXIT, with a key tapped and released beforehand
        let keypad = SharedKeypad::new();
        keypad.press(0x5);
        keypad.release(0x5);
        let mut chip = builder(&[0xF0, 0x0A, 0x00, 0xFD])
            .with_keypad(Arc::new(keypad.clone()))
            .build()
            .unwrap();
        let stop = AtomicBool::new(false);

        // Act: Host shuts down after a while without pressing anything
        let result = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                stop.store(true, Ordering::Release);
                keypad.close();
            });
            chip.run(&mut crate::display::NullDisplay, &stop)
        });

        // Assert
        assert_eq!(result, Ok(()));
        assert_eq!(chip.run_state(), RunState::AwaitingKey { register: 0 });
        assert_eq!(chip.state.regs[0x0], 0);
        assert_eq!(chip.state.pc, 0x200);
    }

    #[test]
    fn test_run_resumes_on_key() {
        // Arrange: LD V3, K then EXIT
        let keypad = SharedKeypad::new();
        keypad.press(0x9);
        let mut chip = builder(&[0xF3, 0x0A, 0x00, 0xFD])
            .with_keypad(Arc::new(keypad))
            .build()
            .unwrap();
        let stop = AtomicBool::new(false);

        // Act
        chip.run(&mut crate::display::NullDisplay, &stop).unwrap();

        // Assert
        assert_eq!(chip.state.regs[0x3], 0x9);
        assert_eq!(chip.run_state(), RunState::Exited);
    }

    fn assert_same_state(a: &Chip8, b: &Chip8, context: &str) {
        assert_eq!(a.state.pc, b.state.pc, "pc differs for {}", context);
        assert_eq!(a.state.index, b.state.index, "index differs for {}", context);
        assert_eq!(a.state.regs, b.state.regs, "registers differ for {}", context);
        assert_eq!(a.state.stack(), b.state.stack(), "stack differs for {}", context);
        assert_eq!(a.state.rpl, b.state.rpl, "flags differ for {}", context);
        assert_eq!(a.state.timers.load(), b.state.timers.load(), "timers differ for {}", context);
        assert_eq!(a.state.memory(), b.state.memory(), "memory differs for {}", context);
        assert_eq!(a.frame(), b.frame(), "display differs for {}", context);
        assert_eq!(a.run_state, b.run_state, "run state differs for {}", context);
    }

    #[test]
    fn test_strategies_agree_on_every_opcode() {
        let keypad = SharedKeypad::new();
        keypad.press(0x3);
        keypad.press(0xA);

        for mode in [Chip8Mode::Chip8, Chip8Mode::SuperChip] {
            let make = |strategy| {
                builder(&[0x00, 0xE0])
                    .with_mode(mode)
                    .with_strategy(strategy)
                    .with_keypad(Arc::new(keypad.clone()))
                    .with_debug(false)
                    .build()
                    .unwrap()
            };
            let mut interp = make(Strategy::Interpreter);
            let mut table = make(Strategy::Table);

            for raw in 0..=u16::MAX {
                let context = format!("0x{:04x} in {:?}", raw, mode);

                for chip in [&mut interp, &mut table] {
                    chip.rom = raw.to_be_bytes().to_vec();
                    chip.reset().unwrap();
                    for (i, reg) in chip.state.regs.iter_mut().enumerate() {
                        *reg = (i as u8).wrapping_mul(0x1D) ^ 0xA3;
                    }
                    chip.state.index = 0x3F0;
                    chip.state.sp = 2;
                    chip.state.stack[..2].copy_from_slice(&[0x2A4, 0x3B6]);
                    chip.state.rpl = [9, 8, 7, 6, 5, 4, 3, 2];
                    chip.state.timers.store(TimerPair::new(0x40, 0x20));
                }

                let a = interp.step();
                let b = table.step();

                assert_eq!(a, b, "outcome differs for {}", context);
                assert_same_state(&interp, &table, &context);
            }
        }
    }

    #[test]
    fn test_strategies_agree_on_program() {
        // Counts V0 down from 5 drawing a glyph each pass, then falls into RET with an empty stack
        let rom = [
            0x60, 0x05, // LD V0, 5
            0x22, 0x08, // CALL 0x208
            0x30, 0x00, // SE V0, 0
            0x12, 0x02, // JP 0x202
            0xF0, 0x29, // LD F, V0
            0xD1, 0x25, // DRW V1, V2, 5
            0x71, 0x05, // ADD V1, 5
            0xC3, 0x7F, // RND V3, 0x7F
            0x70, 0xFF, // ADD V0, 0xFF
            0x00, 0xEE, // RET
        ];
        let mut interp = builder(&rom).with_strategy(Strategy::Interpreter).build().unwrap();
        let mut table = builder(&rom).with_strategy(Strategy::Table).build().unwrap();

        for n in 0..200 {
            let a = interp.step();
            let b = table.step();
            assert_eq!(a, b, "outcome differs at step {}", n);
            assert_same_state(&interp, &table, &format!("step {}", n));
            if a.is_err() {
                break;
            }
        }
    }

    #[test]
    fn test_run_honours_stop_flag() {
        let mut chip = setup(&[0x12, 0x00]);
        let stop = AtomicBool::new(true);

        chip.run(&mut crate::display::NullDisplay, &stop).unwrap();

        assert_eq!(chip.state.pc, 0x200);
        assert_eq!(chip.run_state(), RunState::Running);
    }
}
