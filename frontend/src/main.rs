mod color;
mod input;
mod terminal;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, ensure, Context};
use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use schip_core::{Chip8Builder, Chip8Mode, SharedKeypad, Strategy, WrapPolicy};

use crate::{
    color::{Rgb, DEFAULT_BACKGROUND_COLOR, DEFAULT_FOREGROUND_COLOR},
    terminal::{TerminalBell, TerminalScreen},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// Original CHIP-8 instruction set
    Chip8,
    /// CHIP-8 plus the Super-CHIP extensions
    Schip,
}

impl From<Mode> for Chip8Mode {
    fn from(mode: Mode) -> Chip8Mode {
        match mode {
            Mode::Chip8 => Chip8Mode::Chip8,
            Mode::Schip => Chip8Mode::SuperChip,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Dispatch {
    /// Decode each opcode and match on it
    Interpreter,
    /// Jump straight through a table indexed by opcode
    Table,
}

impl From<Dispatch> for Strategy {
    fn from(dispatch: Dispatch) -> Strategy {
        match dispatch {
            Dispatch::Interpreter => Strategy::Interpreter,
            Dispatch::Table => Strategy::Table,
        }
    }
}

/// Super-CHIP Emulator
///
/// Keys 1234/qwer/asdf/zxcv map onto the hex keypad. Esc quits.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Filepath to Chip-8 ROM file that will be executed
    #[clap(index = 1)]
    rom: PathBuf,

    /// Filepath to an 80 byte font file
    #[clap(long)]
    font: Option<PathBuf>,

    /// Instruction set
    #[clap(long, value_enum, default_value_t = Mode::Schip)]
    mode: Mode,

    /// Dispatch strategy
    #[clap(long, value_enum, default_value_t = Dispatch::Table)]
    strategy: Dispatch,

    /// Clip sprites at the right edge instead of wrapping them
    #[clap(long)]
    clip: bool,

    /// Milliseconds to sleep between instructions
    #[clap(long, default_value_t = 16)]
    pacing_ms: u64,

    /// Milliseconds between timer ticks
    #[clap(long, default_value_t = 16)]
    timer_ms: u64,

    /// PRNG seed
    #[clap(long)]
    seed: Option<u64>,

    /// Foreground Color as HEX 0xAABBFF [default: 0xFFFFFF]
    #[clap(long)]
    foreground: Option<Rgb>,

    /// Background Color as HEX 0xAABBFF [default: 0x000000]
    #[clap(long)]
    background: Option<Rgb>,

    /// Log every instruction. Logs go to stderr, so redirect it
    #[clap(short, long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    ensure!(args.timer_ms > 0, "Timer period must be at least 1 ms");

    let rom = std::fs::read(&args.rom)
        .with_context(|| format!("Failed to read ROM file {}", args.rom.display()))?;
    info!("Read ROM {} [size: {}]", args.rom.display(), rom.len());

    let keypad = SharedKeypad::new();
    let mut builder = Chip8Builder::new()
        .with_rom(rom)
        .with_mode(args.mode.into())
        .with_strategy(args.strategy.into())
        .with_pacing(Duration::from_millis(args.pacing_ms))
        .with_timer_period(Duration::from_millis(args.timer_ms))
        .with_keypad(Arc::new(keypad.clone()))
        .with_debug(args.debug);

    if let Some(font) = &args.font {
        let font_data = std::fs::read(font)
            .with_context(|| format!("Failed to read font file {}", font.display()))?;
        builder = builder.with_font(font_data);
    }

    if let Some(seed) = args.seed {
        builder = builder.with_rng_seed(seed);
    }

    if args.clip {
        builder = builder.with_wrap(WrapPolicy::Clip);
    }

    let mut chip = builder.build().context("Failed to load program")?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut timers = chip
        .start_timers(Arc::new(TerminalBell))
        .context("Failed to start timers")?;

    let (result, screen_error, input_result) = {
        let mut screen = TerminalScreen::enter(
            args.foreground.unwrap_or(DEFAULT_FOREGROUND_COLOR),
            args.background.unwrap_or(DEFAULT_BACKGROUND_COLOR),
        )
        .context("Failed to set up terminal")?;
        let input = input::spawn(keypad.clone(), stop.clone()).context("Failed to spawn input thread")?;

        let result = chip.run(&mut screen, &stop);

        stop.store(true, Ordering::Release);
        keypad.close();
        let input_result = input
            .join()
            .map_err(|_| anyhow!("Input thread panicked"))?;

        (result, screen.take_error(), input_result)
    };
    timers.stop();

    input_result.context("Failed to read terminal input")?;
    if let Some(err) = screen_error {
        return Err(err).context("Failed to draw to terminal");
    }

    if let Err(err) = result {
        let fault = chip.fault().ok_or(err)?;
        error!("Machine halted: {}", fault);
        error!("Registers: {:02x?}", chip.state().registers());
        error!(
            "I: 0x{:03x} SP: {} Stack: {:03x?}",
            chip.state().index(),
            chip.state().sp(),
            chip.state().stack()
        );
        return Err(fault).context("Program halted");
    }

    info!("Stopped in {:?}", chip.run_state());
    Ok(())
}
