use std::io::{self, BufWriter, Stdout, Write};

use crossterm::{
    cursor, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{self, ClearType},
};
use log::warn;
use schip_core::{Beeper, DisplaySink, Frame};

use crate::color::Rgb;

/// Renders frames into the terminal, two pixel rows per text row.
///
/// Each cell is an upper half block: the foreground paints the top pixel and
/// the background paints the bottom one.
pub struct TerminalScreen {
    out: BufWriter<Stdout>,
    foreground: Color,
    background: Color,
    last_size: Option<(usize, usize)>,
    error: Option<io::Error>,
}

impl TerminalScreen {
    /// Switch to raw mode and the alternate screen. Dropping the screen
    /// restores the terminal.
    pub fn enter(foreground: Rgb, background: Rgb) -> io::Result<TerminalScreen> {
        terminal::enable_raw_mode()?;
        let mut out = BufWriter::new(io::stdout());
        queue!(
            out,
            terminal::EnterAlternateScreen,
            cursor::Hide,
            terminal::Clear(ClearType::All)
        )?;
        out.flush()?;

        Ok(TerminalScreen {
            out,
            foreground: foreground.into(),
            background: background.into(),
            last_size: None,
            error: None,
        })
    }

    /// First write error seen while presenting, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn draw(&mut self, frame: &Frame) -> io::Result<()> {
        if self.last_size != Some((frame.width, frame.height)) {
            queue!(self.out, ResetColor, terminal::Clear(ClearType::All))?;
            self.last_size = Some((frame.width, frame.height));
        }

        let mut colors = None;
        for y in (0..frame.height).step_by(2) {
            queue!(self.out, cursor::MoveTo(0, (y / 2) as u16))?;
            for x in 0..frame.width {
                let top = self.color(frame.pixel(x, y));
                let bottom = self.color(y + 1 < frame.height && frame.pixel(x, y + 1));
                if colors != Some((top, bottom)) {
                    queue!(self.out, SetForegroundColor(top), SetBackgroundColor(bottom))?;
                    colors = Some((top, bottom));
                }
                queue!(self.out, Print('\u{2580}'))?;
            }
        }

        queue!(self.out, ResetColor)?;
        self.out.flush()
    }

    fn color(&self, lit: bool) -> Color {
        if lit {
            self.foreground
        } else {
            self.background
        }
    }
}

impl DisplaySink for TerminalScreen {
    fn present(&mut self, frame: &Frame) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.draw(frame) {
            warn!("Failed to draw frame: {}", err);
            self.error = Some(err);
        }
    }
}

impl Drop for TerminalScreen {
    fn drop(&mut self) {
        let _ = queue!(
            self.out,
            ResetColor,
            cursor::Show,
            terminal::LeaveAlternateScreen
        );
        let _ = self.out.flush();
        let _ = terminal::disable_raw_mode();
    }
}

/// Rings the terminal bell.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Beeper for TerminalBell {
    fn beep(&self) {
        let mut out = io::stdout().lock();
        if let Err(err) = out.write_all(b"\x07").and_then(|_| out.flush()) {
            warn!("Failed to ring bell: {}", err);
        }
    }
}
