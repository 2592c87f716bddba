pub const SCREEN_WIDTH: usize = 64;
pub const SCREEN_HEIGHT: usize = 32;
pub const HIRES_SCREEN_WIDTH: usize = 128;
pub const HIRES_SCREEN_HEIGHT: usize = 64;

pub const PIXEL_ON: u8 = 0xFF;
pub const PIXEL_OFF: u8 = 0;

/// What happens to sprite pixels that run past the right edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WrapPolicy {
    /// Continue on the opposite edge
    #[default]
    Wrap,
    /// Drop pixels beyond the edge
    Clip,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Geometry {
    /// 64x32
    #[default]
    Standard,
    /// 128x64, Super-CHIP high resolution
    Extended,
}

impl Geometry {
    pub const fn width(self) -> usize {
        match self {
            Geometry::Standard => SCREEN_WIDTH,
            Geometry::Extended => HIRES_SCREEN_WIDTH,
        }
    }

    pub const fn height(self) -> usize {
        match self {
            Geometry::Standard => SCREEN_HEIGHT,
            Geometry::Extended => HIRES_SCREEN_HEIGHT,
        }
    }
}

/// A finished copy of the visible picture, handed to the renderer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    /// `width * height` bytes, row-major, each `PIXEL_ON` or `PIXEL_OFF`
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.pixels[y * self.width + x] != PIXEL_OFF
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.pixels.chunks_exact(self.width)
    }
}

/// Receives a frame each time the picture changes.
pub trait DisplaySink {
    fn present(&mut self, frame: &Frame);
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn present(&mut self, _frame: &Frame) {}
}

/// Monochrome framebuffer, one byte per pixel.
///
/// Storage is sized for the largest geometry. The active geometry decides the
/// stride, so pixel `(x, y)` lives at `y * width + x`.
#[derive(Clone, Debug)]
pub struct Display {
    buffer: Vec<u8>,
    geometry: Geometry,
    wrap: WrapPolicy,
}

impl Display {
    pub fn new(wrap: WrapPolicy) -> Display {
        Display {
            buffer: vec![PIXEL_OFF; HIRES_SCREEN_WIDTH * HIRES_SCREEN_HEIGHT],
            geometry: Geometry::Standard,
            wrap,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn width(&self) -> usize {
        self.geometry.width()
    }

    pub fn height(&self) -> usize {
        self.geometry.height()
    }

    pub fn wrap_policy(&self) -> WrapPolicy {
        self.wrap
    }

    /// Visible pixels of the active geometry.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.width() * self.height()]
    }

    pub fn pixel(&self, x: usize, y: usize) -> bool {
        self.buffer[y * self.width() + x] != PIXEL_OFF
    }

    pub fn frame(&self) -> Frame {
        Frame {
            width: self.width(),
            height: self.height(),
            pixels: self.buffer().to_vec(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.geometry = Geometry::Standard;
        self.clear();
    }

    /// Switching geometry always starts from a blank screen.
    pub(crate) fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.fill(PIXEL_OFF);
    }

    #[cfg(test)]
    pub(crate) fn fill(&mut self) {
        let len = self.width() * self.height();
        self.buffer[..len].fill(PIXEL_ON);
    }

    /// XOR a sprite onto the screen and report whether any lit pixel was
    /// turned off.
    ///
    /// `sprite` holds one byte per row, or two when `wide` is set (16 pixel
    /// rows). Bits are read MSB-first. The origin is reduced modulo the
    /// screen size, rows past the bottom always wrap to the top and columns
    /// past the right edge follow the wrap policy.
    pub(crate) fn draw(&mut self, x: u8, y: u8, sprite: &[u8], wide: bool) -> bool {
        let (width, height) = (self.width(), self.height());
        let (sprite_width, row_bytes) = if wide { (16, 2) } else { (8, 1) };

        let ox = x as usize % width;
        let oy = y as usize % height;

        let mut collision = false;

        for (row, data) in sprite.chunks_exact(row_bytes).enumerate() {
            let bits = if wide {
                u16::from_be_bytes([data[0], data[1]])
            } else {
                (data[0] as u16) << 8
            };

            let py = (oy + row) % height;

            for column in 0..sprite_width {
                if bits & (0x8000 >> column) == 0 {
                    continue;
                }

                let mut px = ox + column;
                if px >= width {
                    match self.wrap {
                        WrapPolicy::Wrap => px %= width,
                        WrapPolicy::Clip => break,
                    }
                }

                let pixel = &mut self.buffer[py * width + px];
                if *pixel != PIXEL_OFF {
                    collision = true;
                }
                *pixel ^= PIXEL_ON;
            }
        }

        collision
    }

    pub(crate) fn scroll_down(&mut self, rows: usize) {
        let (width, height) = (self.width(), self.height());
        if rows >= height {
            self.clear();
            return;
        }

        let visible = &mut self.buffer[..width * height];
        visible.copy_within(..(height - rows) * width, rows * width);
        visible[..rows * width].fill(PIXEL_OFF);
    }

    pub(crate) fn scroll_right(&mut self, columns: usize) {
        let (width, height) = (self.width(), self.height());
        let columns = columns.min(width);

        for line in self.buffer[..width * height].chunks_exact_mut(width) {
            line.copy_within(..width - columns, columns);
            line[..columns].fill(PIXEL_OFF);
        }
    }

    pub(crate) fn scroll_left(&mut self, columns: usize) {
        let (width, height) = (self.width(), self.height());
        let columns = columns.min(width);

        for line in self.buffer[..width * height].chunks_exact_mut(width) {
            line.copy_within(columns.., 0);
            line[width - columns..].fill(PIXEL_OFF);
        }
    }
}
