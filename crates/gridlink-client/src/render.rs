//! Rendering boundary.
//!
//! The engine hands a renderer nothing but level snapshots. [`TextSurface`] is
//! a plain-text renderer for terminals and logs.

use std::io::Write;

use gridlink_core::MAX_LEVEL;

/// Paints grid snapshots to some display surface.
pub trait RenderAdapter {
    /// Allocate one cell per grid position.
    fn paint(&mut self, columns: usize, rows: usize);

    /// Draw `levels` (row-major, one per cell).
    ///
    /// Must depend on `levels` only, so repeated calls draw the same picture.
    fn render(&mut self, levels: &[u8]);

    fn show(&mut self) {}

    fn hide(&mut self) {}
}

/// How a single cell should look.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shade {
    Off,
    /// Fraction of full brightness, in `(0, 1]`.
    Lit(f32),
}

impl Shade {
    pub fn from_level(level: u8) -> Self {
        if level == 0 {
            Self::Off
        } else {
            Self::Lit(f32::from(level.min(MAX_LEVEL)) / f32::from(MAX_LEVEL))
        }
    }
}

const RAMP: &[u8] = b".:-=+*%#@";

/// Renders the grid as text, one line per row.
///
/// Off cells print as `·`, lit cells pick a glyph from a brightness ramp.
pub struct TextSurface<W: Write> {
    out: W,
    columns: usize,
    rows: usize,
    visible: bool,
}

impl<W: Write> TextSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            columns: 0,
            rows: 0,
            visible: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn glyph(level: u8) -> char {
        match Shade::from_level(level) {
            Shade::Off => '·',
            Shade::Lit(intensity) => {
                let slot = ((intensity * RAMP.len() as f32).ceil() as usize).clamp(1, RAMP.len());
                RAMP[slot - 1] as char
            }
        }
    }

    /// Text for one frame, without writing it.
    pub fn frame(&self, levels: &[u8]) -> String {
        let mut text = String::with_capacity((self.columns + 1) * self.rows);
        for row in levels.chunks(self.columns.max(1)).take(self.rows) {
            text.extend(row.iter().map(|&l| Self::glyph(l)));
            text.push('\n');
        }
        text
    }
}

impl<W: Write> RenderAdapter for TextSurface<W> {
    fn paint(&mut self, columns: usize, rows: usize) {
        self.columns = columns;
        self.rows = rows;
    }

    fn render(&mut self, levels: &[u8]) {
        if !self.visible {
            return;
        }
        let frame = self.frame(levels);
        if let Err(e) = self
            .out
            .write_all(frame.as_bytes())
            .and_then(|_| writeln!(self.out))
            .and_then(|_| self.out.flush())
        {
            tracing::warn!(%e, "Failed to write grid frame");
        }
    }

    fn show(&mut self) {
        self.visible = true;
    }

    fn hide(&mut self) {
        self.visible = false;
    }
}
