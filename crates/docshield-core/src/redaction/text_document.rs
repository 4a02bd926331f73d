//! In-memory fixed-pitch document, for previews and tests.

use super::adapter::{PageRasterAdapter, PageSize, PageText};
use super::geometry::{Bitmap, Rect};
use crate::error::{Result, ShieldError};
use crate::settings::HeuristicMetrics;

pub const PAPER: [u8; 4] = [255, 255, 255, 255];
pub const INK: [u8; 4] = [40, 40, 40, 255];

/// Pages of monospaced text laid out with [`HeuristicMetrics`].
/// Each visible character renders as a solid ink block.
#[derive(Debug, Clone)]
pub struct TextDocument {
    pages: Vec<String>,
    size: PageSize,
    metrics: HeuristicMetrics,
    expose_glyphs: bool,
}

impl TextDocument {
    pub fn new<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pages: pages.into_iter().map(Into::into).collect(),
            size: PageSize::LETTER,
            metrics: HeuristicMetrics::default(),
            expose_glyphs: true,
        }
    }

    pub fn with_page_size(mut self, size: PageSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_metrics(mut self, metrics: HeuristicMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Whether `extract_text` reports glyph boxes.
    pub fn with_glyphs(mut self, expose: bool) -> Self {
        self.expose_glyphs = expose;
        self
    }

    fn text(&self, index: usize) -> Result<&str> {
        self.pages
            .get(index)
            .map(String::as_str)
            .ok_or(ShieldError::PageOutOfRange {
                index,
                count: self.pages.len(),
            })
    }

    /// Glyph box of every char, newlines included.
    pub fn glyph_boxes(&self, index: usize) -> Result<Vec<Rect>> {
        let m = &self.metrics;
        let (mut line, mut col) = (0usize, 0usize);
        let mut boxes = Vec::new();
        for c in self.text(index)?.chars() {
            boxes.push(Rect::new(
                m.margin_left + col as f32 * m.char_width,
                m.margin_top + line as f32 * m.line_height,
                m.char_width,
                m.line_height,
            ));
            match c {
                '\n' => {
                    line += 1;
                    col = 0;
                }
                '\r' => {}
                _ => col += 1,
            }
        }
        Ok(boxes)
    }
}

impl PageRasterAdapter for TextDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize> {
        self.text(index)?;
        Ok(self.size)
    }

    fn render_page(&self, index: usize, dpi: u32) -> Result<Bitmap> {
        let text = self.text(index)?;
        let (w, h) = self.size.pixel_dims(dpi);
        let mut bitmap = Bitmap::new(w, h, PAPER);
        let scale = dpi as f32 / 72.0;
        for (c, glyph) in text.chars().zip(self.glyph_boxes(index)?) {
            if c.is_whitespace() {
                continue;
            }
            if let Some(px) = glyph.to_pixels(scale, scale, w, h) {
                bitmap.fill_rect(&px, INK);
            }
        }
        Ok(bitmap)
    }

    fn extract_text(&self, index: usize) -> Result<PageText> {
        let text = self.text(index)?.to_string();
        let glyphs = if self.expose_glyphs {
            Some(self.glyph_boxes(index)?)
        } else {
            None
        };
        Ok(PageText { text, glyphs })
    }
}
