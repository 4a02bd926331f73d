//! Seams to the external PDF engine.

use super::geometry::{Bitmap, Rect};
use crate::error::Result;
use std::path::Path;

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    pub fn pixel_dims(&self, dpi: u32) -> (u32, u32) {
        let scale = dpi as f32 / 72.0;
        (
            (self.width * scale).ceil() as u32,
            (self.height * scale).ceil() as u32,
        )
    }
}

/// Plain text of a page. When present, `glyphs` holds one box per `char` of `text`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pub text: String,
    pub glyphs: Option<Vec<Rect>>,
}

impl PageText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            glyphs: None,
        }
    }
}

/// Rendering and text extraction for an open document.
pub trait PageRasterAdapter {
    fn page_count(&self) -> usize;

    fn page_size(&self, index: usize) -> Result<PageSize>;

    fn render_page(&self, index: usize, dpi: u32) -> Result<Bitmap>;

    fn extract_text(&self, index: usize) -> Result<PageText>;
}

/// Builds the output container from carried-through pages and page images.
pub trait PageAssembler {
    fn copy_page(&mut self, source_index: usize) -> Result<()>;

    fn add_image_page(&mut self, image: &Bitmap, dpi: u32, size: PageSize) -> Result<()>;

    fn save(&mut self, path: &Path) -> Result<()>;
}
