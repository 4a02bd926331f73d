//! Plain-text export of a redacted document.
//!
//! Pages are separated by form feeds. Carried-through pages keep their text;
//! a rasterized page is written as a marker line, and its image as a binary
//! PPM when an image directory is set.

use super::adapter::{PageAssembler, PageRasterAdapter, PageSize};
use super::geometry::Bitmap;
use crate::error::{Result, ShieldError};
use crate::fsutil::write_atomic;
use crate::task::CancelToken;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PAGE_BREAK: char = '\x0c';

pub struct TextExportAssembler<'a> {
    source: &'a dyn PageRasterAdapter,
    image_dir: Option<PathBuf>,
    pages: Vec<String>,
}

impl<'a> TextExportAssembler<'a> {
    pub fn new(source: &'a dyn PageRasterAdapter) -> Self {
        Self {
            source,
            image_dir: None,
            pages: Vec::new(),
        }
    }

    /// Also write each rasterized page as `page-NNNN.ppm` under `dir`.
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    fn write_image(&self, dir: &Path, number: usize, image: &Bitmap) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| ShieldError::io(dir, e))?;
        let path = dir.join(format!("page-{number:04}.ppm"));
        write_atomic(&path, &encode_ppm(image), &CancelToken::never())?;
        debug!(path = %path.display(), "redacted page image written");
        Ok(path)
    }
}

impl PageAssembler for TextExportAssembler<'_> {
    fn copy_page(&mut self, source_index: usize) -> Result<()> {
        let text = self.source.extract_text(source_index)?.text;
        self.pages.push(text);
        Ok(())
    }

    fn add_image_page(&mut self, image: &Bitmap, dpi: u32, _size: PageSize) -> Result<()> {
        let number = self.pages.len() + 1;
        let mut marker = format!(
            "[page {number} redacted: {}x{} image at {dpi} dpi",
            image.width(),
            image.height()
        );
        if let Some(dir) = self.image_dir.clone() {
            let path = self.write_image(&dir, number, image)?;
            marker.push_str(&format!(", {}", path.display()));
        }
        marker.push(']');
        self.pages.push(marker);
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let separator = PAGE_BREAK.to_string();
        fs::write(path, self.pages.join(&separator)).map_err(|e| ShieldError::io(path, e))
    }
}

/// Binary PPM (P6); alpha is dropped.
pub fn encode_ppm(image: &Bitmap) -> Vec<u8> {
    let header = format!("P6\n{} {}\n255\n", image.width(), image.height());
    let mut out = Vec::with_capacity(header.len() + image.pixels().len() / 4 * 3);
    out.extend_from_slice(header.as_bytes());
    for px in image.pixels().chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redaction::{RedactionEngine, TextDocument};
    use crate::settings::HeuristicMetrics;
    use tempfile::tempdir;

    fn doc() -> TextDocument {
        TextDocument::new(["Patient: Jane Roe\nMRN 5521", "Discharged"])
            .with_page_size(PageSize {
                width: 160.0,
                height: 48.0,
            })
            .with_metrics(HeuristicMetrics {
                line_height: 12.0,
                char_width: 6.0,
                margin_left: 4.0,
                margin_top: 4.0,
            })
    }

    #[test]
    fn export_drops_text_of_redacted_pages() {
        let dir = tempdir().unwrap();
        let dst = dir.path().join("export.txt");
        let images = dir.path().join("pages");
        let source = doc();
        let outcome = RedactionEngine::default()
            .redact(Some(&source), "jane roe")
            .unwrap();

        let mut assembler = TextExportAssembler::new(&source).with_image_dir(&images);
        outcome
            .document
            .write_atomic(&mut assembler, &dst, &CancelToken::never())
            .unwrap();

        let saved = fs::read_to_string(&dst).unwrap();
        let pages: Vec<&str> = saved.split(PAGE_BREAK).collect();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].starts_with("[page 1 redacted"));
        assert!(!saved.contains("Jane Roe"));
        assert!(!saved.contains("MRN 5521"));
        assert_eq!(pages[1], "Discharged");

        let ppm = fs::read(images.join("page-0001.ppm")).unwrap();
        let (w, h) = PageSize {
            width: 160.0,
            height: 48.0,
        }
        .pixel_dims(300);
        let header = format!("P6\n{w} {h}\n255\n");
        assert!(ppm.starts_with(header.as_bytes()));
        assert_eq!(ppm.len(), header.len() + (w * h * 3) as usize);
    }

    #[test]
    fn ppm_keeps_rgb_channels() {
        let image = Bitmap::new(2, 1, [10, 20, 30, 255]);
        assert_eq!(encode_ppm(&image), b"P6\n2 1\n255\n\x0a\x14\x1e\x0a\x14\x1e".to_vec());
    }
}
