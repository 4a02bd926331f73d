use super::adapter::{PageAssembler, PageRasterAdapter, PageSize, PageText};
use super::geometry::Bitmap;
use super::search::{find_matches, locate_spans, RedactionTarget};
use crate::error::{Result, ShieldError};
use crate::fsutil::persist_atomic;
use crate::settings::{HeuristicMetrics, RedactionSettings, MIN_REDACTION_DPI};
use crate::task::CancelToken;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RedactionOptions {
    pub dpi: u32,
    pub mask_color: [u8; 4],
    pub heuristic: HeuristicMetrics,
}

impl Default for RedactionOptions {
    fn default() -> Self {
        Self::from(&RedactionSettings::default())
    }
}

impl From<&RedactionSettings> for RedactionOptions {
    fn from(s: &RedactionSettings) -> Self {
        Self {
            dpi: s.dpi,
            mask_color: s.mask_color,
            heuristic: s.heuristic,
        }
    }
}

/// Reported once per page as the engine walks the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionProgress {
    pub page_index: usize,
    pub page_count: usize,
    pub rasterized: bool,
}

/// A page of the redacted document.
#[derive(Debug, Clone)]
pub enum OutputPage {
    /// Carried through from the source untouched.
    Original { index: usize },
    /// Replaced by a flattened image with masks burned in.
    Raster {
        bitmap: Bitmap,
        dpi: u32,
        size: PageSize,
    },
}

/// Source pages without matches plus rasterized replacements for pages with matches.
///
/// Rasterized pages carry no text layer: `extract_text` returns an empty page.
pub struct RedactedDocument<'a> {
    source: &'a dyn PageRasterAdapter,
    pages: Vec<OutputPage>,
}

impl<'a> RedactedDocument<'a> {
    pub fn pages(&self) -> &[OutputPage] {
        &self.pages
    }

    pub fn rasterized_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, OutputPage::Raster { .. }))
            .map(|(i, _)| i)
            .collect()
    }

    fn page(&self, index: usize) -> Result<&OutputPage> {
        self.pages.get(index).ok_or(ShieldError::PageOutOfRange {
            index,
            count: self.pages.len(),
        })
    }

    /// Feed every page to `assembler` in order.
    pub fn write_to(&self, assembler: &mut dyn PageAssembler, cancel: &CancelToken) -> Result<()> {
        for page in &self.pages {
            cancel.check()?;
            match page {
                OutputPage::Original { index } => assembler.copy_page(*index)?,
                OutputPage::Raster { bitmap, dpi, size } => {
                    assembler.add_image_page(bitmap, *dpi, *size)?
                }
            }
        }
        Ok(())
    }

    /// Assemble and save to `dst`. Nothing appears at `dst` unless the save completes.
    pub fn write_atomic(
        &self,
        assembler: &mut dyn PageAssembler,
        dst: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.write_to(assembler, cancel)?;
        persist_atomic(dst, cancel, |tmp| assembler.save(tmp))?;
        info!(path = %dst.display(), pages = self.pages.len(), "Redacted document saved");
        Ok(())
    }
}

impl PageRasterAdapter for RedactedDocument<'_> {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self, index: usize) -> Result<PageSize> {
        match self.page(index)? {
            OutputPage::Original { index } => self.source.page_size(*index),
            OutputPage::Raster { size, .. } => Ok(*size),
        }
    }

    fn render_page(&self, index: usize, dpi: u32) -> Result<Bitmap> {
        match self.page(index)? {
            OutputPage::Original { index } => self.source.render_page(*index, dpi),
            OutputPage::Raster { bitmap, size, .. } => {
                let (w, h) = size.pixel_dims(dpi);
                Ok(bitmap.resample(w, h))
            }
        }
    }

    fn extract_text(&self, index: usize) -> Result<PageText> {
        match self.page(index)? {
            OutputPage::Original { index } => self.source.extract_text(*index),
            OutputPage::Raster { .. } => Ok(PageText {
                text: String::new(),
                glyphs: Some(Vec::new()),
            }),
        }
    }
}

pub struct RedactionOutcome<'a> {
    pub document: RedactedDocument<'a>,
    pub targets: Vec<RedactionTarget>,
    /// Mask rectangles painted. A match wrapped across lines paints one per
    /// line segment; per-page match counts are on `targets`.
    pub masks_applied: usize,
}

impl RedactionOutcome<'_> {
    /// Occurrences of the term across all pages.
    pub fn match_count(&self) -> usize {
        self.targets.iter().map(|t| t.match_count).sum()
    }
}

/// Finds a term on every page and burns opaque masks into rasterized copies
/// of the matching pages.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    options: RedactionOptions,
}

impl Default for RedactionEngine {
    fn default() -> Self {
        Self {
            options: RedactionOptions::default(),
        }
    }
}

impl RedactionEngine {
    pub fn new(options: RedactionOptions) -> Result<Self> {
        if options.dpi < MIN_REDACTION_DPI {
            return Err(ShieldError::InvalidInput(format!(
                "redaction dpi {} is below {MIN_REDACTION_DPI}",
                options.dpi
            )));
        }
        if options.mask_color[3] != 255 {
            return Err(ShieldError::InvalidInput("redaction mask must be opaque".into()));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &RedactionOptions {
        &self.options
    }

    fn scale_for(&self, bitmap: &Bitmap, size: PageSize) -> (f32, f32) {
        let nominal = self.options.dpi as f32 / 72.0;
        if size.pixel_dims(self.options.dpi) == (bitmap.width(), bitmap.height()) {
            (nominal, nominal)
        } else {
            // adapter rendered at a different size than requested
            (
                bitmap.width() as f32 / size.width,
                bitmap.height() as f32 / size.height,
            )
        }
    }

    fn check_request<'d>(
        document: Option<&'d dyn PageRasterAdapter>,
        term: &str,
    ) -> Result<&'d dyn PageRasterAdapter> {
        let document = document.ok_or(ShieldError::NoDocumentLoaded)?;
        if term.trim().is_empty() {
            return Err(ShieldError::EmptySearchTerm);
        }
        Ok(document)
    }

    /// Targets for every page containing `term`, without modifying anything.
    pub fn locate(
        &self,
        document: Option<&dyn PageRasterAdapter>,
        term: &str,
    ) -> Result<Vec<RedactionTarget>> {
        let document = Self::check_request(document, term)?;
        let mut targets = Vec::new();
        for index in 0..document.page_count() {
            if let Some(t) = self.locate_page(document, index, term)? {
                targets.push(t);
            }
        }
        Ok(targets)
    }

    fn locate_page(
        &self,
        document: &dyn PageRasterAdapter,
        index: usize,
        term: &str,
    ) -> Result<Option<RedactionTarget>> {
        let page = document.extract_text(index)?;
        let matches = find_matches(&page.text, term);
        if matches.is_empty() {
            return Ok(None);
        }
        let (mode, matched_spans) = locate_spans(&page, &matches, &self.options.heuristic);
        Ok(Some(RedactionTarget {
            page_index: index,
            match_count: matches.len(),
            mode,
            matched_spans,
        }))
    }

    pub fn redact<'d>(
        &self,
        document: Option<&'d dyn PageRasterAdapter>,
        term: &str,
    ) -> Result<RedactionOutcome<'d>> {
        self.redact_with(document, term, &CancelToken::never(), &mut |_| {})
    }

    /// Redact every occurrence of `term`. Pages without a match are carried
    /// through; the rest are rendered at the configured DPI and masked.
    /// Finding nothing is a success with no targets.
    pub fn redact_with<'d>(
        &self,
        document: Option<&'d dyn PageRasterAdapter>,
        term: &str,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(RedactionProgress),
    ) -> Result<RedactionOutcome<'d>> {
        let document = Self::check_request(document, term)?;
        let page_count = document.page_count();
        let mut pages = Vec::with_capacity(page_count);
        let mut targets = Vec::new();
        let mut masks_applied = 0;

        for index in 0..page_count {
            cancel.check()?;
            let page = match self.locate_page(document, index, term)? {
                None => OutputPage::Original { index },
                Some(target) => {
                    let size = document.page_size(index)?;
                    let mut bitmap = document.render_page(index, self.options.dpi)?;
                    let (scale_x, scale_y) = self.scale_for(&bitmap, size);
                    for span in &target.matched_spans {
                        if let Some(px) =
                            span.to_pixels(scale_x, scale_y, bitmap.width(), bitmap.height())
                        {
                            bitmap.fill_rect(&px, self.options.mask_color);
                            masks_applied += 1;
                        }
                    }
                    debug!(
                        page = index,
                        matches = target.match_count,
                        mode = ?target.mode,
                        "Page rasterized and masked"
                    );
                    targets.push(target);
                    OutputPage::Raster {
                        bitmap,
                        dpi: self.options.dpi,
                        size,
                    }
                }
            };
            progress(RedactionProgress {
                page_index: index,
                page_count,
                rasterized: matches!(page, OutputPage::Raster { .. }),
            });
            pages.push(page);
        }

        // the term itself is not logged
        info!(
            pages = page_count,
            rasterized = targets.len(),
            masks = masks_applied,
            "Redaction complete"
        );
        Ok(RedactionOutcome {
            document: RedactedDocument {
                source: document,
                pages,
            },
            targets,
            masks_applied,
        })
    }
}
