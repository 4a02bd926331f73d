//! Irreversible redaction.
//!
//! Pages that contain the search term are rendered to images, opaque masks
//! are painted over every match, and the image replaces the page. The text
//! layer of a replaced page is gone; pages without a match are untouched.

mod adapter;
mod engine;
mod geometry;
mod search;
mod text_document;
mod text_export;

pub use adapter::{PageAssembler, PageRasterAdapter, PageSize, PageText};
pub use engine::{
    OutputPage, RedactedDocument, RedactionEngine, RedactionOptions, RedactionOutcome,
    RedactionProgress,
};
pub use geometry::{Bitmap, PixelRect, Rect};
pub use search::{find_matches, LocateMode, RedactionTarget};
pub use text_document::{TextDocument, INK, PAPER};
pub use text_export::{encode_ppm, TextExportAssembler, PAGE_BREAK};
