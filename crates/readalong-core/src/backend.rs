use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract page {page}: {message}")]
    PageError { page: usize, message: String },
    #[error("page {page} did not finish within {budget_ms} ms")]
    Timeout { page: usize, budget_ms: u128 },
    #[error("extraction worker stopped unexpectedly")]
    WorkerGone,
}

/// Which extraction strategy produced a page.
///
/// Layout pages carry real per-word boxes; text-stream pages carry boxes
/// synthesized from line order, so click targets and zone classification on
/// those pages are approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Layout,
    TextStream,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Layout => "layout",
            Strategy::TextStream => "text-stream",
        }
    }
}

/// A word as reported by a backend, in page space (top-left origin, points).
#[derive(Debug, Clone, PartialEq)]
pub struct RawWord {
    pub text: String,
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl RawWord {
    pub fn new(text: impl Into<String>, x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            text: text.into(),
            x0,
            y0,
            x1,
            y1,
        }
    }
}

/// One page of backend output in the backend's native reading order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub width: f32,
    pub height: f32,
    pub words: Vec<RawWord>,
    /// The page draws images but has no text layer.
    pub image_only: bool,
}

/// Trait for PDF text extraction backends.
///
/// A backend parses the document once via [`open`](PdfBackend::open) and then
/// serves pages one at a time, so the extractor can fall back page by page.
pub trait PdfBackend: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Parse the document. The returned source does not need to be `Send`;
    /// the extractor keeps it on the thread that opened it.
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageSource>, BackendError>;
}

/// An opened document that yields pages by zero-based index.
pub trait PageSource {
    fn page_count(&self) -> usize;

    fn extract_page(&mut self, index: usize) -> Result<RawPage, BackendError>;
}
