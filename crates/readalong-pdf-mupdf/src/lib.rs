use mupdf::text_page::TextBlockType;
use mupdf::{Document, Page, Rect, TextPageFlags};

use readalong_core::{BackendError, PageSource, PdfBackend, RawPage, RawWord, Strategy};

/// MuPDF-based layout strategy: real per-word boxes in reading order.
///
/// The only crate linking mupdf (AGPL-3.0). Builds of `readalong-ingest`
/// without the `pdf` feature never pull it in.
///
/// Words are split on whitespace inside each structured-text line; a word's
/// box is the union of its glyph quads, shifted so the page's top-left
/// corner is the origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for MupdfBackend {
    fn strategy(&self) -> Strategy {
        Strategy::Layout
    }

    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageSource>, BackendError> {
        let document =
            Document::from_bytes(bytes, "pdf").map_err(|e| BackendError::OpenError(e.to_string()))?;
        let page_count = document
            .page_count()
            .map_err(|e| BackendError::OpenError(e.to_string()))?;
        Ok(Box::new(MupdfSource {
            document,
            page_count: page_count.max(0) as usize,
        }))
    }
}

struct MupdfSource {
    document: Document,
    page_count: usize,
}

impl PageSource for MupdfSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn extract_page(&mut self, index: usize) -> Result<RawPage, BackendError> {
        let page_error = |e: mupdf::Error| BackendError::PageError {
            page: index + 1,
            message: e.to_string(),
        };
        let page = self.document.load_page(index as i32).map_err(page_error)?;
        extract_words(&page).map_err(page_error)
    }
}

/// Accumulates glyphs into one word and its bounding box.
#[derive(Default)]
struct WordBuilder {
    text: String,
    bounds: Option<(f32, f32, f32, f32)>,
}

impl WordBuilder {
    fn push(&mut self, c: char, x0: f32, y0: f32, x1: f32, y1: f32) {
        self.text.push(c);
        self.bounds = Some(match self.bounds {
            None => (x0, y0, x1, y1),
            Some((a, b, c, d)) => (a.min(x0), b.min(y0), c.max(x1), d.max(y1)),
        });
    }

    fn finish(&mut self, origin: &Rect, out: &mut Vec<RawWord>) {
        let text = std::mem::take(&mut self.text);
        if let Some((x0, y0, x1, y1)) = self.bounds.take() {
            out.push(RawWord::new(
                text,
                x0 - origin.x0,
                y0 - origin.y0,
                x1 - origin.x0,
                y1 - origin.y0,
            ));
        }
    }
}

fn extract_words(page: &Page) -> Result<RawPage, mupdf::Error> {
    let bounds = page.bounds()?;
    let text_page = page.to_text_page(TextPageFlags::PRESERVE_IMAGES)?;

    let mut words = Vec::new();
    let mut has_images = false;

    for block in text_page.blocks() {
        if block.r#type() == TextBlockType::Image {
            has_images = true;
            continue;
        }
        for line in block.lines() {
            let mut word = WordBuilder::default();
            for ch in line.chars() {
                let c = ch.char().unwrap_or('\u{FFFD}');
                if c.is_whitespace() {
                    word.finish(&bounds, &mut words);
                    continue;
                }
                let q = ch.quad();
                let x0 = q.ul.x.min(q.ll.x);
                let x1 = q.ur.x.max(q.lr.x);
                let y0 = q.ul.y.min(q.ur.y);
                let y1 = q.ll.y.max(q.lr.y);
                word.push(c, x0, y0, x1, y1);
            }
            word.finish(&bounds, &mut words);
        }
    }

    let image_only = has_images && words.is_empty();
    if image_only {
        tracing::debug!("page has images but no text layer");
    }

    Ok(RawPage {
        width: bounds.x1 - bounds.x0,
        height: bounds.y1 - bounds.y0,
        words,
        image_only,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_builder_unions_glyph_boxes() {
        let origin = Rect {
            x0: 10.0,
            y0: 20.0,
            x1: 622.0,
            y1: 812.0,
        };
        let mut out = Vec::new();
        let mut word = WordBuilder::default();
        word.push('H', 100.0, 50.0, 108.0, 62.0);
        word.push('i', 108.0, 52.0, 112.0, 61.0);
        word.finish(&origin, &mut out);
        word.finish(&origin, &mut out);

        assert_eq!(out, vec![RawWord::new("Hi", 90.0, 30.0, 102.0, 42.0)]);
    }

    #[test]
    fn garbage_bytes_fail_to_open() {
        let err = MupdfBackend::new().open(b"definitely not a pdf").err();
        assert!(matches!(err, Some(BackendError::OpenError(_))));
    }
}
