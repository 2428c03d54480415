//! Text-stream fallback strategy built on `lopdf`.
//!
//! Reads each page's content stream in drawing order and does not track glyph
//! positions. Word boxes are synthesized: every text line gets an equal slice
//! of the page height and its words are spread across the line in proportion
//! to their character offsets. Good enough for click targets on a damaged
//! page, not for zone classification.

use std::collections::BTreeMap;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

use readalong_core::{BackendError, PageSource, PdfBackend, RawPage, RawWord, Strategy};

#[cfg(any(test, feature = "fixtures"))]
#[doc(hidden)]
pub mod fixtures;

/// US Letter, used when a page has no usable MediaBox.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Horizontal margin, as a fraction of page width, for synthesized boxes.
const MARGIN_FRACTION: f32 = 0.05;

/// Fraction of each line band covered by the synthesized word box.
const LINE_FILL: f32 = 0.8;

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfBackend;

impl LopdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for LopdfBackend {
    fn strategy(&self) -> Strategy {
        Strategy::TextStream
    }

    fn open(&self, bytes: &[u8]) -> Result<Box<dyn PageSource>, BackendError> {
        let document =
            Document::load_mem(bytes).map_err(|e| BackendError::OpenError(e.to_string()))?;
        // get_pages returns BTreeMap<u32, ObjectId> with 1-based keys
        let pages = document.get_pages();
        Ok(Box::new(LopdfSource { document, pages }))
    }
}

struct LopdfSource {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl PageSource for LopdfSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn extract_page(&mut self, index: usize) -> Result<RawPage, BackendError> {
        let number = index as u32 + 1;
        let page_error = |message: String| BackendError::PageError {
            page: index + 1,
            message,
        };
        let page_id = *self
            .pages
            .get(&number)
            .ok_or_else(|| page_error("page not in page tree".to_string()))?;

        let (width, height) = media_box(&self.document, page_id).unwrap_or_else(|| {
            tracing::debug!(page = number, "no usable MediaBox, assuming US Letter");
            DEFAULT_PAGE_SIZE
        });
        let text = self
            .document
            .extract_text(&[number])
            .map_err(|e| page_error(e.to_string()))?;
        let words = synthesize_boxes(&text, width, height);
        let image_only = words.is_empty() && draws_xobject(&self.document, page_id);

        Ok(RawPage {
            width,
            height,
            words,
            image_only,
        })
    }
}

fn object_to_f32(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

/// Look up a key in the page dictionary, walking up the page tree
/// (via /Parent) if the key is not found on the page itself.
fn resolve_inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current_id = page_id;
    // Bounded walk in case of a cyclic /Parent chain.
    for _ in 0..64 {
        let dict = doc.get_object(current_id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
        }
        current_id = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// Page width and height from the (possibly inherited) MediaBox.
fn media_box(doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let array = resolve_inherited(doc, page_id, b"MediaBox")?.as_array().ok()?;
    let values: Vec<f32> = array.iter().filter_map(object_to_f32).collect();
    let [x0, y0, x1, y1] = values.as_slice() else {
        return None;
    };
    let (w, h) = ((x1 - x0).abs(), (y1 - y0).abs());
    (w > 0.0 && h > 0.0).then_some((w, h))
}

/// Whether the page's content stream paints an XObject (usually an image).
fn draws_xobject(doc: &Document, page_id: ObjectId) -> bool {
    doc.get_page_content(page_id)
        .ok()
        .and_then(|data| Content::decode(&data).ok())
        .is_some_and(|content| content.operations.iter().any(|op| op.operator == "Do"))
}

/// Lay out extracted text on a page with approximate word boxes.
///
/// Blank lines keep their band so vertical spacing is roughly preserved.
/// Coordinates use a top-left origin.
pub fn synthesize_boxes(text: &str, page_width: f32, page_height: f32) -> Vec<RawWord> {
    let lines: Vec<&str> = text.trim_end_matches('\n').split('\n').collect();
    let widest = lines
        .iter()
        .map(|l| l.trim_end().chars().count())
        .max()
        .unwrap_or(0);
    if widest == 0 {
        return Vec::new();
    }

    let band = page_height / lines.len() as f32;
    let left = page_width * MARGIN_FRACTION;
    let char_width = page_width * (1.0 - 2.0 * MARGIN_FRACTION) / widest as f32;

    let mut words = Vec::new();
    for (row, line) in lines.iter().enumerate() {
        let top = row as f32 * band;
        let bottom = top + band * LINE_FILL;
        let mut column = 0usize;
        let mut start: Option<(usize, String)> = None;
        for c in line.chars().chain(std::iter::once(' ')) {
            if c.is_whitespace() {
                if let Some((begin, word)) = start.take() {
                    let x0 = left + begin as f32 * char_width;
                    let x1 = left + column as f32 * char_width;
                    words.push(RawWord::new(word, x0, top, x1, bottom));
                }
            } else {
                start.get_or_insert_with(|| (column, String::new())).1.push(c);
            }
            column += 1;
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixturePage, TextLine, build_pdf};

    #[test]
    fn boxes_follow_line_order() {
        let words = synthesize_boxes("Hello world\n\nagain\n", 600.0, 300.0);
        let texts: Vec<&str> = words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello", "world", "again"]);

        // Three bands of 100pt; the blank line keeps its slot.
        assert_eq!(words[0].y0, 0.0);
        assert_eq!(words[2].y0, 200.0);
        assert!(words[1].x0 > words[0].x1);
        assert!(words.iter().all(|w| w.x1 <= 600.0 * (1.0 - MARGIN_FRACTION) + 0.01));
    }

    #[test]
    fn empty_text_has_no_words() {
        assert!(synthesize_boxes("", 612.0, 792.0).is_empty());
        assert!(synthesize_boxes("\n\n  \n", 612.0, 792.0).is_empty());
    }

    #[test]
    fn extracts_lines_in_stream_order() {
        let pdf = build_pdf(&[FixturePage::Text(vec![
            TextLine::new(72.0, 700.0, "First line here"),
            TextLine::new(72.0, 680.0, "second line"),
        ])]);
        let mut source = LopdfBackend::new().open(&pdf).unwrap();
        assert_eq!(source.page_count(), 1);

        let page = source.extract_page(0).unwrap();
        assert_eq!((page.width, page.height), (612.0, 792.0));
        let texts: Vec<&str> = page.words.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["First", "line", "here", "second", "line"]);
        assert!(!page.image_only);
        assert!(page.words[3].y0 > page.words[0].y0);
    }

    #[test]
    fn image_pages_are_flagged() {
        let pdf = build_pdf(&[FixturePage::Image]);
        let mut source = LopdfBackend::new().open(&pdf).unwrap();
        let page = source.extract_page(0).unwrap();
        assert!(page.words.is_empty());
        assert!(page.image_only);
    }

    #[test]
    fn missing_page_is_a_page_error() {
        let pdf = build_pdf(&[FixturePage::Text(vec![TextLine::new(72.0, 700.0, "x")])]);
        let mut source = LopdfBackend::new().open(&pdf).unwrap();
        assert!(matches!(
            source.extract_page(3),
            Err(BackendError::PageError { page: 4, .. })
        ));
    }

    #[test]
    fn garbage_fails_to_open() {
        assert!(matches!(
            LopdfBackend::new().open(b"not a pdf"),
            Err(BackendError::OpenError(_))
        ));
    }
}
