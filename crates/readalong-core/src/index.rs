//! The document index: every extracted word in global reading order.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::backend::{RawWord, Strategy};
use crate::detect::Zone;
use crate::layout;

/// A word's box in page space (top-left origin, points) plus the page size,
/// so consumers can work in page fractions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub page_width: f32,
    pub page_height: f32,
}

impl BBox {
    /// Top edge as a fraction of page height.
    pub fn top_frac(&self) -> f32 {
        frac(self.y0, self.page_height)
    }

    /// Bottom edge as a fraction of page height.
    pub fn bottom_frac(&self) -> f32 {
        frac(self.y1, self.page_height)
    }

    pub fn left_frac(&self) -> f32 {
        frac(self.x0, self.page_width)
    }

    pub fn right_frac(&self) -> f32 {
        frac(self.x1, self.page_width)
    }
}

fn frac(value: f32, extent: f32) -> f32 {
    if extent > 0.0 { value / extent } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    /// 1-based page number.
    pub page: usize,
    pub global_index: usize,
    pub bbox: BBox,
    /// Page-local line ordinal.
    pub line: usize,
    /// Document-wide paragraph ordinal.
    pub paragraph: usize,
    pub paragraph_start: bool,
    pub paragraph_end: bool,
    pub is_filtered: bool,
    /// Why the word was filtered, if it was.
    pub filter_reason: Option<Zone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub width: f32,
    pub height: f32,
    /// `None` when neither strategy produced the page.
    pub strategy: Option<Strategy>,
    pub image_only: bool,
    /// Set when both strategies failed on this page.
    pub failure: Option<String>,
    /// Global indices owned by this page.
    pub word_range: Range<usize>,
}

impl Page {
    pub fn word_count(&self) -> usize {
        self.word_range.len()
    }
}

/// Extractor output for one page, before global indexing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    pub width: f32,
    pub height: f32,
    pub words: Vec<RawWord>,
    pub strategy: Option<Strategy>,
    pub image_only: bool,
    pub failure: Option<String>,
}

/// The canonical addressable text of a document.
///
/// Built once from extracted pages. After the pattern detector has run
/// ([`is_detected`](Self::is_detected)), the index is shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIndex {
    pages: Vec<Page>,
    words: Vec<Word>,
    detected: bool,
}

/// Per-word view handed to the UI layer for rendering and click targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordView<'a> {
    pub text: &'a str,
    pub global_index: usize,
    pub is_filtered: bool,
}

/// Counts describing how a document was extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub pages: usize,
    pub layout_pages: usize,
    pub text_stream_pages: usize,
    pub failed_pages: Vec<usize>,
    pub image_only_pages: Vec<usize>,
    /// Pages that extracted cleanly but hold no words and no images.
    pub empty_pages: Vec<usize>,
}

impl DocumentIndex {
    /// Assign global indices, lines and paragraphs. Pages are numbered in
    /// input order starting at 1.
    pub fn from_pages(extracted: Vec<ExtractedPage>) -> Self {
        let total: usize = extracted.iter().map(|p| p.words.len()).sum();
        let mut words = Vec::with_capacity(total);
        let mut pages = Vec::with_capacity(extracted.len());
        let mut paragraph = 0usize;

        for (i, page) in extracted.into_iter().enumerate() {
            let number = i + 1;
            let start = words.len();
            let annotations = layout::analyze_page(&page.words);

            for (raw, ann) in page.words.into_iter().zip(annotations) {
                if ann.paragraph_start && words.len() > start {
                    paragraph += 1;
                }
                let global_index = words.len();
                words.push(Word {
                    text: raw.text,
                    page: number,
                    global_index,
                    bbox: BBox {
                        x0: raw.x0,
                        y0: raw.y0,
                        x1: raw.x1,
                        y1: raw.y1,
                        page_width: page.width,
                        page_height: page.height,
                    },
                    line: ann.line,
                    paragraph,
                    paragraph_start: ann.paragraph_start,
                    paragraph_end: ann.paragraph_end,
                    is_filtered: false,
                    filter_reason: None,
                });
            }
            if words.len() > start {
                paragraph += 1;
            }

            pages.push(Page {
                number,
                width: page.width,
                height: page.height,
                strategy: page.strategy,
                image_only: page.image_only,
                failure: page.failure,
                word_range: start..words.len(),
            });
        }

        Self {
            pages,
            words,
            detected: false,
        }
    }

    pub fn total_word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, global_index: usize) -> Option<&Word> {
        self.words.get(global_index)
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Look up a page by its 1-based number.
    pub fn page(&self, number: usize) -> Option<&Page> {
        number.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    pub fn page_words(&self, page: &Page) -> &[Word] {
        &self.words[page.word_range.clone()]
    }

    /// Page number holding `global_index`.
    pub fn page_of(&self, global_index: usize) -> Option<usize> {
        self.word(global_index).map(|w| w.page)
    }

    pub fn filtered_count(&self) -> usize {
        self.words.iter().filter(|w| w.is_filtered).count()
    }

    /// Whether boilerplate detection has completed on this index.
    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn character_count(&self) -> usize {
        self.words.iter().map(|w| w.text.chars().count()).sum()
    }

    pub fn word_views(&self) -> impl Iterator<Item = WordView<'_>> {
        self.words.iter().map(|w| WordView {
            text: &w.text,
            global_index: w.global_index,
            is_filtered: w.is_filtered,
        })
    }

    pub fn extraction_summary(&self) -> ExtractionSummary {
        let mut summary = ExtractionSummary {
            pages: self.pages.len(),
            ..Default::default()
        };
        for page in &self.pages {
            match page.strategy {
                Some(Strategy::Layout) => summary.layout_pages += 1,
                Some(Strategy::TextStream) => summary.text_stream_pages += 1,
                None => summary.failed_pages.push(page.number),
            }
            if page.image_only {
                summary.image_only_pages.push(page.number);
            } else if page.strategy.is_some() && page.word_count() == 0 {
                summary.empty_pages.push(page.number);
            }
        }
        summary
    }

    /// Replace every filter flag in one pass. `reasons` is parallel to the
    /// word list; `None` clears the flag.
    pub(crate) fn apply_filter(&mut self, reasons: Vec<Option<Zone>>) {
        debug_assert_eq!(reasons.len(), self.words.len());
        for (word, reason) in self.words.iter_mut().zip(reasons) {
            word.is_filtered = reason.is_some();
            word.filter_reason = reason;
        }
        self.detected = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One page of single-line words laid left to right at `top`.
    pub(crate) fn page_of_words(texts: &[&str], top: f32) -> ExtractedPage {
        let mut x = 50.0;
        let words = texts
            .iter()
            .map(|t| {
                let w = RawWord::new(*t, x, top, x + 20.0, top + 10.0);
                x += 1.0;
                w
            })
            .collect();
        ExtractedPage {
            width: 600.0,
            height: 800.0,
            words,
            strategy: Some(Strategy::Layout),
            ..Default::default()
        }
    }

    #[test]
    fn global_indices_are_contiguous_across_pages() {
        let index = DocumentIndex::from_pages(vec![
            page_of_words(&["a", "b", "c"], 100.0),
            ExtractedPage {
                failure: Some("broken".into()),
                ..Default::default()
            },
            page_of_words(&["d", "e"], 100.0),
        ]);

        let per_page: usize = index.pages().iter().map(Page::word_count).sum();
        assert_eq!(per_page, index.total_word_count());
        assert_eq!(index.total_word_count(), 5);
        for (i, w) in index.words().iter().enumerate() {
            assert_eq!(w.global_index, i);
        }
        assert_eq!(index.page(2).unwrap().word_count(), 0);
        assert_eq!(index.page_of(3), Some(3));
        assert_eq!(index.page_words(index.page(3).unwrap())[0].text, "d");
    }

    #[test]
    fn paragraphs_restart_per_page() {
        let index = DocumentIndex::from_pages(vec![
            page_of_words(&["a", "b"], 100.0),
            page_of_words(&["c"], 100.0),
        ]);
        let paragraphs: Vec<usize> = index.words().iter().map(|w| w.paragraph).collect();
        assert_eq!(paragraphs, vec![0, 0, 1]);
        assert!(index.word(1).unwrap().paragraph_end);
        assert!(index.word(2).unwrap().paragraph_start);
    }

    #[test]
    fn summary_counts_strategies() {
        let mut fallback = page_of_words(&["x"], 10.0);
        fallback.strategy = Some(Strategy::TextStream);
        let index = DocumentIndex::from_pages(vec![
            page_of_words(&["a"], 10.0),
            fallback,
            ExtractedPage {
                image_only: true,
                strategy: Some(Strategy::Layout),
                ..Default::default()
            },
            ExtractedPage::default(),
            ExtractedPage {
                strategy: Some(Strategy::TextStream),
                ..Default::default()
            },
        ]);
        let summary = index.extraction_summary();
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.layout_pages, 2);
        assert_eq!(summary.text_stream_pages, 2);
        assert_eq!(summary.failed_pages, vec![4]);
        assert_eq!(summary.image_only_pages, vec![3]);
        assert_eq!(summary.empty_pages, vec![5]);
    }

    #[test]
    fn word_views_serialize_for_the_ui() {
        let mut index = DocumentIndex::from_pages(vec![page_of_words(&["Intro", "7"], 10.0)]);
        index.apply_filter(vec![None, Some(Zone::PageNumber)]);

        let views: Vec<WordView> = index.word_views().collect();
        assert_eq!(
            serde_json::to_value(&views).unwrap(),
            serde_json::json!([
                {"text": "Intro", "global_index": 0, "is_filtered": false},
                {"text": "7", "global_index": 1, "is_filtered": true},
            ])
        );
        let word = serde_json::to_value(index.word(1).unwrap()).unwrap();
        assert_eq!(word["filter_reason"], "page_number");
    }

    #[test]
    fn starts_undetected() {
        let index = DocumentIndex::from_pages(vec![page_of_words(&["a"], 10.0)]);
        assert!(!index.is_detected());
        assert_eq!(index.filtered_count(), 0);
    }
}
