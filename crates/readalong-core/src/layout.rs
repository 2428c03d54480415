//! Line grouping and paragraph segmentation from word geometry.
//!
//! Works on backend order: consecutive words whose tops are within the
//! tolerance share a line. Reading order is never rearranged here.

use crate::backend::RawWord;
use crate::text::line_continues;

/// Vertical tolerance (points) for two words to share a line.
pub const LINE_TOLERANCE: f32 = 3.0;

/// Indent shift (points) that starts a new paragraph.
const INDENT_SHIFT: f32 = 10.0;

/// Per-word layout annotations, parallel to the input slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordLayout {
    /// Page-local line ordinal.
    pub line: usize,
    pub paragraph_start: bool,
    pub paragraph_end: bool,
}

#[derive(Debug)]
struct Line {
    first: usize,
    last: usize,
    top: f32,
    bottom: f32,
    left: f32,
    text: String,
}

impl Line {
    fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }
}

fn group_lines(words: &[RawWord]) -> Vec<Line> {
    let mut lines: Vec<Line> = Vec::new();
    for (i, word) in words.iter().enumerate() {
        match lines.last_mut() {
            Some(line) if (word.y0 - line.top).abs() <= LINE_TOLERANCE => {
                line.last = i;
                line.bottom = line.bottom.max(word.y1);
                line.left = line.left.min(word.x0);
                line.text.push(' ');
                line.text.push_str(&word.text);
            }
            _ => lines.push(Line {
                first: i,
                last: i,
                top: word.y0,
                bottom: word.y1,
                left: word.x0,
                text: word.text.clone(),
            }),
        }
    }
    lines
}

fn starts_paragraph(prev: &Line, line: &Line) -> bool {
    if line_continues(&prev.text, &line.text) {
        return false;
    }
    let gap = line.top - prev.bottom;
    let avg_height = (prev.height() + line.height()) / 2.0;
    gap > avg_height || (line.left - prev.left).abs() > INDENT_SHIFT
}

/// Annotate one page's words with line ordinals and paragraph boundaries.
///
/// The first line of a page always opens a paragraph.
pub fn analyze_page(words: &[RawWord]) -> Vec<WordLayout> {
    let mut layout = vec![WordLayout::default(); words.len()];
    let lines = group_lines(words);

    for (n, line) in lines.iter().enumerate() {
        for slot in &mut layout[line.first..=line.last] {
            slot.line = n;
        }
        let opens = n == 0 || starts_paragraph(&lines[n - 1], line);
        if opens {
            layout[line.first].paragraph_start = true;
            if line.first > 0 {
                layout[line.first - 1].paragraph_end = true;
            }
        }
    }
    if let Some(last) = layout.last_mut() {
        last.paragraph_end = true;
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(words: &[&str], left: f32, top: f32) -> Vec<RawWord> {
        let mut x = left;
        words
            .iter()
            .map(|w| {
                let width = w.len() as f32 * 6.0;
                let word = RawWord::new(*w, x, top, x + width, top + 12.0);
                x += width + 4.0;
                word
            })
            .collect()
    }

    #[test]
    fn groups_words_into_lines() {
        let mut words = line(&["The", "quick"], 72.0, 100.0);
        words.extend(line(&["brown", "fox."], 72.0, 114.0));
        let layout = analyze_page(&words);
        assert_eq!(
            layout.iter().map(|l| l.line).collect::<Vec<_>>(),
            vec![0, 0, 1, 1]
        );
    }

    #[test]
    fn large_gap_starts_paragraph() {
        let mut words = line(&["First", "paragraph."], 72.0, 100.0);
        words.extend(line(&["Second", "one."], 72.0, 140.0));
        let layout = analyze_page(&words);
        assert!(layout[0].paragraph_start);
        assert!(layout[1].paragraph_end);
        assert!(layout[2].paragraph_start);
        assert!(layout[3].paragraph_end);
    }

    #[test]
    fn continuation_suppresses_break() {
        let mut words = line(&["ends", "with", "the"], 72.0, 100.0);
        words.extend(line(&["Rest", "here."], 72.0, 140.0));
        let layout = analyze_page(&words);
        assert!(!layout[3].paragraph_start);
        assert!(!layout[2].paragraph_end);
    }

    #[test]
    fn indent_starts_paragraph() {
        let mut words = line(&["Done."], 72.0, 100.0);
        words.extend(line(&["Indented", "start."], 96.0, 114.0));
        let layout = analyze_page(&words);
        assert!(layout[1].paragraph_start);
        assert!(layout[0].paragraph_end);
    }

    #[test]
    fn empty_page() {
        assert!(analyze_page(&[]).is_empty());
    }
}
