//! Positional boilerplate detection.
//!
//! Each page is cut into a header band (top), a footer band (bottom) and a
//! body. Lines that sit fully inside a band get a digit-masked signature; a
//! signature that recurs in the same band across enough pages is boilerplate.
//! Page numbers are handled separately because their text changes on every
//! page: a lone number in a band corner is flagged when its neighbours on
//! adjacent pages agree with it.
//!
//! All intermediate values ([`ZoneLine`], [`PatternCandidate`]) live only for
//! one [`PatternDetector::detect`] call.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::index::{DocumentIndex, Word};
use crate::text::{has_digit_placeholder, parse_page_number, signature};

/// Classification of a promoted pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Header,
    Footer,
    PageNumber,
    RunningTitle,
}

impl Zone {
    pub fn name(&self) -> &'static str {
        match self {
            Zone::Header => "header",
            Zone::Footer => "footer",
            Zone::PageNumber => "page_number",
            Zone::RunningTitle => "running_title",
        }
    }
}

/// Vertical band of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Band {
    Header,
    Footer,
}

/// Tunable thresholds for boilerplate detection.
///
/// The defaults lean toward under-filtering: a missed running header only
/// costs a few spoken words, a filtered sentence loses content.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    /// Top fraction of the page treated as the header band.
    pub header_fraction: f32,
    /// Bottom fraction of the page treated as the footer band.
    pub footer_fraction: f32,
    /// Minimum fraction of pages a signature must appear on.
    pub min_page_fraction: f32,
    /// Minimum number of pages a signature must appear on. Clamped to
    /// `2..=pages-1` for short documents, never below two.
    pub min_pages: usize,
    /// Outer fraction of the page width, on either side, where page numbers sit.
    pub corner_fraction: f32,
    /// Longest digit run accepted as a page number.
    pub max_page_number_digits: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            header_fraction: 0.15,
            footer_fraction: 0.15,
            min_page_fraction: 0.30,
            min_pages: 3,
            corner_fraction: 0.20,
            max_page_number_digits: 4,
        }
    }
}

impl DetectionConfig {
    /// Number of pages a signature must occur on to be promoted.
    pub fn required_pages(&self, page_count: usize) -> usize {
        let raw = f64::from(self.min_page_fraction.max(0.0)) * page_count as f64;
        let by_fraction = (raw - 1e-4).ceil().max(0.0) as usize;
        let upper = 2.max(page_count.saturating_sub(1));
        let by_count = self.min_pages.clamp(2, upper);
        by_fraction.max(by_count)
    }
}

/// A recurring (band, signature) pair promoted to boilerplate.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternCandidate {
    pub text_signature: String,
    pub zone: Zone,
    pub page_occurrences: BTreeSet<usize>,
    /// Vertical extent across all occurrences, as page-height fractions.
    pub representative_bbox_band: (f32, f32),
}

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    pub candidates: Vec<PatternCandidate>,
    pub words_flagged: usize,
    /// Page count a signature needed to be promoted.
    pub required_pages: usize,
}

/// A line fragment inside a header or footer band on one page.
#[derive(Debug)]
struct ZoneLine {
    page: usize,
    band: Band,
    signature: String,
    words: Vec<usize>,
    top: f32,
    bottom: f32,
    page_number: Option<u32>,
}

impl ZoneLine {
    fn new(page: usize, band: Band, words: &[&Word], page_number: Option<u32>) -> Self {
        Self {
            page,
            band,
            signature: signature(words.iter().map(|w| w.text.as_str())),
            words: words.iter().map(|w| w.global_index).collect(),
            top: words.iter().map(|w| w.bbox.top_frac()).fold(f32::MAX, f32::min),
            bottom: words.iter().map(|w| w.bbox.bottom_frac()).fold(0.0, f32::max),
            page_number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Corner {
    Left,
    Right,
}

#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: DetectionConfig,
}

impl PatternDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Recompute every `is_filtered` flag on `document` from scratch.
    ///
    /// Running it twice yields identical flags. Never fails: when nothing
    /// qualifies, nothing is filtered.
    pub fn detect(&self, document: &mut DocumentIndex) -> DetectionReport {
        let lines = self.zone_lines(document);
        let page_count = document.pages().len();
        let required_pages = self.config.required_pages(page_count);

        let mut reasons: Vec<Option<Zone>> = vec![None; document.total_word_count()];
        let mut candidates = self.recurring_candidates(&lines, required_pages, &mut reasons);
        candidates.extend(self.page_number_candidates(&lines, &mut reasons));
        candidates.sort_by(|a, b| {
            a.zone
                .cmp(&b.zone)
                .then_with(|| a.text_signature.cmp(&b.text_signature))
        });

        let words_flagged = reasons.iter().filter(|r| r.is_some()).count();
        document.apply_filter(reasons);

        tracing::info!(
            pages = page_count,
            candidates = candidates.len(),
            words_flagged,
            required_pages,
            "boilerplate detection complete"
        );
        for c in &candidates {
            tracing::debug!(
                zone = c.zone.name(),
                signature = %c.text_signature,
                pages = c.page_occurrences.len(),
                "promoted pattern"
            );
        }

        DetectionReport {
            candidates,
            words_flagged,
            required_pages,
        }
    }

    fn band_of(&self, word: &Word) -> Option<Band> {
        if word.bbox.page_height <= 0.0 {
            return None;
        }
        if word.bbox.bottom_frac() <= self.config.header_fraction {
            Some(Band::Header)
        } else if word.bbox.top_frac() >= 1.0 - self.config.footer_fraction {
            Some(Band::Footer)
        } else {
            None
        }
    }

    fn corner_of(&self, word: &Word) -> Option<Corner> {
        let corner = self.config.corner_fraction;
        if word.bbox.right_frac() <= corner {
            Some(Corner::Left)
        } else if word.bbox.left_frac() >= 1.0 - corner {
            Some(Corner::Right)
        } else {
            None
        }
    }

    fn parse_number(&self, words: &[&Word]) -> Option<u32> {
        let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        parse_page_number(&text, self.config.max_page_number_digits)
    }

    /// Split every page's band words into per-line fragments.
    fn zone_lines(&self, document: &DocumentIndex) -> Vec<ZoneLine> {
        let mut out = Vec::new();
        for page in document.pages() {
            let mut grouped: BTreeMap<(usize, Band), Vec<&Word>> = BTreeMap::new();
            for word in document.page_words(page) {
                if let Some(band) = self.band_of(word) {
                    grouped.entry((word.line, band)).or_default().push(word);
                }
            }

            for ((_, band), words) in grouped {
                let whole = words
                    .iter()
                    .all(|w| self.corner_of(w).is_some())
                    .then(|| self.parse_number(&words))
                    .flatten();
                if let Some(number) = whole {
                    out.push(ZoneLine::new(page.number, band, &words, Some(number)));
                    continue;
                }

                // A number tucked into a corner of a longer line ("Title ... 12")
                // is split off and judged on its own.
                let mut rest: Vec<&Word> = Vec::new();
                for run in words.chunk_by(|a, b| self.corner_of(a) == self.corner_of(b)) {
                    let number = self.corner_of(run[0]).and_then(|_| self.parse_number(run));
                    match number {
                        Some(n) => out.push(ZoneLine::new(page.number, band, run, Some(n))),
                        None => rest.extend_from_slice(run),
                    }
                }
                if !rest.is_empty() {
                    out.push(ZoneLine::new(page.number, band, &rest, None));
                }
            }
        }
        out
    }

    fn recurring_candidates(
        &self,
        lines: &[ZoneLine],
        required_pages: usize,
        reasons: &mut [Option<Zone>],
    ) -> Vec<PatternCandidate> {
        let mut groups: HashMap<(Band, &str), Vec<&ZoneLine>> = HashMap::new();
        // Corner page numbers are judged by sequence, not recurrence.
        let recurring = lines
            .iter()
            .filter(|l| !l.signature.is_empty() && l.page_number.is_none());
        for line in recurring {
            groups
                .entry((line.band, line.signature.as_str()))
                .or_default()
                .push(line);
        }

        let mut candidates = Vec::new();
        for ((band, sig), members) in groups {
            let pages: BTreeSet<usize> = members.iter().map(|l| l.page).collect();
            if pages.len() < required_pages || pages.len() < 2 {
                continue;
            }
            let zone = match band {
                Band::Header if !has_digit_placeholder(sig) => Zone::RunningTitle,
                Band::Header => Zone::Header,
                Band::Footer => Zone::Footer,
            };
            for line in &members {
                for &i in &line.words {
                    reasons[i].get_or_insert(zone);
                }
            }
            candidates.push(PatternCandidate {
                text_signature: sig.to_string(),
                zone,
                page_occurrences: pages,
                representative_bbox_band: band_extent(&members),
            });
        }
        candidates
    }

    /// Page numbers: short numeric tokens in a corner whose values agree with a
    /// neighbour at most two pages away (same value, or advanced by exactly
    /// the page distance).
    fn page_number_candidates(
        &self,
        lines: &[ZoneLine],
        reasons: &mut [Option<Zone>],
    ) -> Vec<PatternCandidate> {
        let mut by_band: BTreeMap<Band, BTreeMap<usize, Vec<&ZoneLine>>> = BTreeMap::new();
        for line in lines.iter().filter(|l| l.page_number.is_some()) {
            by_band
                .entry(line.band)
                .or_default()
                .entry(line.page)
                .or_default()
                .push(line);
        }

        let mut candidates = Vec::new();
        for (_, pages) in by_band {
            let mut confirmed: Vec<&ZoneLine> = Vec::new();
            for (&page, here) in &pages {
                for distance in 1..=2usize {
                    let Some(there) = pages.get(&(page + distance)) else {
                        continue;
                    };
                    for a in here {
                        for b in there {
                            if consistent(a.page_number, b.page_number, distance) {
                                confirmed.push(a);
                                confirmed.push(b);
                            }
                        }
                    }
                }
            }
            if confirmed.is_empty() {
                continue;
            }

            let mut seen = BTreeSet::new();
            confirmed.retain(|l| seen.insert((l.page, l.words[0])));
            for line in &confirmed {
                for &i in &line.words {
                    reasons[i] = Some(Zone::PageNumber);
                }
            }
            candidates.push(PatternCandidate {
                text_signature: "#".to_string(),
                zone: Zone::PageNumber,
                page_occurrences: confirmed.iter().map(|l| l.page).collect(),
                representative_bbox_band: band_extent(&confirmed),
            });
        }
        candidates
    }
}

fn consistent(a: Option<u32>, b: Option<u32>, distance: usize) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => b == a || b.checked_sub(a) == Some(distance as u32),
        _ => false,
    }
}

fn band_extent(lines: &[&ZoneLine]) -> (f32, f32) {
    let top = lines.iter().map(|l| l.top).fold(f32::MAX, f32::min);
    let bottom = lines.iter().map(|l| l.bottom).fold(0.0, f32::max);
    (top, bottom)
}
