//! Two-strategy extraction with per-page fallback.
//!
//! Each strategy runs on its own worker thread that owns the parsed document.
//! The extractor asks the worker for one page at a time and waits at most
//! `page_budget`; a page that stalls or panics is handed to the next strategy
//! and the stalled worker is abandoned. A fresh worker is started for the
//! following page, up to [`MAX_WORKER_RESTARTS`] times per strategy.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::backend::{BackendError, PdfBackend, RawPage, RawWord, Strategy};
use crate::index::{DocumentIndex, ExtractedPage};
use crate::text::normalize_token;
use crate::{DocumentError, SizeLimit};

/// Worker restarts allowed per strategy before it is given up on for the
/// rest of the document.
pub const MAX_WORKER_RESTARTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_source_bytes: usize,
    pub max_characters: usize,
    pub page_budget: Duration,
    pub open_budget: Duration,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 100 * 1024 * 1024,
            max_characters: 2_000_000,
            page_budget: Duration::from_secs(10),
            open_budget: Duration::from_secs(30),
        }
    }
}

type PageReply = Result<RawPage, BackendError>;

/// A strategy's document, parsed and held on a dedicated thread.
struct PageWorker {
    requests: mpsc::Sender<usize>,
    replies: mpsc::Receiver<PageReply>,
    page_count: usize,
}

impl PageWorker {
    fn spawn(
        backend: Arc<dyn PdfBackend>,
        bytes: Arc<[u8]>,
        open_budget: Duration,
    ) -> Result<Self, BackendError> {
        let (request_tx, request_rx) = mpsc::channel::<usize>();
        let (reply_tx, reply_rx) = mpsc::channel::<PageReply>();
        let (open_tx, open_rx) = mpsc::channel::<Result<usize, BackendError>>();
        let name = format!("readalong-{}", backend.strategy().name());

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut source = match backend.open(&bytes) {
                    Ok(source) => {
                        let _ = open_tx.send(Ok(source.page_count()));
                        source
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                for index in request_rx {
                    if reply_tx.send(source.extract_page(index)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| BackendError::OpenError(format!("failed to start worker: {e}")))?;

        let page_count = match open_rx.recv_timeout(open_budget) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(BackendError::OpenError(format!(
                    "document did not open within {} ms",
                    open_budget.as_millis()
                )));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(BackendError::WorkerGone),
        };

        Ok(Self {
            requests: request_tx,
            replies: reply_rx,
            page_count,
        })
    }

    fn page(&self, index: usize, budget: Duration) -> PageReply {
        self.requests
            .send(index)
            .map_err(|_| BackendError::WorkerGone)?;
        match self.replies.recv_timeout(budget) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => Err(BackendError::Timeout {
                page: index + 1,
                budget_ms: budget.as_millis(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::WorkerGone),
        }
    }
}

/// Per-document state of one strategy.
struct Lane {
    backend: Arc<dyn PdfBackend>,
    worker: Option<PageWorker>,
    restarts: usize,
    /// Set once the strategy is unusable for this document.
    dead: Option<BackendError>,
}

impl Lane {
    fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self {
            backend,
            worker: None,
            restarts: 0,
            dead: None,
        }
    }

    fn strategy(&self) -> Strategy {
        self.backend.strategy()
    }

    fn open(&mut self, bytes: &Arc<[u8]>, limits: &ExtractionLimits) -> Result<usize, BackendError> {
        if let Some(e) = &self.dead {
            return Err(e.clone());
        }
        if let Some(worker) = &self.worker {
            return Ok(worker.page_count);
        }
        match PageWorker::spawn(self.backend.clone(), bytes.clone(), limits.open_budget) {
            Ok(worker) => {
                let count = worker.page_count;
                self.worker = Some(worker);
                Ok(count)
            }
            Err(e) => {
                self.dead = Some(e.clone());
                Err(e)
            }
        }
    }

    fn page(
        &mut self,
        bytes: &Arc<[u8]>,
        index: usize,
        limits: &ExtractionLimits,
    ) -> PageReply {
        self.open(bytes, limits)?;
        let Some(worker) = &self.worker else {
            return Err(BackendError::WorkerGone);
        };
        let reply = worker.page(index, limits.page_budget);
        if let Err(e @ (BackendError::Timeout { .. } | BackendError::WorkerGone)) = &reply {
            // The stalled thread finishes on its own and exits once its
            // reply channel is gone.
            self.worker = None;
            self.restarts += 1;
            tracing::warn!(
                strategy = self.strategy().name(),
                page = index + 1,
                restarts = self.restarts,
                error = %e,
                "abandoning extraction worker"
            );
            if self.restarts > MAX_WORKER_RESTARTS {
                self.dead = Some(e.clone());
            }
        }
        reply
    }
}

/// Runs the primary (layout) strategy with an optional secondary
/// (text-stream) fallback.
#[derive(Clone)]
pub struct Extractor {
    primary: Arc<dyn PdfBackend>,
    secondary: Option<Arc<dyn PdfBackend>>,
    limits: ExtractionLimits,
}

impl Extractor {
    pub fn new(
        primary: Arc<dyn PdfBackend>,
        secondary: Arc<dyn PdfBackend>,
        limits: ExtractionLimits,
    ) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
            limits,
        }
    }

    /// An extractor with no fallback strategy.
    pub fn single(backend: Arc<dyn PdfBackend>, limits: ExtractionLimits) -> Self {
        Self {
            primary: backend,
            secondary: None,
            limits,
        }
    }

    pub fn limits(&self) -> &ExtractionLimits {
        &self.limits
    }

    /// Extract every page into a fresh, undetected [`DocumentIndex`].
    pub fn extract(&self, bytes: &[u8]) -> Result<DocumentIndex, DocumentError> {
        let byte_size = bytes.len();
        if byte_size > self.limits.max_source_bytes {
            return Err(DocumentError::TooLarge {
                limit: SizeLimit::SourceBytes,
                actual: byte_size,
                max: self.limits.max_source_bytes,
            });
        }

        let bytes: Arc<[u8]> = Arc::from(bytes);
        let mut primary = Lane::new(self.primary.clone());
        let mut secondary = self.secondary.clone().map(Lane::new);

        let page_count = match primary.open(&bytes, &self.limits) {
            Ok(n) => n,
            Err(primary_err) => {
                tracing::warn!(
                    strategy = primary.strategy().name(),
                    error = %primary_err,
                    "primary strategy could not open document"
                );
                match secondary.as_mut().map(|lane| lane.open(&bytes, &self.limits)) {
                    Some(Ok(n)) => n,
                    Some(Err(secondary_err)) => {
                        return Err(DocumentError::Extraction {
                            pages_attempted: 0,
                            byte_size,
                            message: format!("{primary_err}; {secondary_err}"),
                        });
                    }
                    None => {
                        return Err(DocumentError::Extraction {
                            pages_attempted: 0,
                            byte_size,
                            message: primary_err.to_string(),
                        });
                    }
                }
            }
        };

        if page_count == 0 {
            return Err(DocumentError::Extraction {
                pages_attempted: 0,
                byte_size,
                message: "document has no pages".to_string(),
            });
        }

        let mut pages = Vec::with_capacity(page_count);
        let mut characters = 0usize;
        for index in 0..page_count {
            let page = self.extract_page(index, &bytes, &mut primary, secondary.as_mut());
            characters += page
                .words
                .iter()
                .map(|w| w.text.chars().count())
                .sum::<usize>();
            if characters > self.limits.max_characters {
                return Err(DocumentError::TooLarge {
                    limit: SizeLimit::Characters,
                    actual: characters,
                    max: self.limits.max_characters,
                });
            }
            pages.push(page);
        }

        let failed: Vec<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.failure.is_some())
            .map(|(i, _)| i + 1)
            .collect();
        if failed.len() == page_count {
            return Err(DocumentError::Extraction {
                pages_attempted: page_count,
                byte_size,
                message: pages
                    .iter()
                    .find_map(|p| p.failure.clone())
                    .unwrap_or_default(),
            });
        }

        let words: usize = pages.iter().map(|p| p.words.len()).sum();
        if words == 0 {
            return Err(DocumentError::NoExtractableText {
                pages_attempted: page_count,
                image_only_pages: pages.iter().filter(|p| p.image_only).count(),
            });
        }
        if !failed.is_empty() {
            tracing::warn!(
                failed = failed.len(),
                pages = page_count,
                ?failed,
                "some pages contributed no words"
            );
        }

        let index = DocumentIndex::from_pages(pages);
        tracing::info!(
            pages = page_count,
            words = index.total_word_count(),
            characters,
            byte_size,
            "extracted document"
        );
        Ok(index)
    }

    fn extract_page(
        &self,
        index: usize,
        bytes: &Arc<[u8]>,
        primary: &mut Lane,
        secondary: Option<&mut Lane>,
    ) -> ExtractedPage {
        let page = index + 1;
        let (blank, primary_err) = match primary.page(bytes, index, &self.limits) {
            Ok(raw) => {
                let raw = normalize_page(raw);
                if !raw.words.is_empty() || raw.image_only {
                    return extracted(raw, primary.strategy());
                }
                (Some(raw), None)
            }
            Err(e) => (None, Some(e)),
        };

        let Some(secondary) = secondary else {
            return match (blank, primary_err) {
                (Some(raw), _) => blank_page(page, raw, primary.strategy()),
                (None, e) => failed_page(page, e.map(|e| e.to_string()).unwrap_or_default()),
            };
        };

        match secondary.page(bytes, index, &self.limits) {
            Ok(raw) => {
                let raw = normalize_page(raw);
                match blank {
                    // The primary read an empty page cleanly; only switch when
                    // the fallback actually finds text.
                    Some(blank) if raw.words.is_empty() => {
                        blank_page(page, blank, primary.strategy())
                    }
                    _ => {
                        tracing::warn!(
                            page,
                            words = raw.words.len(),
                            reason = primary_err
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_else(|| "no words".to_string()),
                            "page fell back to {}",
                            secondary.strategy().name()
                        );
                        extracted(raw, secondary.strategy())
                    }
                }
            }
            Err(secondary_err) => match blank {
                Some(blank) => blank_page(page, blank, primary.strategy()),
                None => {
                    let message = match primary_err {
                        Some(e) => format!("{e}; {secondary_err}"),
                        None => secondary_err.to_string(),
                    };
                    failed_page(page, message)
                }
            },
        }
    }
}

fn normalize_page(mut raw: RawPage) -> RawPage {
    raw.words = raw
        .words
        .into_iter()
        .filter_map(|w| {
            normalize_token(&w.text).map(|text| RawWord { text, ..w })
        })
        .collect();
    raw
}

fn extracted(raw: RawPage, strategy: Strategy) -> ExtractedPage {
    ExtractedPage {
        width: raw.width,
        height: raw.height,
        words: raw.words,
        strategy: Some(strategy),
        image_only: raw.image_only,
        failure: None,
    }
}

/// A page that parsed cleanly but yielded no words and no images.
fn blank_page(page: usize, raw: RawPage, strategy: Strategy) -> ExtractedPage {
    tracing::warn!(page, strategy = strategy.name(), "page produced no words");
    extracted(raw, strategy)
}

fn failed_page(page: usize, message: String) -> ExtractedPage {
    tracing::warn!(page, error = %message, "both strategies failed; page skipped");
    ExtractedPage {
        failure: Some(message),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PageSource;
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Behavior {
        Words(Vec<&'static str>),
        Empty,
        ImageOnly,
        Fail,
        Hang,
        Panic,
    }

    /// Scripted backend: one behavior per page.
    struct ScriptedBackend {
        strategy: Strategy,
        pages: Vec<Behavior>,
        open_fails: bool,
    }

    impl ScriptedBackend {
        fn new(strategy: Strategy, pages: Vec<Behavior>) -> Arc<dyn PdfBackend> {
            Arc::new(Self {
                strategy,
                pages,
                open_fails: false,
            })
        }

        fn broken(strategy: Strategy) -> Arc<dyn PdfBackend> {
            Arc::new(Self {
                strategy,
                pages: Vec::new(),
                open_fails: true,
            })
        }
    }

    struct ScriptedSource {
        pages: Vec<Behavior>,
    }

    impl PdfBackend for ScriptedBackend {
        fn strategy(&self) -> Strategy {
            self.strategy
        }

        fn open(&self, _bytes: &[u8]) -> Result<Box<dyn PageSource>, BackendError> {
            if self.open_fails {
                return Err(BackendError::OpenError("bad xref".into()));
            }
            Ok(Box::new(ScriptedSource {
                pages: self.pages.clone(),
            }))
        }
    }

    impl PageSource for ScriptedSource {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        fn extract_page(&mut self, index: usize) -> Result<RawPage, BackendError> {
            let mut page = RawPage {
                width: 612.0,
                height: 792.0,
                ..Default::default()
            };
            match &self.pages[index] {
                Behavior::Words(words) => {
                    page.words = words
                        .iter()
                        .enumerate()
                        .map(|(i, w)| {
                            let x = 72.0 + i as f32 * 40.0;
                            RawWord::new(*w, x, 300.0, x + 30.0, 312.0)
                        })
                        .collect();
                }
                Behavior::Empty => {}
                Behavior::ImageOnly => page.image_only = true,
                Behavior::Fail => {
                    return Err(BackendError::PageError {
                        page: index + 1,
                        message: "bad content stream".into(),
                    });
                }
                Behavior::Hang => thread::sleep(Duration::from_millis(500)),
                Behavior::Panic => panic!("backend bug"),
            }
            Ok(page)
        }
    }

    fn fast_limits() -> ExtractionLimits {
        ExtractionLimits {
            page_budget: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn strategies(index: &DocumentIndex) -> Vec<Option<Strategy>> {
        index.pages().iter().map(|p| p.strategy).collect()
    }

    #[test]
    fn falls_back_per_page() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(
                Strategy::Layout,
                vec![Words(vec!["one", "two"]), Fail, Empty, Words(vec!["six"])],
            ),
            ScriptedBackend::new(
                Strategy::TextStream,
                vec![Fail, Words(vec!["three"]), Words(vec!["four", "five"]), Fail],
            ),
            fast_limits(),
        );

        let index = extractor.extract(b"%PDF").unwrap();
        assert_eq!(
            strategies(&index),
            vec![
                Some(Strategy::Layout),
                Some(Strategy::TextStream),
                Some(Strategy::TextStream),
                Some(Strategy::Layout),
            ]
        );
        let texts: Vec<&str> = index.words().iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three", "four", "five", "six"]);
    }

    #[test]
    fn both_failing_on_a_page_is_partial() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(Strategy::Layout, vec![Words(vec!["a"]), Fail]),
            ScriptedBackend::new(Strategy::TextStream, vec![Words(vec!["a"]), Fail]),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        assert_eq!(index.total_word_count(), 1);
        let summary = index.extraction_summary();
        assert_eq!(summary.failed_pages, vec![2]);
        assert!(index.page(2).unwrap().failure.as_deref().unwrap().contains("bad content stream"));
    }

    #[test]
    fn blank_pages_are_kept_and_reported() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(Strategy::Layout, vec![Words(vec!["a"]), Empty, Empty]),
            ScriptedBackend::new(Strategy::TextStream, vec![Words(vec!["a"]), Empty, Fail]),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        assert_eq!(strategies(&index), vec![Some(Strategy::Layout); 3]);
        let summary = index.extraction_summary();
        assert_eq!(summary.empty_pages, vec![2, 3]);
        assert!(summary.failed_pages.is_empty());
        assert!(summary.image_only_pages.is_empty());
    }

    #[test]
    fn image_only_pages_are_not_retried() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(Strategy::Layout, vec![ImageOnly, Words(vec!["x"])]),
            ScriptedBackend::new(Strategy::TextStream, vec![Words(vec!["junk"]), Fail]),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        assert!(index.page(1).unwrap().image_only);
        assert_eq!(index.page(1).unwrap().strategy, Some(Strategy::Layout));
        assert_eq!(index.total_word_count(), 1);
    }

    #[test]
    fn stalled_page_falls_back_and_worker_restarts() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(
                Strategy::Layout,
                vec![Hang, Words(vec!["after"]), Panic, Words(vec!["end"])],
            ),
            ScriptedBackend::new(
                Strategy::TextStream,
                vec![Words(vec!["rescued"]), Fail, Words(vec!["saved"]), Fail],
            ),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        let texts: Vec<&str> = index.words().iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["rescued", "after", "saved", "end"]);
        assert_eq!(index.page(1).unwrap().strategy, Some(Strategy::TextStream));
        assert_eq!(index.page(2).unwrap().strategy, Some(Strategy::Layout));
    }

    #[test]
    fn primary_open_failure_uses_secondary_for_all_pages() {
        let extractor = Extractor::new(
            ScriptedBackend::broken(Strategy::Layout),
            ScriptedBackend::new(
                Strategy::TextStream,
                vec![Behavior::Words(vec!["only", "text"])],
            ),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        assert_eq!(strategies(&index), vec![Some(Strategy::TextStream)]);
    }

    #[test]
    fn neither_strategy_opens() {
        let extractor = Extractor::new(
            ScriptedBackend::broken(Strategy::Layout),
            ScriptedBackend::broken(Strategy::TextStream),
            fast_limits(),
        );
        let err = extractor.extract(b"garbage").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Extraction {
                pages_attempted: 0,
                byte_size: 7,
                ..
            }
        ));
    }

    #[test]
    fn empty_page_tree_is_an_extraction_error() {
        let extractor = Extractor::single(
            ScriptedBackend::new(Strategy::Layout, Vec::new()),
            fast_limits(),
        );
        assert!(matches!(
            extractor.extract(b"%PDF").unwrap_err(),
            DocumentError::Extraction { pages_attempted: 0, ref message, .. } if message.contains("no pages")
        ));
    }

    #[test]
    fn every_page_failing_is_fatal() {
        use Behavior::*;
        let extractor = Extractor::single(
            ScriptedBackend::new(Strategy::Layout, vec![Fail, Fail]),
            fast_limits(),
        );
        let err = extractor.extract(b"%PDF").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Extraction {
                pages_attempted: 2,
                ..
            }
        ));
    }

    #[test]
    fn image_only_document_has_no_text() {
        use Behavior::*;
        let extractor = Extractor::new(
            ScriptedBackend::new(Strategy::Layout, vec![ImageOnly, ImageOnly, Empty]),
            ScriptedBackend::new(Strategy::TextStream, vec![Empty, Empty, Empty]),
            fast_limits(),
        );
        assert_eq!(
            extractor.extract(b"%PDF").unwrap_err(),
            DocumentError::NoExtractableText {
                pages_attempted: 3,
                image_only_pages: 2,
            }
        );
    }

    #[test]
    fn oversized_source_is_rejected_before_parsing() {
        // A broken backend would fail with Extraction if it were reached.
        let extractor = Extractor::single(
            ScriptedBackend::broken(Strategy::Layout),
            ExtractionLimits {
                max_source_bytes: 4,
                ..fast_limits()
            },
        );
        assert_eq!(
            extractor.extract(b"%PDF-1.7").unwrap_err(),
            DocumentError::TooLarge {
                limit: SizeLimit::SourceBytes,
                actual: 8,
                max: 4,
            }
        );
    }

    #[test]
    fn character_cap_stops_extraction() {
        use Behavior::*;
        let extractor = Extractor::single(
            ScriptedBackend::new(
                Strategy::Layout,
                vec![Words(vec!["abcde", "fghij"]), Words(vec!["klmno"])],
            ),
            ExtractionLimits {
                max_characters: 12,
                ..fast_limits()
            },
        );
        let err = extractor.extract(b"%PDF").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::TooLarge {
                limit: SizeLimit::Characters,
                actual: 15,
                max: 12,
            }
        ));
    }

    #[test]
    fn tokens_are_normalized() {
        let extractor = Extractor::single(
            ScriptedBackend::new(
                Strategy::Layout,
                vec![Behavior::Words(vec!["\u{FB01}rst", "\u{FFFD}", "word"])],
            ),
            fast_limits(),
        );
        let index = extractor.extract(b"%PDF").unwrap();
        let texts: HashMap<usize, &str> = index
            .words()
            .iter()
            .map(|w| (w.global_index, w.text.as_str()))
            .collect();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[&0], "first");
        assert_eq!(texts[&1], "word");
    }
}
