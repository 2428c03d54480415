use std::path::PathBuf;

use thiserror::Error;

pub mod backend;
pub mod chunk;
pub mod config_file;
pub mod detect;
pub mod extract;
pub mod index;
pub mod layout;
pub mod library;
pub mod progress;
pub mod session;
pub mod synth;
pub mod text;

// Re-export for convenience
pub use backend::{BackendError, PageSource, PdfBackend, RawPage, RawWord, Strategy};
pub use chunk::{Chunk, ChunkConfig, ChunkError, ChunkResolver, resolve_chunk};
pub use detect::{DetectionConfig, DetectionReport, PatternCandidate, PatternDetector, Zone};
pub use extract::{ExtractionLimits, Extractor};
pub use index::{BBox, DocumentIndex, ExtractedPage, ExtractionSummary, Page, Word, WordView};
pub use library::{Cue, DocumentStatus, Library, LibraryError, Narration};
pub use progress::{MemoryProgressStore, ProgressError, ProgressStore, SqliteProgressStore};
pub use session::{PlaybackSession, PlaybackState, ProgressSnapshot, SessionError};
pub use synth::{
    EchoSynthesizer, MAX_SYNTHESIS_CHARS, SpeechSynthesizer, SynthesisError, SynthesizedAudio,
};

/// Which size cap a document exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    SourceBytes,
    Characters,
}

impl std::fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeLimit::SourceBytes => f.write_str("bytes"),
            SizeLimit::Characters => f.write_str("characters"),
        }
    }
}

/// Document-level failures. Page-level failures never surface here; they are
/// recorded on the page and the document stays usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document too large: {actual} {limit} (limit {max})")]
    TooLarge {
        limit: SizeLimit,
        actual: usize,
        max: usize,
    },
    #[error("could not extract text ({pages_attempted} pages attempted, {byte_size} bytes): {message}")]
    Extraction {
        pages_attempted: usize,
        byte_size: usize,
        message: String,
    },
    #[error(
        "no extractable text in {pages_attempted} pages ({image_only_pages} image-only); the document may need OCR"
    )]
    NoExtractableText {
        pages_attempted: usize,
        image_only_pages: usize,
    },
}

/// Settings for the [`Library`] and reading sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryConfig {
    /// Documents indexed at the same time; further uploads wait.
    pub max_concurrent_indexing: usize,
    pub default_voice: String,
    /// SQLite file for reading progress. `None` keeps progress in memory.
    pub progress_db: Option<PathBuf>,
    pub filtering_enabled_by_default: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_indexing: 2,
            default_voice: "en-US-AndrewNeural".to_string(),
            progress_db: None,
            filtering_enabled_by_default: true,
        }
    }
}

/// Top-level configuration for indexing and reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadalongConfig {
    pub extraction: ExtractionLimits,
    pub detection: DetectionConfig,
    pub chunking: ChunkConfig,
    pub library: LibraryConfig,
}

/// Extract a document and run boilerplate detection on it.
///
/// The returned index is detected and ready to be shared.
pub fn index_document(
    extractor: &Extractor,
    detector: &PatternDetector,
    bytes: &[u8],
) -> Result<(DocumentIndex, DetectionReport), DocumentError> {
    let mut index = extractor.extract(bytes)?;
    let report = detector.detect(&mut index);
    Ok((index, report))
}
