use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use readalong_core::{
    DetectionReport, DocumentError, DocumentIndex, ExtractionLimits, Extractor, Library,
    MemoryProgressStore, PatternDetector, ProgressError, ProgressStore, ReadalongConfig, SizeLimit,
    SqliteProgressStore,
};
use readalong_pdf_lopdf::LopdfBackend;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),
}

/// The extractor used for uploads.
///
/// With the `pdf` feature the MuPDF layout strategy runs first and the
/// lopdf text-stream strategy picks up pages it cannot read. Without it,
/// every page goes through the text-stream strategy.
#[cfg(feature = "pdf")]
pub fn default_extractor(limits: ExtractionLimits) -> Extractor {
    Extractor::new(
        Arc::new(readalong_pdf_mupdf::MupdfBackend::new()),
        Arc::new(LopdfBackend::new()),
        limits,
    )
}

#[cfg(not(feature = "pdf"))]
pub fn default_extractor(limits: ExtractionLimits) -> Extractor {
    Extractor::single(Arc::new(LopdfBackend::new()), limits)
}

/// Extract and detect a PDF with default settings.
pub fn build_document_index(bytes: &[u8]) -> Result<DocumentIndex, DocumentError> {
    build_document_index_with(bytes, &ReadalongConfig::default()).map(|(index, _)| index)
}

/// Extract and detect a PDF, returning the detection report alongside.
pub fn build_document_index_with(
    bytes: &[u8],
    config: &ReadalongConfig,
) -> Result<(DocumentIndex, DetectionReport), DocumentError> {
    let extractor = default_extractor(config.extraction.clone());
    let detector = PatternDetector::new(config.detection.clone());
    readalong_core::index_document(&extractor, &detector, bytes)
}

/// Read a PDF from disk and index it.
///
/// Oversized files are rejected from their metadata before being read.
pub fn index_file(
    path: &Path,
    config: &ReadalongConfig,
) -> Result<(DocumentIndex, DetectionReport), IngestError> {
    let bytes = read_pdf(path, &config.extraction)?;
    Ok(build_document_index_with(&bytes, config)?)
}

/// Read a PDF's bytes, enforcing the source size cap up front.
pub fn read_pdf(path: &Path, limits: &ExtractionLimits) -> Result<Vec<u8>, IngestError> {
    let io_error = |source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = std::fs::metadata(path).map_err(io_error)?.len() as usize;
    if size > limits.max_source_bytes {
        return Err(DocumentError::TooLarge {
            limit: SizeLimit::SourceBytes,
            actual: size,
            max: limits.max_source_bytes,
        }
        .into());
    }
    std::fs::read(path).map_err(io_error)
}

/// Document id for a file: its stem, or the whole file name when it has none.
pub fn document_id(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

/// Build a [`Library`] with the default extractor and a progress store.
///
/// Progress goes to SQLite when `library.progress_db` is set, otherwise it
/// lives in memory for the life of the process.
pub fn open_library(config: &ReadalongConfig) -> Result<Library, IngestError> {
    let store: Arc<dyn ProgressStore> = match &config.library.progress_db {
        Some(path) => {
            tracing::debug!(path = %path.display(), "opening progress database");
            Arc::new(SqliteProgressStore::open(path)?)
        }
        None => Arc::new(MemoryProgressStore::new()),
    };
    Ok(Library::new(default_extractor(config.extraction.clone()), config).with_progress_store(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_uses_file_stem() {
        assert_eq!(document_id(Path::new("/books/moby-dick.pdf")), "moby-dick");
        assert_eq!(document_id(Path::new("notes")), "notes");
        assert_eq!(document_id(Path::new("/")), "document");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_pdf(
            Path::new("/nonexistent/readalong/book.pdf"),
            &ExtractionLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
        assert!(err.to_string().contains("book.pdf"));
    }

    #[test]
    fn oversized_file_is_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, vec![b'x'; 2048]).unwrap();
        let limits = ExtractionLimits {
            max_source_bytes: 1024,
            ..Default::default()
        };
        let err = read_pdf(&path, &limits).unwrap_err();
        assert!(matches!(
            err,
            IngestError::Document(DocumentError::TooLarge {
                limit: SizeLimit::SourceBytes,
                actual: 2048,
                max: 1024,
            })
        ));
    }
}
