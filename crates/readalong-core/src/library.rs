//! Documents and reading sessions shared across requests.
//!
//! Indexing runs on the blocking pool, bounded by a semaphore. A document
//! becomes [`DocumentStatus::Ready`] only after detection has finished, and
//! only then can sessions open on it. Each session sits behind its own async
//! mutex, so one reader's requests are serialized while different readers
//! resolve chunks against the same `Arc<DocumentIndex>` concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chunk::{Chunk, ChunkResolver};
use crate::detect::PatternDetector;
use crate::extract::Extractor;
use crate::index::DocumentIndex;
use crate::progress::ProgressStore;
use crate::session::{PlaybackSession, ProgressSnapshot, SessionError};
use crate::synth::{SpeechSynthesizer, SynthesisError, SynthesizedAudio};
use crate::{DocumentError, LibraryConfig, ReadalongConfig, index_document};

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    Indexing,
    Ready(Arc<DocumentIndex>),
    Failed(DocumentError),
}

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("document {0} is still being indexed")]
    NotReady(String),
    #[error("document {id} failed to index: {source}")]
    Document {
        id: String,
        #[source]
        source: DocumentError,
    },
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("indexing task failed: {0}")]
    Task(String),
    #[error("library is shutting down")]
    Cancelled,
}

/// Where to read from next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// The reader clicked the word at this global index.
    From(usize),
    /// Continue after the last delivered chunk.
    Next,
}

/// A chunk with its audio, as handed back to the reader.
#[derive(Debug, Clone)]
pub struct Narration {
    pub chunk: Chunk,
    pub audio: SynthesizedAudio,
    pub progress: ProgressSnapshot,
}

struct SessionEntry {
    user_id: String,
    session: Mutex<PlaybackSession>,
}

pub struct Library {
    extractor: Extractor,
    detector: PatternDetector,
    resolver: ChunkResolver,
    config: LibraryConfig,
    documents: DashMap<String, DocumentStatus>,
    sessions: DashMap<String, Arc<SessionEntry>>,
    indexing: Arc<Semaphore>,
    progress: Option<Arc<dyn ProgressStore>>,
    cancel: CancellationToken,
    next_session: AtomicU64,
}

impl Library {
    pub fn new(extractor: Extractor, config: &ReadalongConfig) -> Self {
        Self {
            extractor,
            detector: PatternDetector::new(config.detection.clone()),
            resolver: ChunkResolver::new(config.chunking.clone()),
            config: config.library.clone(),
            documents: DashMap::new(),
            sessions: DashMap::new(),
            indexing: Arc::new(Semaphore::new(config.library.max_concurrent_indexing.max(1))),
            progress: None,
            cancel: CancellationToken::new(),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn with_progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress = Some(store);
        self
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Extract and detect a document off the async runtime.
    ///
    /// The document reports [`DocumentStatus::Indexing`] until this returns.
    pub async fn index_document(
        &self,
        document_id: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Arc<DocumentIndex>, LibraryError> {
        let id = document_id.into();
        self.documents.insert(id.clone(), DocumentStatus::Indexing);

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.indexing.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            self.documents.remove(&id);
            return Err(LibraryError::Cancelled);
        };

        let extractor = self.extractor.clone();
        let detector = self.detector.clone();
        let byte_size = bytes.len();
        tracing::info!(document_id = %id, byte_size, "indexing document");

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            index_document(&extractor, &detector, &bytes)
        })
        .await;

        match joined {
            Ok(Ok((index, report))) => {
                let index = Arc::new(index);
                tracing::info!(
                    document_id = %id,
                    pages = index.pages().len(),
                    words = index.total_word_count(),
                    filtered = report.words_flagged,
                    "document ready"
                );
                self.documents
                    .insert(id, DocumentStatus::Ready(index.clone()));
                Ok(index)
            }
            Ok(Err(e)) => {
                tracing::warn!(document_id = %id, error = %e, "indexing failed");
                self.documents
                    .insert(id.clone(), DocumentStatus::Failed(e.clone()));
                Err(LibraryError::Document { id, source: e })
            }
            Err(join_err) => {
                self.documents.remove(&id);
                Err(LibraryError::Task(join_err.to_string()))
            }
        }
    }

    pub fn status(&self, document_id: &str) -> Option<DocumentStatus> {
        self.documents.get(document_id).map(|s| s.value().clone())
    }

    /// The ready index for `document_id`.
    pub fn document(&self, document_id: &str) -> Result<Arc<DocumentIndex>, LibraryError> {
        match self.status(document_id) {
            Some(DocumentStatus::Ready(index)) => Ok(index),
            Some(DocumentStatus::Indexing) => Err(LibraryError::NotReady(document_id.to_string())),
            Some(DocumentStatus::Failed(source)) => Err(LibraryError::Document {
                id: document_id.to_string(),
                source,
            }),
            None => Err(LibraryError::UnknownDocument(document_id.to_string())),
        }
    }

    /// Forget a document. Open sessions keep their own reference.
    pub fn remove_document(&self, document_id: &str) -> bool {
        self.documents.remove(document_id).is_some()
    }

    /// Start a reading session, resuming from saved progress when available.
    pub async fn open_session(
        &self,
        document_id: &str,
        user_id: &str,
    ) -> Result<String, LibraryError> {
        let document = self.document(document_id)?;
        let total = document.total_word_count();
        let mut session = PlaybackSession::new(
            document_id,
            self.resolver.clone(),
            self.config.filtering_enabled_by_default,
        );
        session.attach(document)?;

        if let Some(store) = &self.progress {
            match store.load_progress(user_id, document_id) {
                Ok(Some(index)) if index < total => session.seek(index)?,
                Ok(_) => {}
                Err(e) => tracing::warn!(user_id, document_id, error = %e, "could not load progress"),
            }
        }

        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("{document_id}#{n}");
        tracing::debug!(%session_id, user_id, position = session.current_global_index(), "session opened");
        self.sessions.insert(
            session_id.clone(),
            Arc::new(SessionEntry {
                user_id: user_id.to_string(),
                session: Mutex::new(session),
            }),
        );
        Ok(session_id)
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, LibraryError> {
        self.sessions
            .get(session_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| LibraryError::UnknownSession(session_id.to_string()))
    }

    /// Resolve the next chunk for a session, synthesize it and advance.
    ///
    /// On synthesis failure the position is left where it was and the
    /// session drops back to `Ready`.
    pub async fn narrate(
        &self,
        session_id: &str,
        cue: Cue,
        synthesizer: &dyn SpeechSynthesizer,
        voice_id: Option<&str>,
    ) -> Result<Narration, LibraryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;

        let chunk = match cue {
            Cue::From(index) => session.play_from(index)?.clone(),
            Cue::Next => session.continue_reading()?.clone(),
        };
        let voice = voice_id.unwrap_or(&self.config.default_voice);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = synthesizer.synthesize(&chunk.text, voice) => Some(result),
        };
        let audio = match result {
            Some(Ok(audio)) => audio,
            Some(Err(e)) => {
                let _ = session.stop();
                tracing::warn!(%session_id, synthesizer = synthesizer.name(), error = %e, "synthesis failed");
                return Err(e.into());
            }
            None => {
                let _ = session.stop();
                return Err(LibraryError::Cancelled);
            }
        };

        session.chunk_delivered()?;
        let progress = session.progress();
        self.save_progress(&entry.user_id, &progress);

        Ok(Narration {
            chunk,
            audio,
            progress,
        })
    }

    /// Run a state change (pause, resume, filtering toggle, ...) on a session.
    pub async fn update_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut PlaybackSession) -> Result<R, SessionError>,
    ) -> Result<R, LibraryError> {
        let entry = self.entry(session_id)?;
        let mut session = entry.session.lock().await;
        Ok(f(&mut session)?)
    }

    /// End a session, saving its final position.
    pub async fn close_session(&self, session_id: &str) -> Result<ProgressSnapshot, LibraryError> {
        let (_, entry) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| LibraryError::UnknownSession(session_id.to_string()))?;
        let mut session = entry.session.lock().await;
        let progress = session.progress();
        self.save_progress(&entry.user_id, &progress);
        session.close()?;
        Ok(progress)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stop waiting indexing jobs and in-flight synthesis.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn save_progress(&self, user_id: &str, progress: &ProgressSnapshot) {
        let Some(store) = &self.progress else {
            return;
        };
        if let Err(e) = store.save_progress(
            user_id,
            &progress.document_id,
            progress.global_index,
            progress.total_words,
        ) {
            tracing::warn!(
                user_id,
                document_id = %progress.document_id,
                error = %e,
                "could not save progress"
            );
        }
    }
}
