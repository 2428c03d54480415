//! Per-reader playback state over one shared document.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{Chunk, ChunkError, ChunkResolver};
use crate::index::DocumentIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Ready,
    Playing,
    Paused,
    Ended,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        state: PlaybackState,
        action: &'static str,
    },
    #[error("document has not finished boilerplate detection")]
    NotReady,
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

/// Position snapshot handed to the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub document_id: String,
    pub global_index: usize,
    /// 1-based page of `global_index`, if it is inside the document.
    pub page: Option<usize>,
    pub total_words: usize,
}

/// One reader's linear progress through a document.
///
/// Calls must be serialized by the owner; the document itself is shared
/// read-only with other sessions.
#[derive(Debug)]
pub struct PlaybackSession {
    document_id: String,
    document: Option<Arc<DocumentIndex>>,
    resolver: ChunkResolver,
    state: PlaybackState,
    current_global_index: usize,
    current_chunk: Option<Chunk>,
    filtering_enabled: bool,
}

impl PlaybackSession {
    pub fn new(document_id: impl Into<String>, resolver: ChunkResolver, filtering_enabled: bool) -> Self {
        Self {
            document_id: document_id.into(),
            document: None,
            resolver,
            state: PlaybackState::Idle,
            current_global_index: 0,
            current_chunk: None,
            filtering_enabled,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current_global_index(&self) -> usize {
        self.current_global_index
    }

    pub fn current_chunk(&self) -> Option<&Chunk> {
        self.current_chunk.as_ref()
    }

    pub fn filtering_enabled(&self) -> bool {
        self.filtering_enabled
    }

    pub fn document(&self) -> Option<&Arc<DocumentIndex>> {
        self.document.as_ref()
    }

    /// `Idle → Ready`. The document must already be detected.
    pub fn attach(&mut self, document: Arc<DocumentIndex>) -> Result<(), SessionError> {
        self.expect(&[PlaybackState::Idle], "attach a document")?;
        if !document.is_detected() {
            return Err(SessionError::NotReady);
        }
        self.document = Some(document);
        self.state = PlaybackState::Ready;
        Ok(())
    }

    /// Move the reading position without starting playback, e.g. to restore
    /// saved progress. Positions past the end are clamped to the end.
    pub fn seek(&mut self, global_index: usize) -> Result<(), SessionError> {
        self.expect(&[PlaybackState::Ready, PlaybackState::Paused], "seek")?;
        let total = self.total_words();
        self.current_global_index = global_index.min(total);
        self.current_chunk = None;
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Ready;
        }
        Ok(())
    }

    /// A click: resolve the chunk at `global_index` and start playing it.
    ///
    /// The literal clicked index is kept as the current position even when
    /// the chunk's first spoken word lies further on.
    pub fn play_from(&mut self, global_index: usize) -> Result<&Chunk, SessionError> {
        self.expect(
            &[PlaybackState::Ready, PlaybackState::Paused, PlaybackState::Playing],
            "play",
        )?;
        let chunk = self.resolve(global_index)?;
        self.current_global_index = global_index;
        Ok(self.start(chunk))
    }

    /// Resolve the next chunk from the current position.
    ///
    /// At the end of the document this returns `ChunkError::OutOfRange` and
    /// the session settles in `Ready` at the final position.
    pub fn continue_reading(&mut self) -> Result<&Chunk, SessionError> {
        self.expect(
            &[PlaybackState::Ready, PlaybackState::Paused, PlaybackState::Playing],
            "continue",
        )?;
        match self.resolve(self.current_global_index) {
            Ok(chunk) => Ok(self.start(chunk)),
            Err(e) => {
                self.state = PlaybackState::Ready;
                self.current_chunk = None;
                Err(e)
            }
        }
    }

    /// The current chunk's audio has been delivered; advance past it.
    pub fn chunk_delivered(&mut self) -> Result<usize, SessionError> {
        self.expect(&[PlaybackState::Playing], "mark delivered")?;
        let Some(chunk) = &self.current_chunk else {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "mark delivered",
            });
        };
        self.current_global_index = chunk.end_index;
        Ok(self.current_global_index)
    }

    /// `Playing → Paused`, keeping position and chunk as they are.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.expect(&[PlaybackState::Playing], "pause")?;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    /// `Paused → Playing`, returning the retained chunk.
    pub fn resume(&mut self) -> Result<&Chunk, SessionError> {
        self.expect(&[PlaybackState::Paused], "resume")?;
        match self.current_chunk {
            Some(ref chunk) => {
                self.state = PlaybackState::Playing;
                Ok(chunk)
            }
            None => Err(SessionError::InvalidTransition {
                state: self.state,
                action: "resume",
            }),
        }
    }

    /// Stop playback; the position is kept for the next `continue_reading`.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.expect(&[PlaybackState::Playing, PlaybackState::Paused], "stop")?;
        self.state = PlaybackState::Ready;
        Ok(())
    }

    /// Applies from the next resolved chunk; the current chunk is untouched.
    pub fn set_filtering(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.expect(
            &[
                PlaybackState::Idle,
                PlaybackState::Ready,
                PlaybackState::Paused,
                PlaybackState::Playing,
            ],
            "change filtering",
        )?;
        self.filtering_enabled = enabled;
        Ok(())
    }

    /// End the session and drop its state.
    pub fn close(&mut self) -> Result<(), SessionError> {
        if self.state == PlaybackState::Ended {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "close",
            });
        }
        self.state = PlaybackState::Ended;
        self.document = None;
        self.current_chunk = None;
        Ok(())
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            document_id: self.document_id.clone(),
            global_index: self.current_global_index,
            page: self
                .document
                .as_ref()
                .and_then(|d| d.page_of(self.current_global_index)),
            total_words: self.total_words(),
        }
    }

    fn total_words(&self) -> usize {
        self.document
            .as_ref()
            .map_or(0, |d| d.total_word_count())
    }

    fn resolve(&self, start: usize) -> Result<Chunk, SessionError> {
        let document = self.document.as_ref().ok_or(SessionError::NotReady)?;
        Ok(self
            .resolver
            .resolve_chunk(document, start, self.filtering_enabled)?)
    }

    fn start(&mut self, chunk: Chunk) -> &Chunk {
        tracing::debug!(
            document_id = %self.document_id,
            start = chunk.start_index,
            end = chunk.end_index,
            "playing chunk"
        );
        self.state = PlaybackState::Playing;
        self.current_chunk.insert(chunk)
    }

    fn expect(&self, allowed: &[PlaybackState], action: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkConfig;
    use crate::detect::PatternDetector;
    use crate::index::tests::page_of_words;

    fn detected_document(n: usize) -> Arc<DocumentIndex> {
        let texts: Vec<String> = (0..n).map(|i| format!("w{i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let mut index = DocumentIndex::from_pages(vec![page_of_words(&refs, 300.0)]);
        PatternDetector::default().detect(&mut index);
        Arc::new(index)
    }

    fn session(n: usize) -> PlaybackSession {
        let resolver = ChunkResolver::new(ChunkConfig {
            chunk_size: 10,
            lookahead: 0,
            ..Default::default()
        });
        let mut s = PlaybackSession::new("doc-1", resolver, true);
        s.attach(detected_document(n)).unwrap();
        s
    }

    #[test]
    fn attach_requires_detection() {
        let index = DocumentIndex::from_pages(vec![page_of_words(&["a"], 300.0)]);
        let mut s = PlaybackSession::new("doc", ChunkResolver::default(), true);
        assert_eq!(s.attach(Arc::new(index)), Err(SessionError::NotReady));
        assert_eq!(s.state(), PlaybackState::Idle);
    }

    #[test]
    fn click_then_continue_advances_without_repositioning() {
        let mut s = session(35);
        let chunk = s.play_from(5).unwrap().clone();
        assert_eq!((chunk.start_index, chunk.end_index), (5, 15));
        assert_eq!(s.current_global_index(), 5);
        assert_eq!(s.state(), PlaybackState::Playing);

        assert_eq!(s.chunk_delivered().unwrap(), 15);
        let next = s.continue_reading().unwrap();
        assert_eq!(next.start_index, 15);
        assert_eq!(next.end_index, 25);
    }

    #[test]
    fn pause_and_resume_keep_the_chunk() {
        let mut s = session(35);
        let chunk = s.play_from(0).unwrap().clone();
        s.pause().unwrap();
        assert_eq!(s.state(), PlaybackState::Paused);
        assert_eq!(s.resume().unwrap(), &chunk);
        assert_eq!(s.state(), PlaybackState::Playing);
    }

    #[test]
    fn filtering_toggle_applies_to_next_chunk_only() {
        let mut s = session(35);
        let first = s.play_from(0).unwrap().clone();
        s.pause().unwrap();
        s.set_filtering(false).unwrap();
        assert_eq!(s.current_chunk(), Some(&first));
        assert!(!s.filtering_enabled());
    }

    #[test]
    fn end_of_document_returns_to_ready() {
        let mut s = session(12);
        s.play_from(0).unwrap();
        s.chunk_delivered().unwrap();
        s.continue_reading().unwrap();
        assert_eq!(s.chunk_delivered().unwrap(), 12);

        let err = s.continue_reading().unwrap_err();
        assert_eq!(
            err,
            SessionError::Chunk(ChunkError::OutOfRange {
                index: 12,
                total: 12
            })
        );
        assert_eq!(s.state(), PlaybackState::Ready);
        assert_eq!(s.current_global_index(), 12);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut s = PlaybackSession::new("doc", ChunkResolver::default(), true);
        assert!(matches!(
            s.play_from(0),
            Err(SessionError::InvalidTransition {
                state: PlaybackState::Idle,
                ..
            })
        ));

        let mut s = session(20);
        assert!(s.pause().is_err());
        assert!(s.resume().is_err());
        assert!(s.chunk_delivered().is_err());

        s.close().unwrap();
        assert_eq!(s.state(), PlaybackState::Ended);
        assert!(s.close().is_err());
        assert!(s.continue_reading().is_err());
        assert!(s.set_filtering(true).is_err());
    }

    #[test]
    fn seek_restores_position() {
        let mut s = session(50);
        s.seek(30).unwrap();
        let chunk = s.continue_reading().unwrap();
        assert_eq!(chunk.start_index, 30);
        s.stop().unwrap();
        s.seek(10_000).unwrap();
        assert_eq!(s.current_global_index(), 50);
    }

    #[test]
    fn progress_snapshot() {
        let mut s = session(40);
        s.play_from(7).unwrap();
        let snap = s.progress();
        assert_eq!(snap.document_id, "doc-1");
        assert_eq!(snap.global_index, 7);
        assert_eq!(snap.page, Some(1));
        assert_eq!(snap.total_words, 40);
    }
}
