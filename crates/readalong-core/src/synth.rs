//! The speech synthesis seam.
//!
//! The core only hands a synthesizer the text of a resolved chunk; voices,
//! models and audio formats are the implementation's business.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

/// Longest text accepted in one synthesis request.
pub const MAX_SYNTHESIS_CHARS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub audio: Vec<u8>,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("nothing to synthesize")]
    EmptyText,
    #[error("text too long for synthesis: {chars} characters (limit {max})")]
    TooLong { chars: usize, max: usize },
    #[error("synthesis failed: {0}")]
    Failed(String),
}

/// Check the request limits every synthesizer shares.
pub fn validate_text(text: &str) -> Result<(), SynthesisError> {
    if text.trim().is_empty() {
        return Err(SynthesisError::EmptyText);
    }
    let chars = text.chars().count();
    if chars > MAX_SYNTHESIS_CHARS {
        return Err(SynthesisError::TooLong {
            chars,
            max: MAX_SYNTHESIS_CHARS,
        });
    }
    Ok(())
}

/// Trait for text-to-speech engines.
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SynthesizedAudio, SynthesisError>> + Send + 'a>>;
}

/// Speaking rate used to estimate durations (words per second, ~150 wpm).
const WORDS_PER_SECOND: f64 = 2.5;

/// A synthesizer that "speaks" by returning the UTF-8 text as its audio and
/// estimating how long a voice would take to read it.
///
/// Used for dry runs and tests. Failures can be scripted per call.
#[derive(Debug, Default)]
pub struct EchoSynthesizer {
    /// Scripted failures, consumed one per call before succeeding.
    failures: Mutex<Vec<String>>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl EchoSynthesizer {
    pub const SAMPLE_RATE: u32 = 24_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `messages.len()` calls, in order.
    pub fn failing(messages: Vec<String>) -> Self {
        let mut messages = messages;
        messages.reverse();
        Self {
            failures: Mutex::new(messages),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `synthesize()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Seconds a voice would take to read `text`.
    pub fn estimate_duration(text: &str) -> f64 {
        text.split_whitespace().count() as f64 / WORDS_PER_SECOND
    }

    fn next_failure(&self) -> Option<String> {
        self.failures.lock().ok().and_then(|mut f| f.pop())
    }
}

impl SpeechSynthesizer for EchoSynthesizer {
    fn name(&self) -> &str {
        "echo"
    }

    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SynthesizedAudio, SynthesisError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let failure = self.next_failure();
        let delay = self.delay;

        Box::pin(async move {
            validate_text(text)?;
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if let Some(message) = failure {
                return Err(SynthesisError::Failed(message));
            }
            tracing::trace!(voice = voice_id, chars = text.len(), "echo synthesis");
            Ok(SynthesizedAudio {
                audio: text.as_bytes().to_vec(),
                sample_rate: Self::SAMPLE_RATE,
                duration_seconds: Self::estimate_duration(text),
            })
        })
    }
}
