//! Boundaries to the hosted and local services a run depends on.
//!
//! Every adapter is stateless, applies its own timeout, reports failures as
//! [`ServiceError`] and never retries. Retry policy lives in the orchestrator.

pub mod http;
pub mod openai;
pub mod pexels;
pub mod trends;
pub mod tts;

use crate::audio::WordTiming;
use crate::compose::MediaClip;
use crate::config::{Niche, VoiceConfig};
use crate::error::ServiceError;
use crate::script::Topic;
use async_trait::async_trait;

pub use openai::OpenAiScriptWriter;
pub use pexels::PexelsSearch;
pub use trends::{CuratedTrends, RedditTrends};
pub use tts::{ElevenLabsVoice, PiperVoice};

/// Rendered narration for one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Speech {
    /// Complete WAV file bytes.
    pub wav: Vec<u8>,
    /// Seconds, measured from the rendered audio.
    pub duration: f64,
    pub words: Option<Vec<WordTiming>>,
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch_trend(&self, niche: Niche) -> Result<Topic, ServiceError>;
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Returns the generator's raw answer; parsing happens in [`crate::script`].
    async fn generate_script(&self, topic: &Topic) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_speech(&self, text: &str, voice: &VoiceConfig) -> Result<Speech, ServiceError>;
}

#[async_trait]
pub trait MediaSearch: Send + Sync {
    /// Candidates in preference order. Clips at least `min_duration` long come first.
    async fn search_media(&self, query: &str, min_duration: f64) -> Result<Vec<MediaClip>, ServiceError>;
}
