//! Run configuration.
//!
//! The binary builds one [`PipelineConfig`] at startup (settings file, then
//! flags, then API keys from the environment) and hands it to the
//! orchestrator. Nothing below the orchestrator reads configuration sources.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Content category a run produces a video for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Niche {
    #[default]
    Motivation,
    Tech,
    Facts,
    Finance,
    Entertainment,
}

impl Niche {
    pub const ALL: [Niche; 5] = [
        Niche::Motivation,
        Niche::Tech,
        Niche::Facts,
        Niche::Finance,
        Niche::Entertainment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Niche::Motivation => "motivation",
            Niche::Tech => "tech",
            Niche::Facts => "facts",
            Niche::Finance => "finance",
            Niche::Entertainment => "entertainment",
        }
    }

    /// Stock footage queries that suit the niche visually.
    pub fn search_terms(self) -> &'static [&'static str] {
        match self {
            Niche::Motivation => &[
                "success business",
                "morning sunrise",
                "workout fitness",
                "city aerial",
                "nature mountains",
                "running athlete",
                "typing laptop",
                "meditation peaceful",
                "ocean waves",
            ],
            Niche::Tech => &[
                "technology",
                "coding programming",
                "smartphone mobile",
                "futuristic",
                "computer screen",
                "robot ai",
                "circuit board",
                "data center",
                "digital abstract",
            ],
            Niche::Facts => &[
                "space universe",
                "nature wildlife",
                "ocean underwater",
                "science laboratory",
                "ancient history",
                "brain mind",
                "earth planet",
                "microscope",
                "abstract patterns",
            ],
            Niche::Finance => &[
                "money cash",
                "stock market",
                "business office",
                "cryptocurrency",
                "luxury lifestyle",
                "city skyline",
                "calculator finance",
                "gold coins",
                "real estate",
            ],
            Niche::Entertainment => &[
                "party celebration",
                "movie cinema",
                "gaming",
                "concert crowd",
                "red carpet",
                "social media",
                "trending viral",
                "colorful abstract",
                "neon lights",
            ],
        }
    }

    /// Subreddit whose hot listing stands in for the niche's trend feed.
    pub fn subreddit(self) -> &'static str {
        match self {
            Niche::Motivation => "GetMotivated",
            Niche::Tech => "technology",
            Niche::Facts => "todayilearned",
            Niche::Finance => "personalfinance",
            Niche::Entertainment => "movies",
        }
    }
}

impl fmt::Display for Niche {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Niche {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Niche::ALL
            .into_iter()
            .find(|n| n.as_str() == wanted)
            .ok_or_else(|| format!("unknown niche '{}'", s))
    }
}

/// Root configuration, immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub niche: Niche,
    pub duration: DurationBounds,
    pub segmenter: SegmenterConfig,
    pub script: ScriptConfig,
    pub captions: CaptionConfig,
    pub voice: VoiceConfig,
    pub music: MusicConfig,
    pub media: MediaConfig,
    pub composition: CompositionConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub output: OutputConfig,
    pub trends: TrendConfig,
    pub http: HttpConfig,
    #[serde(skip)]
    pub keys: ApiKeys,
}

/// Allowed length of the exported video, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DurationBounds {
    pub min_seconds: f64,
    pub max_seconds: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Soft target for one segment's spoken length.
    pub max_segment_seconds: f64,
    pub words_per_minute: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ScriptConfig {
    /// Narrate the niche's template script when generation fails for any
    /// reason other than bad credentials. Off by default: such a run fails.
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionConfig {
    /// Words per caption cue.
    pub chunk_words: usize,
    pub font_size: u32,
    pub max_line_chars: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VoiceProvider {
    #[default]
    Piper,
    #[value(name = "elevenlabs")]
    ElevenLabs,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    #[default]
    Male,
    Female,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub provider: VoiceProvider,
    pub gender: VoiceGender,
    pub piper_model: PathBuf,
    pub elevenlabs_model: String,
    pub timeout_seconds: u64,
    /// Speaking speed multiplier; 1.0 is the voice's natural pace.
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MusicConfig {
    pub path: Option<PathBuf>,
    /// Multiplier applied to the music bed under the narration.
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MediaConfig {
    /// Distinct queries tried per segment before giving up.
    pub query_attempts: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositionConfig {
    /// Longest stretch the footage may be extended past the narration.
    pub max_extension_seconds: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total calls per stage, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub dir: PathBuf,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendSourceKind {
    #[default]
    Curated,
    Reddit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TrendConfig {
    pub source: TrendSourceKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

/// Credentials for the hosted services. Never serialized.
#[derive(Clone, PartialEq, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub pexels: Option<String>,
    pub elevenlabs: Option<String>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai: read("OPENAI_API_KEY"),
            pexels: read("PEXELS_API_KEY"),
            elevenlabs: read("ELEVENLABS_API_KEY"),
        }
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ApiKeys")
            .field("openai", &mask(&self.openai))
            .field("pexels", &mask(&self.pexels))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .finish()
    }
}

impl Default for DurationBounds {
    fn default() -> Self {
        Self {
            min_seconds: 30.0,
            max_seconds: 60.0,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_segment_seconds: 10.0,
            words_per_minute: 140.0,
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            chunk_words: 5,
            font_size: 28,
            max_line_chars: 24,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: VoiceProvider::Piper,
            gender: VoiceGender::Male,
            piper_model: PathBuf::from("./tts/en_US-hfc_male-medium.onnx"),
            elevenlabs_model: "eleven_monolingual_v1".to_string(),
            timeout_seconds: 120,
            speed: 1.0,
        }
    }
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            path: None,
            volume: 0.15,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            query_attempts: 3,
            per_page: 5,
        }
    }
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            max_extension_seconds: 15.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 1,
            max_concurrency: 2,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            dir: PathBuf::from("output"),
            work_dir: PathBuf::from("rs_tmp"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

impl RetryConfig {
    /// Delay before the given retry (1-based), doubling each time up to the cap.
    pub fn backoff(&self, retry: u32) -> std::time::Duration {
        let exp = retry.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        std::time::Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl PipelineConfig {
    /// Reads a TOML settings file. Missing sections take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.duration.min_seconds <= 0.0 || self.duration.min_seconds > self.duration.max_seconds {
            errors.push(format!(
                "duration bounds [{}, {}] are not a valid range",
                self.duration.min_seconds, self.duration.max_seconds
            ));
        }
        if self.segmenter.words_per_minute <= 0.0 || self.segmenter.max_segment_seconds <= 0.0 {
            errors.push("segmenter pacing must be positive".to_string());
        }
        if !(0.5..=2.0).contains(&self.voice.speed) {
            errors.push(format!("voice.speed {} is outside [0.5, 2]", self.voice.speed));
        }
        if self.captions.chunk_words == 0 {
            errors.push("captions.chunk_words must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.music.volume) {
            errors.push(format!("music.volume {} is outside [0, 1]", self.music.volume));
        }
        if self.media.query_attempts == 0 {
            errors.push("media.query_attempts must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.batch.max_concurrency == 0 {
            errors.push("batch.max_concurrency must be at least 1".to_string());
        }
        if self.output.width == 0 || self.output.height == 0 || self.output.width > self.output.height {
            errors.push(format!(
                "output resolution {}x{} is not portrait",
                self.output.width, self.output.height
            ));
        }
        if self.keys.openai.is_none() {
            errors.push("OpenAI API key is missing".to_string());
        }
        if self.keys.pexels.is_none() {
            errors.push("Pexels API key is missing".to_string());
        }
        if self.voice.provider == VoiceProvider::ElevenLabs && self.keys.elevenlabs.is_none() {
            errors.push("ElevenLabs voice selected but its API key is missing".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
