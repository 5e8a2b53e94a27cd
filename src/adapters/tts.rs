use super::http::{self, invalid};
use super::{Speech, SpeechSynthesizer};
use crate::audio::{WordTiming, pcm16_to_wav, wav_bytes_duration_seconds};
use crate::config::{ApiKeys, VoiceConfig, VoiceGender, VoiceProvider};
use crate::error::ServiceError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

const PIPER: &str = "piper";
const ELEVENLABS: &str = "elevenlabs";
const ELEVENLABS_SAMPLE_RATE: u32 = 22_050;
/// Speed range the hosted voice accepts.
const ELEVENLABS_SPEED: std::ops::RangeInclusive<f64> = 0.7..=1.2;

/// Builds the speech adapter the configuration asks for.
pub fn voice_from_config(voice: &VoiceConfig, keys: &ApiKeys, timeout: Duration) -> Result<Arc<dyn SpeechSynthesizer>, ServiceError> {
    match voice.provider {
        VoiceProvider::Piper => Ok(Arc::new(PiperVoice)),
        VoiceProvider::ElevenLabs => {
            let key = keys.elevenlabs.clone().ok_or_else(|| ServiceError::Unauthorized {
                service: ELEVENLABS,
                message: "no API key configured".to_string(),
            })?;
            Ok(Arc::new(ElevenLabsVoice::new(key, timeout)?))
        }
    }
}

/// Local synthesis through the `piper` command line tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PiperVoice;

fn piper_unavailable(message: impl Into<String>) -> ServiceError {
    ServiceError::Unavailable {
        service: PIPER,
        message: message.into(),
    }
}

/// Piper paces speech by phoneme length, the inverse of a speed multiplier.
fn piper_args(voice: &VoiceConfig, out_path: &Path) -> Vec<OsString> {
    vec![
        "--model".into(),
        voice.piper_model.clone().into_os_string(),
        "--output_file".into(),
        out_path.as_os_str().to_owned(),
        "--length_scale".into(),
        format!("{:.2}", 1.0 / voice.speed).into(),
    ]
}

impl PiperVoice {
    async fn run(&self, text: &str, voice: &VoiceConfig, out_path: &Path) -> Result<(), ServiceError> {
        let mut child = Command::new(PIPER)
            .args(piper_args(voice, out_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| piper_unavailable(format!("spawning piper: {}", e)))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| piper_unavailable("piper stdin was not captured"))?;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| piper_unavailable(format!("writing to piper: {}", e)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| piper_unavailable(format!("waiting for piper: {}", e)))?;
        if !status.success() {
            error!("Piper TTS command failed for {}", out_path.display());
            return Err(piper_unavailable(format!("piper exited with {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperVoice {
    async fn synthesize_speech(&self, text: &str, voice: &VoiceConfig) -> Result<Speech, ServiceError> {
        // Removed when dropped, whichever way synthesis ends.
        let out_file = tempfile::Builder::new()
            .prefix("shortsmith-piper-")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| piper_unavailable(format!("creating output file: {}", e)))?;
        info!("Calling Piper TTS for {} chars", text.len());

        let limit = Duration::from_secs(voice.timeout_seconds);
        let wav = match tokio::time::timeout(limit, self.run(text, voice, out_file.path())).await {
            Err(_) => return Err(piper_unavailable(format!("timed out after {:?}", limit))),
            Ok(result) => {
                result?;
                tokio::fs::read(out_file.path())
                    .await
                    .map_err(|e| piper_unavailable(format!("reading piper output: {}", e)))?
            }
        };

        let duration = wav_bytes_duration_seconds(&wav).map_err(|e| invalid(PIPER, format!("unreadable WAV: {}", e)))?;
        debug!("Piper rendered {:.2}s", duration);
        Ok(Speech {
            wav,
            duration,
            words: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    speed: f64,
}

impl VoiceSettings {
    fn for_voice(voice: &VoiceConfig) -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            speed: voice.speed.clamp(*ELEVENLABS_SPEED.start(), *ELEVENLABS_SPEED.end()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimestampedAudio {
    audio_base64: String,
    alignment: Option<Alignment>,
}

#[derive(Debug, Deserialize)]
struct Alignment {
    characters: Vec<String>,
    character_start_times_seconds: Vec<f64>,
    character_end_times_seconds: Vec<f64>,
}

/// Folds per-character alignment into whitespace-separated words.
fn words_from_alignment(alignment: &Alignment) -> Vec<WordTiming> {
    let mut words = Vec::new();
    let mut current: Option<WordTiming> = None;
    let timed = alignment
        .characters
        .iter()
        .zip(&alignment.character_start_times_seconds)
        .zip(&alignment.character_end_times_seconds);
    for ((ch, &start), &end) in timed {
        if ch.trim().is_empty() {
            words.extend(current.take());
            continue;
        }
        match current.as_mut() {
            Some(word) => {
                word.word.push_str(ch);
                word.end = end;
            }
            None => {
                current = Some(WordTiming {
                    word: ch.clone(),
                    start,
                    end,
                })
            }
        }
    }
    words.extend(current);
    words
}

/// Premium hosted voices with character-level timestamps.
#[derive(Debug, Clone)]
pub struct ElevenLabsVoice {
    client: Client,
    api_key: String,
    base_url: String,
}

impl ElevenLabsVoice {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http::client(ELEVENLABS, timeout)?,
            api_key: api_key.into(),
            base_url: "https://api.elevenlabs.io".to_string(),
        })
    }

    fn voice_id(gender: VoiceGender) -> &'static str {
        match gender {
            VoiceGender::Male => "pNInz6obpgDQGcFmaJgB",
            VoiceGender::Female => "EXAVITQu4vr4xnSDxMaL",
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsVoice {
    async fn synthesize_speech(&self, text: &str, voice: &VoiceConfig) -> Result<Speech, ServiceError> {
        let url = format!(
            "{}/v1/text-to-speech/{}/with-timestamps",
            self.base_url,
            Self::voice_id(voice.gender)
        );
        let body = ElevenLabsRequest {
            text,
            model_id: &voice.elevenlabs_model,
            voice_settings: VoiceSettings::for_voice(voice),
        };
        info!("Requesting ElevenLabs voiceover for {} chars", text.len());
        let request = self
            .client
            .post(&url)
            .query(&[("output_format", format!("pcm_{}", ELEVENLABS_SAMPLE_RATE))])
            .header("xi-api-key", &self.api_key)
            .json(&body);
        let response: TimestampedAudio = http::send_json(ELEVENLABS, request).await?;

        let pcm = STANDARD
            .decode(response.audio_base64.as_bytes())
            .map_err(|e| invalid(ELEVENLABS, format!("audio is not base64: {}", e)))?;
        if pcm.is_empty() {
            return Err(invalid(ELEVENLABS, "empty audio"));
        }
        let wav = pcm16_to_wav(&pcm, ELEVENLABS_SAMPLE_RATE).map_err(|e| invalid(ELEVENLABS, e.to_string()))?;
        let duration = wav_bytes_duration_seconds(&wav).map_err(|e| invalid(ELEVENLABS, e.to_string()))?;
        let words = response
            .alignment
            .as_ref()
            .map(words_from_alignment)
            .filter(|w| !w.is_empty());
        debug!(
            "ElevenLabs rendered {:.2}s with {} timed words",
            duration,
            words.as_ref().map_or(0, Vec::len)
        );
        Ok(Speech { wav, duration, words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment(text: &str, step: f64) -> Alignment {
        let characters: Vec<String> = text.chars().map(|c| c.to_string()).collect();
        let n = characters.len();
        Alignment {
            characters,
            character_start_times_seconds: (0..n).map(|i| i as f64 * step).collect(),
            character_end_times_seconds: (0..n).map(|i| (i + 1) as f64 * step).collect(),
        }
    }

    #[test]
    fn alignment_folds_into_words() {
        let words = words_from_alignment(&alignment("Go  now.", 0.1));
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word, "Go");
        assert_eq!(words[0].start, 0.0);
        assert!((words[0].end - 0.2).abs() < 1e-9);
        assert_eq!(words[1].word, "now.");
        assert!((words[1].start - 0.4).abs() < 1e-9);
        assert!((words[1].end - 0.8).abs() < 1e-9);
    }

    #[test]
    fn timestamped_payload_decodes() {
        let pcm = vec![0u8; ELEVENLABS_SAMPLE_RATE as usize * 2];
        let payload = format!(
            r#"{{"audio_base64":"{}","alignment":{{"characters":["H","i"],"character_start_times_seconds":[0.0,0.1],"character_end_times_seconds":[0.1,0.3]}}}}"#,
            STANDARD.encode(&pcm)
        );
        let parsed: TimestampedAudio = serde_json::from_str(&payload).unwrap();
        let decoded = STANDARD.decode(parsed.audio_base64.as_bytes()).unwrap();
        assert_eq!(decoded.len(), pcm.len());
        let words = words_from_alignment(parsed.alignment.as_ref().unwrap());
        assert_eq!(words[0].word, "Hi");
    }

    #[test]
    fn speed_sets_piper_length_scale() {
        let voice = VoiceConfig {
            speed: 1.25,
            ..VoiceConfig::default()
        };
        let args = piper_args(&voice, Path::new("/tmp/out.wav"));
        let at = args.iter().position(|a| a == "--length_scale").unwrap();
        assert_eq!(args[at + 1], "0.80");
        assert_eq!(args[at - 1], "/tmp/out.wav");

        let natural = piper_args(&VoiceConfig::default(), Path::new("o.wav"));
        assert_eq!(natural.last().unwrap(), "1.00");
    }

    #[test]
    fn speed_reaches_hosted_voice_settings_within_range() {
        let fast = VoiceConfig {
            speed: 1.5,
            ..VoiceConfig::default()
        };
        let body = serde_json::to_value(VoiceSettings::for_voice(&fast)).unwrap();
        assert_eq!(body["speed"], 1.2);
        let slowish = VoiceConfig {
            speed: 0.9,
            ..VoiceConfig::default()
        };
        assert_eq!(VoiceSettings::for_voice(&slowish).speed, 0.9);
    }

    #[test]
    fn provider_follows_config() {
        let mut voice = VoiceConfig::default();
        let keys = ApiKeys::default();
        assert!(voice_from_config(&voice, &keys, Duration::from_secs(5)).is_ok());

        voice.provider = VoiceProvider::ElevenLabs;
        let err = voice_from_config(&voice, &keys, Duration::from_secs(5)).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);

        let keys = ApiKeys {
            elevenlabs: Some("xi".to_string()),
            ..ApiKeys::default()
        };
        assert!(voice_from_config(&voice, &keys, Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn missing_piper_binary_is_unavailable() {
        let voice = VoiceConfig {
            piper_model: std::path::PathBuf::from("/nonexistent/model.onnx"),
            timeout_seconds: 5,
            ..VoiceConfig::default()
        };
        // Either piper is absent or it fails on the bogus model: both are transient.
        let err = PiperVoice.synthesize_speech("Hello.", &voice).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
    }
}
