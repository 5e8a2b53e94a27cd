//! Stage sequencing, retries and per-run caching.
//!
//! The orchestrator drives one [`PipelineRun`] through trend, script, audio,
//! timing, composition and export. Each stage consumes the artifact of the
//! one before it, recoverable adapter failures are retried with exponential
//! backoff, and a run that failed can be driven again: stages whose artifacts
//! are already cached are not repeated.

mod batch;
mod run;

pub use batch::BatchSummary;
pub use run::{PipelineRun, RunState, Stage, StageLedger, StageStatus, VideoArtifact};

use crate::adapters::{
    CuratedTrends, MediaSearch, OpenAiScriptWriter, PexelsSearch, RedditTrends, ScriptGenerator, SpeechSynthesizer,
    TrendSource, tts,
};
use crate::audio::AudioTrack;
use crate::compose::{Composer, MediaClip, Timeline};
use crate::config::{PipelineConfig, TrendSourceKind};
use crate::error::{ErrorKind, PipelineError, ServiceError};
use crate::render::{ExportJob, Exporter, FfmpegExporter};
use crate::script::{self, Script, ScriptDraft, Topic};
use crate::subtitle::{self, CaptionCue};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

/// Progress notification, one per stage transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEvent {
    pub run_id: usize,
    pub stage: Stage,
    pub status: StageStatus,
    pub reason: Option<String>,
}

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The external capabilities a run needs.
#[derive(Clone)]
pub struct Services {
    pub trends: Arc<dyn TrendSource>,
    pub writer: Arc<dyn ScriptGenerator>,
    pub voice: Arc<dyn SpeechSynthesizer>,
    pub media: Arc<dyn MediaSearch>,
    pub exporter: Arc<dyn Exporter>,
}

/// A stage reported success without leaving a usable artifact behind.
fn unusable_output(stage: Stage) -> PipelineError {
    ServiceError::InvalidResponse {
        service: "pipeline",
        message: format!("the {} stage left no usable output", stage),
    }
    .into()
}

fn missing_key(service: &'static str) -> ServiceError {
    ServiceError::Unauthorized {
        service,
        message: "no API key configured".to_string(),
    }
}

impl Services {
    /// Wires the production adapters from configuration and keys.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let timeout = Duration::from_secs(config.http.timeout_seconds);
        let keys = &config.keys;

        let trends: Arc<dyn TrendSource> = match config.trends.source {
            TrendSourceKind::Curated => Arc::new(CuratedTrends),
            TrendSourceKind::Reddit => Arc::new(RedditTrends::new(timeout)?),
        };
        let openai_key = keys.openai.clone().ok_or_else(|| missing_key("openai"))?;
        let pexels_key = keys.pexels.clone().ok_or_else(|| missing_key("pexels"))?;

        Ok(Self {
            trends,
            writer: Arc::new(OpenAiScriptWriter::new(openai_key, config.duration, timeout)?),
            voice: tts::voice_from_config(&config.voice, keys, timeout)?,
            media: Arc::new(PexelsSearch::new(pexels_key, config.media.per_page, timeout)?),
            exporter: Arc::new(FfmpegExporter::new(config)?),
        })
    }
}

pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    services: Services,
    events: Option<UnboundedSender<RunEvent>>,
}

impl Orchestrator {
    pub fn new(config: Arc<PipelineConfig>, services: Services) -> Self {
        Self {
            config,
            services,
            events: None,
        }
    }

    /// Streams a [`RunEvent`] for every stage transition.
    pub fn with_events(mut self, events: UnboundedSender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn emit(&self, run_id: usize, stage: Stage, status: StageStatus, reason: Option<String>) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = events.send(RunEvent {
                run_id,
                stage,
                status,
                reason,
            });
        }
    }

    /// Advances the run until it is done, fails or is cancelled, and returns
    /// the state it stopped in. Driving a failed or cancelled run resumes at
    /// the first stage without a valid artifact.
    pub async fn drive(&self, run: &mut PipelineRun, cancel: &CancelToken) -> RunState {
        let id = run.id;
        loop {
            let Some(stage) = run.next_stage() else {
                run.ledger.state = RunState::Done;
                info!("Run {} finished", id);
                return RunState::Done;
            };
            if cancel.is_cancelled() {
                warn!("Run {} cancelled before the {} stage", id, stage);
                run.ledger.state = RunState::Cancelled { stage };
                return run.ledger.state.clone();
            }

            run.discard_after(stage);
            run.ledger.enter(stage);
            self.emit(id, stage, StageStatus::Pending, None);
            info!("Run {}: {} stage", id, stage);

            let outcome = match self.execute(stage, run).await {
                Ok(()) if !run.has_artifact(stage) => Err(unusable_output(stage)),
                other => other,
            };
            match outcome {
                Ok(()) => {
                    run.ledger.succeed(stage);
                    self.emit(id, stage, StageStatus::Succeeded, None);
                }
                Err(reason) => {
                    error!("Run {} failed at the {} stage: {}", id, stage, reason);
                    self.emit(id, stage, StageStatus::Failed(reason.kind()), Some(reason.to_string()));
                    run.ledger.fail(stage, reason);
                    return run.ledger.state.clone();
                }
            }
        }
    }

    /// Runs one stage. Inputs are taken from the run; `next_stage` only picks
    /// a stage whose predecessors all hold valid artifacts.
    async fn execute(&self, stage: Stage, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let id = run.id;
        match stage {
            Stage::Trend => {
                let topic = self.fetch_topic(id, &mut run.ledger).await?;
                run.topic = Some(topic);
            }
            Stage::Script => {
                let Some(topic) = run.topic.as_ref() else {
                    return Err(unusable_output(Stage::Trend));
                };
                let (draft, script) = self.write_script(id, &mut run.ledger, topic).await?;
                run.draft = Some(draft);
                run.script = Some(script);
            }
            Stage::Audio => {
                let Some(script) = run.script.as_ref() else {
                    return Err(unusable_output(Stage::Script));
                };
                self.narrate(id, &mut run.ledger, script, &mut run.audio).await?;
            }
            Stage::Timing => {
                let Some(script) = run.script.as_ref() else {
                    return Err(unusable_output(Stage::Script));
                };
                run.cues = Some(self.caption(id, script, &run.audio));
            }
            Stage::Composition => {
                let (Some(draft), Some(cues)) = (run.draft.as_ref(), run.cues.as_ref()) else {
                    return Err(unusable_output(Stage::Timing));
                };
                let timeline = self
                    .compose(id, &mut run.ledger, draft, &run.audio, cues, &mut run.media)
                    .await?;
                run.timeline = Some(timeline);
            }
            Stage::Export => {
                let (Some(draft), Some(timeline)) = (run.draft.as_ref(), run.timeline.as_ref()) else {
                    return Err(unusable_output(Stage::Composition));
                };
                let artifact = self
                    .export(id, &mut run.ledger, draft, timeline, &run.audio)
                    .await?;
                run.artifact = Some(artifact);
            }
        }
        Ok(())
    }

    /// Calls `call` until it succeeds, fails unrecoverably or uses up
    /// `retry.max_attempts`, sleeping with exponential backoff in between.
    async fn with_retry<T, F, Fut>(
        &self,
        run_id: usize,
        stage: Stage,
        ledger: &mut StageLedger,
        mut call: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            ledger.count_call(stage);
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    let delay = self.config.retry.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Run {}: {} attempt failed ({}), retrying in {:?} (attempt {}/{})",
                        run_id, stage, e, delay, attempt, max_attempts
                    );
                    ledger.retrying(stage, attempt);
                    self.emit(run_id, stage, StageStatus::Retrying { attempt }, Some(e.to_string()));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_topic(&self, id: usize, ledger: &mut StageLedger) -> Result<Topic, PipelineError> {
        let trends = &self.services.trends;
        let niche = self.config.niche;
        let topic = self
            .with_retry(id, Stage::Trend, ledger, move || async move {
                trends.fetch_trend(niche).await.map_err(PipelineError::from)
            })
            .await?;
        if topic.title.trim().is_empty() {
            return Err(ServiceError::InvalidResponse {
                service: "trends",
                message: "empty topic".to_string(),
            }
            .into());
        }
        info!("Run {} topic: {}", id, topic.title);
        Ok(topic)
    }

    async fn write_script(
        &self,
        id: usize,
        ledger: &mut StageLedger,
        topic: &Topic,
    ) -> Result<(ScriptDraft, Script), PipelineError> {
        let writer = &self.services.writer;
        let generated = self
            .with_retry(id, Stage::Script, ledger, move || async move {
                writer.generate_script(topic).await.map_err(PipelineError::from)
            })
            .await
            .and_then(|raw| {
                let draft = script::parse_draft(&raw, topic);
                let script = script::segment(&draft.body, &self.config.segmenter)?;
                Ok((draft, script))
            });
        let (draft, script) = match generated {
            Ok(written) => written,
            Err(e) if self.config.script.fallback && e.kind() != ErrorKind::Unauthorized => {
                warn!("Run {} using the fallback script: {}", id, e);
                let draft = script::fallback_draft(topic);
                let script = script::segment(&draft.body, &self.config.segmenter)?;
                (draft, script)
            }
            Err(e) => return Err(e),
        };
        info!(
            "Run {} script: {} segments, about {:.1}s",
            id,
            script.segments.len(),
            script.estimated_seconds()
        );
        Ok((draft, script))
    }

    /// Synthesizes every segment not already in `cache`, in order. A failure
    /// keeps the tracks rendered so far.
    async fn narrate(
        &self,
        id: usize,
        ledger: &mut StageLedger,
        script: &Script,
        cache: &mut Vec<AudioTrack>,
    ) -> Result<(), PipelineError> {
        if cache.len() > script.segments.len() {
            cache.clear();
        }
        let voice = &self.services.voice;
        let settings = &self.config.voice;
        for segment in &script.segments[cache.len()..] {
            let text = segment.text.as_str();
            let speech = self
                .with_retry(id, Stage::Audio, ledger, move || async move {
                    voice.synthesize_speech(text, settings).await.map_err(PipelineError::from)
                })
                .await?;
            if speech.wav.is_empty() || !(speech.duration.is_finite() && speech.duration > 0.0) {
                return Err(ServiceError::InvalidResponse {
                    service: "speech",
                    message: format!("segment {} came back without audio", segment.index),
                }
                .into());
            }
            debug!("Run {} segment {} narrated in {:.2}s", id, segment.index, speech.duration);
            cache.push(AudioTrack {
                segment: segment.index,
                wav: speech.wav,
                duration: speech.duration,
                words: speech.words,
            });
        }
        Ok(())
    }

    fn caption(&self, id: usize, script: &Script, audio: &[AudioTrack]) -> Vec<CaptionCue> {
        let texts: Vec<&str> = script.segments.iter().map(|s| s.text.as_str()).collect();
        let cues = subtitle::build_cue_track(&texts, audio, self.config.captions.chunk_words);
        let timed = audio.iter().filter(|t| t.words.is_some()).count();
        info!(
            "Run {} captions: {} cues ({} of {} segments word-timed)",
            id,
            cues.len(),
            timed,
            audio.len()
        );
        cues
    }

    /// Queries tried for a segment, rotated so neighbouring segments start
    /// from different terms.
    fn queries_for(&self, draft: &ScriptDraft, segment: usize) -> Vec<String> {
        let mut pool: Vec<String> = draft
            .scene_suggestions
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();
        pool.extend(self.config.niche.search_terms().iter().map(|s| s.to_string()));
        let attempts = self.config.media.query_attempts as usize;
        (0..attempts.min(pool.len()))
            .map(|k| pool[(segment + k) % pool.len()].clone())
            .collect()
    }

    /// Finds footage for every segment not already in `media`, then plans
    /// the timeline. Footage found before a failure stays cached.
    async fn compose(
        &self,
        id: usize,
        ledger: &mut StageLedger,
        draft: &ScriptDraft,
        audio: &[AudioTrack],
        cues: &[CaptionCue],
        media: &mut Vec<Vec<MediaClip>>,
    ) -> Result<Timeline, PipelineError> {
        if media.len() > audio.len() {
            media.clear();
        }
        let search = &self.services.media;
        for track in &audio[media.len()..] {
            let queries = self.queries_for(draft, track.segment);
            let mut found = Vec::new();
            for query in &queries {
                let query = query.as_str();
                let min_duration = track.duration;
                found = self
                    .with_retry(id, Stage::Composition, ledger, move || async move {
                        search.search_media(query, min_duration).await.map_err(PipelineError::from)
                    })
                    .await?;
                if !found.is_empty() {
                    debug!("Run {} segment {}: {} clips for '{}'", id, track.segment, found.len(), query);
                    break;
                }
                warn!("Run {} segment {}: no footage for '{}'", id, track.segment, query);
            }
            if found.is_empty() {
                return Err(PipelineError::InsufficientMedia {
                    segment: track.segment,
                    attempts: queries.len() as u32,
                });
            }
            media.push(found);
        }

        let narration: Vec<f64> = audio.iter().map(|t| t.duration).collect();
        let timeline = Composer::from_config(&self.config).compose(&narration, media, cues.to_vec())?;
        info!(
            "Run {} timeline: {:.2}s, {} clips, {} cues",
            id,
            timeline.duration,
            timeline.clips.len(),
            timeline.cues.len()
        );
        Ok(timeline)
    }

    fn output_path(&self, id: usize) -> PathBuf {
        self.config
            .output
            .dir
            .join(format!("short_{}_{:03}.mp4", self.config.niche, id))
    }

    async fn export(
        &self,
        id: usize,
        ledger: &mut StageLedger,
        draft: &ScriptDraft,
        timeline: &Timeline,
        audio: &[AudioTrack],
    ) -> Result<VideoArtifact, PipelineError> {
        let output = self.output_path(id);
        let exporter = &self.services.exporter;
        let job = ExportJob {
            run_id: id,
            timeline,
            audio,
            output: &output,
        };
        let path = self
            .with_retry(id, Stage::Export, ledger, move || async move { exporter.export(job).await })
            .await?;
        info!("Run {} exported {}", id, path.display());
        Ok(VideoArtifact {
            path,
            duration: timeline.duration,
            resolution: (timeline.width, timeline.height),
            title: draft.title.clone(),
            description: draft.description.clone(),
            hashtags: draft.hashtags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Niche;

    struct Nothing;

    #[async_trait::async_trait]
    impl TrendSource for Nothing {
        async fn fetch_trend(&self, _: Niche) -> Result<Topic, ServiceError> {
            Err(ServiceError::Unauthorized {
                service: "trends",
                message: "no".into(),
            })
        }
    }

    #[async_trait::async_trait]
    impl ScriptGenerator for Nothing {
        async fn generate_script(&self, _: &Topic) -> Result<String, ServiceError> {
            Ok(String::new())
        }
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for Nothing {
        async fn synthesize_speech(
            &self,
            _: &str,
            _: &crate::config::VoiceConfig,
        ) -> Result<crate::adapters::Speech, ServiceError> {
            Err(ServiceError::Unavailable {
                service: "speech",
                message: "down".into(),
            })
        }
    }

    #[async_trait::async_trait]
    impl MediaSearch for Nothing {
        async fn search_media(&self, _: &str, _: f64) -> Result<Vec<MediaClip>, ServiceError> {
            Ok(vec![])
        }
    }

    #[async_trait::async_trait]
    impl Exporter for Nothing {
        async fn export(&self, job: ExportJob<'_>) -> Result<PathBuf, PipelineError> {
            Ok(job.output.to_path_buf())
        }
    }

    fn orchestrator(config: PipelineConfig) -> Orchestrator {
        let nothing = Arc::new(Nothing);
        Orchestrator::new(
            Arc::new(config),
            Services {
                trends: nothing.clone(),
                writer: nothing.clone(),
                voice: nothing.clone(),
                media: nothing.clone(),
                exporter: nothing,
            },
        )
    }

    #[test]
    fn queries_rotate_per_segment() {
        let mut config = PipelineConfig::default();
        config.niche = Niche::Tech;
        config.media.query_attempts = 3;
        let orch = orchestrator(config);
        let draft = ScriptDraft {
            scene_suggestions: vec!["robot arm".into(), " ".into()],
            ..ScriptDraft::default()
        };
        let terms = Niche::Tech.search_terms();

        let first = orch.queries_for(&draft, 0);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], "robot arm");
        assert_eq!(first[1], terms[0]);

        let second = orch.queries_for(&draft, 1);
        assert_eq!(second[0], terms[0]);
        assert_eq!(second[1], terms[1]);
    }

    #[test]
    fn output_is_named_by_niche_and_run() {
        let mut config = PipelineConfig::default();
        config.niche = Niche::Facts;
        config.output.dir = PathBuf::from("out");
        let orch = orchestrator(config);
        assert_eq!(orch.output_path(7), PathBuf::from("out/short_facts_007.mp4"));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn unrecoverable_trend_failure_is_not_retried() {
        let orch = orchestrator(PipelineConfig::default());
        let mut run = PipelineRun::new(0);
        let state = orch.drive(&mut run, &CancelToken::new()).await;
        assert!(matches!(state, RunState::Failed { stage: Stage::Trend, .. }));
        assert_eq!(run.calls(Stage::Trend), 1);
        assert_eq!(
            run.status(Stage::Trend),
            StageStatus::Failed(crate::error::ErrorKind::Unauthorized)
        );
    }

    #[tokio::test]
    async fn empty_script_fails_the_script_stage() {
        let orch = orchestrator(PipelineConfig::default());
        let mut run = PipelineRun::with_topic(0, Topic::new("x", Niche::Motivation));
        let state = orch.drive(&mut run, &CancelToken::new()).await;
        assert_eq!(
            state,
            RunState::Failed {
                stage: Stage::Script,
                reason: PipelineError::EmptyScript
            }
        );
    }

    #[tokio::test]
    async fn transient_speech_failure_uses_every_attempt() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 4;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        let orch = orchestrator(config);
        let mut run = PipelineRun::with_topic(0, Topic::new("x", Niche::Motivation));
        run.draft = Some(ScriptDraft::default());
        run.script = Some(script::segment("Keep going.", &Default::default()).unwrap());
        run.ledger.succeed(Stage::Script);

        let state = orch.drive(&mut run, &CancelToken::new()).await;
        assert!(matches!(state, RunState::Failed { stage: Stage::Audio, .. }));
        assert_eq!(run.calls(Stage::Audio), 4);
    }

    #[tokio::test]
    async fn stage_without_usable_output_fails_instead_of_repeating() {
        let orch = orchestrator(PipelineConfig::default());
        let mut run = PipelineRun::with_topic(0, Topic::new("x", Niche::Motivation));
        run.draft = Some(ScriptDraft::default());
        run.script = Some(script::segment("Keep going.", &Default::default()).unwrap());
        run.ledger.succeed(Stage::Script);
        // A cached track with an unmeasurable length leaves nothing to synthesize.
        run.audio.push(AudioTrack {
            segment: 0,
            wav: vec![1, 2, 3],
            duration: f64::NAN,
            words: None,
        });

        let state = orch.drive(&mut run, &CancelToken::new()).await;

        match state {
            RunState::Failed { stage, reason } => {
                assert_eq!(stage, Stage::Audio);
                assert_eq!(reason.kind(), crate::error::ErrorKind::InvalidResponse);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(run.calls(Stage::Audio), 0);
    }
}
