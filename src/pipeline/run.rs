//! One video generation run: its state machine and cached artifacts.

use crate::audio::AudioTrack;
use crate::compose::{MediaClip, Timeline};
use crate::error::{ErrorKind, PipelineError, ServiceError};
use crate::script::{Script, ScriptDraft, Topic};
use crate::subtitle::CaptionCue;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Trend,
    Script,
    Audio,
    Timing,
    Composition,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Trend,
        Stage::Script,
        Stage::Audio,
        Stage::Timing,
        Stage::Composition,
        Stage::Export,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Trend => "trend",
            Stage::Script => "script",
            Stage::Audio => "audio",
            Stage::Timing => "timing",
            Stage::Composition => "composition",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    /// `attempt` is the call about to be made, 2 for the first retry.
    Retrying { attempt: u32 },
    Succeeded,
    Failed(ErrorKind),
}

/// Where a run stands. `Failed` and `Cancelled` keep every artifact produced
/// so far, so driving the run again resumes at the stage that stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    TrendPending,
    ScriptPending,
    AudioPending,
    TimingPending,
    CompositionPending,
    Exporting,
    Done,
    Retrying { stage: Stage, attempt: u32 },
    Failed { stage: Stage, reason: PipelineError },
    Cancelled { stage: Stage },
}

impl RunState {
    pub fn pending(stage: Stage) -> Self {
        match stage {
            Stage::Trend => RunState::TrendPending,
            Stage::Script => RunState::ScriptPending,
            Stage::Audio => RunState::AudioPending,
            Stage::Timing => RunState::TimingPending,
            Stage::Composition => RunState::CompositionPending,
            Stage::Export => RunState::Exporting,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. } | RunState::Cancelled { .. })
    }
}

/// Per-stage bookkeeping, split from the artifacts so a stage can update it
/// while reading the artifacts it consumes.
#[derive(Debug, Clone)]
pub struct StageLedger {
    pub(crate) state: RunState,
    statuses: [StageStatus; 6],
    calls: [u32; 6],
}

impl StageLedger {
    fn new() -> Self {
        Self {
            state: RunState::TrendPending,
            statuses: [StageStatus::Pending; 6],
            calls: [0; 6],
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses[stage.index()]
    }

    /// Adapter calls made on behalf of the stage, retries included.
    pub fn calls(&self, stage: Stage) -> u32 {
        self.calls[stage.index()]
    }

    pub(crate) fn count_call(&mut self, stage: Stage) {
        self.calls[stage.index()] += 1;
    }

    pub(crate) fn enter(&mut self, stage: Stage) {
        self.statuses[stage.index()] = StageStatus::Pending;
        self.state = RunState::pending(stage);
    }

    pub(crate) fn retrying(&mut self, stage: Stage, attempt: u32) {
        self.statuses[stage.index()] = StageStatus::Retrying { attempt };
        self.state = RunState::Retrying { stage, attempt };
    }

    pub(crate) fn succeed(&mut self, stage: Stage) {
        self.statuses[stage.index()] = StageStatus::Succeeded;
    }

    pub(crate) fn fail(&mut self, stage: Stage, reason: PipelineError) {
        self.statuses[stage.index()] = StageStatus::Failed(reason.kind());
        self.state = RunState::Failed { stage, reason };
    }

    pub(crate) fn reopen(&mut self, stage: Stage) {
        self.statuses[stage.index()] = StageStatus::Pending;
    }
}

/// What a successful run hands to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub duration: f64,
    pub resolution: (u32, u32),
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
}

/// The unit of work. Only the orchestrator mutates it.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub(crate) id: usize,
    pub(crate) ledger: StageLedger,
    pub(crate) topic: Option<Topic>,
    pub(crate) draft: Option<ScriptDraft>,
    pub(crate) script: Option<Script>,
    pub(crate) audio: Vec<AudioTrack>,
    pub(crate) cues: Option<Vec<CaptionCue>>,
    pub(crate) media: Vec<Vec<MediaClip>>,
    pub(crate) timeline: Option<Timeline>,
    pub(crate) artifact: Option<VideoArtifact>,
}

impl PipelineRun {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ledger: StageLedger::new(),
            topic: None,
            draft: None,
            script: None,
            audio: Vec::new(),
            cues: None,
            media: Vec::new(),
            timeline: None,
            artifact: None,
        }
    }

    /// A run whose topic the caller already chose; the trend stage is skipped.
    pub fn with_topic(id: usize, topic: Topic) -> Self {
        let mut run = Self::new(id);
        run.topic = Some(topic);
        run.ledger.succeed(Stage::Trend);
        run.ledger.state = RunState::ScriptPending;
        run
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> &RunState {
        &self.ledger.state
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.ledger.status(stage)
    }

    pub fn calls(&self, stage: Stage) -> u32 {
        self.ledger.calls(stage)
    }

    pub fn topic(&self) -> Option<&Topic> {
        self.topic.as_ref()
    }

    pub fn draft(&self) -> Option<&ScriptDraft> {
        self.draft.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn audio(&self) -> &[AudioTrack] {
        &self.audio
    }

    pub fn cues(&self) -> Option<&[CaptionCue]> {
        self.cues.as_deref()
    }

    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    pub fn artifact(&self) -> Option<&VideoArtifact> {
        self.artifact.as_ref()
    }

    /// Whether the stage's output is present and usable by the next stage.
    pub(crate) fn has_artifact(&self, stage: Stage) -> bool {
        match stage {
            Stage::Trend => self.topic.as_ref().is_some_and(|t| !t.title.trim().is_empty()),
            Stage::Script => self.script.as_ref().is_some_and(|s| !s.segments.is_empty()),
            Stage::Audio => {
                let expected = self.script.as_ref().map_or(0, |s| s.segments.len());
                expected > 0
                    && self.audio.len() == expected
                    && self.audio
                        .iter()
                        .all(|t| t.duration.is_finite() && t.duration > 0.0 && !t.wav.is_empty())
            }
            Stage::Timing => self.cues.as_ref().is_some_and(|c| !c.is_empty()),
            Stage::Composition => self.timeline.as_ref().is_some_and(|t| !t.is_empty()),
            Stage::Export => self.artifact.is_some(),
        }
    }

    /// First stage that has not produced a valid artifact, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|&s| self.ledger.status(s) != StageStatus::Succeeded || !self.has_artifact(s))
    }

    /// Marks a run that stopped without reaching a terminal state as failed
    /// at the stage it was working on.
    pub(crate) fn abandon(&mut self, message: String) {
        if self.ledger.state.is_terminal() {
            return;
        }
        let stage = match self.ledger.state {
            RunState::Retrying { stage, .. } => stage,
            _ => self.next_stage().unwrap_or(Stage::Export),
        };
        let reason = ServiceError::InvalidResponse {
            service: "pipeline",
            message,
        };
        self.ledger.fail(stage, reason.into());
    }

    /// Drops everything downstream of `stage`; those artifacts were built
    /// from inputs that are about to change.
    pub(crate) fn discard_after(&mut self, stage: Stage) {
        for later in Stage::ALL.into_iter().filter(|&s| s > stage) {
            self.ledger.reopen(later);
            match later {
                Stage::Trend => self.topic = None,
                Stage::Script => {
                    self.draft = None;
                    self.script = None;
                }
                Stage::Audio => self.audio.clear(),
                Stage::Timing => self.cues = None,
                Stage::Composition => {
                    self.media.clear();
                    self.timeline = None;
                }
                Stage::Export => self.artifact = None,
            }
        }
    }
}
