//! Export: turns a planned [`Timeline`] into an MP4 with ffmpeg.

use crate::adapters::http;
use crate::audio::{AudioTrack, concat_wavs};
use crate::compose::{ClipPlacement, Timeline};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::subtitle::write_srt;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

const DOWNLOADS: &str = "footage";
const NARRATION_FILE: &str = "narration.wav";
const SUBTITLE_FILE: &str = "subs.srt";

/// Everything the exporter needs from one finished composition.
#[derive(Debug, Clone, Copy)]
pub struct ExportJob<'a> {
    pub run_id: usize,
    pub timeline: &'a Timeline,
    pub audio: &'a [AudioTrack],
    pub output: &'a Path,
}

#[async_trait]
pub trait Exporter: Send + Sync {
    /// Writes the video and returns its path.
    async fn export(&self, job: ExportJob<'_>) -> Result<PathBuf, PipelineError>;
}

/// Caption styling and frame rate for the encode.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub fps: u32,
    pub font_size: u32,
    pub line_chars: usize,
}

impl RenderSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            fps: config.output.fps,
            font_size: config.captions.font_size,
            line_chars: config.captions.max_line_chars,
        }
    }
}

/// Builds the ffmpeg argument list. Clip and narration paths are relative
/// to the run's work directory, which is also ffmpeg's working directory.
pub fn ffmpeg_args(
    timeline: &Timeline,
    clip_files: &[String],
    music: Option<&Path>,
    output: &Path,
    settings: &RenderSettings,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];
    for file in clip_files {
        args.extend(["-i".into(), file.clone()]);
    }
    let narration_input = clip_files.len();
    args.extend(["-i".into(), NARRATION_FILE.into()]);
    if let Some(path) = music {
        args.extend([
            "-stream_loop".into(),
            "-1".into(),
            "-i".into(),
            path.display().to_string(),
        ]);
    }

    let total = timeline.duration;
    let mut graph: Vec<String> = timeline
        .clips
        .iter()
        .enumerate()
        .map(|(i, placement)| clip_filter(i, placement, timeline.width, timeline.height, settings.fps))
        .collect();
    let labels: String = (0..timeline.clips.len()).map(|i| format!("[v{}]", i)).collect();
    graph.push(format!("{}concat=n={}:v=1:a=0[bg]", labels, timeline.clips.len()));
    graph.push(format!(
        "[bg]subtitles={}:force_style='Fontsize={},OutlineColour=&H000000&,Outline=3,Shadow=0'[v]",
        SUBTITLE_FILE, settings.font_size
    ));

    match (music, timeline.music.as_ref()) {
        (Some(_), Some(track)) => {
            graph.push(format!("[{}:a]apad,atrim=0:{:.3}[narr]", narration_input, total));
            graph.push(format!(
                "[{}:a]volume={:.3},atrim=0:{:.3}[bed]",
                narration_input + 1,
                track.volume,
                total
            ));
            graph.push("[narr][bed]amix=inputs=2:duration=first:normalize=0[a]".to_string());
        }
        _ => graph.push(format!("[{}:a]apad,atrim=0:{:.3}[a]", narration_input, total)),
    }

    args.extend([
        "-filter_complex".into(),
        graph.join(";"),
        "-map".into(),
        "[v]".into(),
        "-map".into(),
        "[a]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-c:a".into(),
        "aac".into(),
        "-r".into(),
        settings.fps.to_string(),
        "-t".into(),
        format!("{:.3}", total),
        "-movflags".into(),
        "+faststart".into(),
        output.display().to_string(),
    ]);
    args
}

fn clip_filter(i: usize, placement: &ClipPlacement, width: u32, height: u32, fps: u32) -> String {
    let crop = placement.crop;
    let mut hold = placement.hold;
    let trim = if placement.trim > 0.0 {
        format!("trim=duration={:.3}", placement.trim)
    } else {
        // No usable footage: freeze the first frame for the whole placement.
        hold = placement.duration();
        "trim=end_frame=1".to_string()
    };
    let mut filter = format!(
        "[{i}:v]{trim},setpts=PTS-STARTPTS,scale={}:{},crop={}:{}:{}:{},setsar=1,fps={}",
        crop.scaled_width, crop.scaled_height, width, height, crop.x, crop.y, fps
    );
    if hold > 0.0 {
        filter.push_str(&format!(",tpad=stop_mode=clone:stop_duration={:.3}", hold));
    }
    filter.push_str(&format!("[v{}]", i));
    filter
}

/// Downloads footage, mixes down narration and encodes with the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    client: Client,
    work_dir: PathBuf,
    settings: RenderSettings,
}

impl FfmpegExporter {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let timeout = Duration::from_secs(config.http.timeout_seconds.max(60));
        Ok(Self {
            client: http::client("footage", timeout)?,
            work_dir: config.output.work_dir.clone(),
            settings: RenderSettings::from_config(config),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), PipelineError> {
        let bytes = http::send_bytes("footage", self.client.get(url)).await?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    /// Fetches each distinct clip once; returns per-placement file names.
    async fn fetch_footage(&self, timeline: &Timeline, run_dir: &Path) -> Result<Vec<String>, PipelineError> {
        tokio::fs::create_dir_all(run_dir.join(DOWNLOADS)).await?;
        let mut fetched: HashMap<&str, String> = HashMap::new();
        let mut files = Vec::with_capacity(timeline.clips.len());
        for placement in &timeline.clips {
            let id = placement.clip.id.as_str();
            if let Some(existing) = fetched.get(id) {
                files.push(existing.clone());
                continue;
            }
            let name = format!("{}/clip_{:03}.mp4", DOWNLOADS, fetched.len());
            info!("Downloading clip {} ({})", fetched.len() + 1, id);
            self.download(&placement.clip.url, &run_dir.join(&name)).await?;
            fetched.insert(id, name.clone());
            files.push(name);
        }
        Ok(files)
    }
}

#[async_trait]
impl Exporter for FfmpegExporter {
    async fn export(&self, job: ExportJob<'_>) -> Result<PathBuf, PipelineError> {
        let run_dir = self.work_dir.join(format!("run_{:03}", job.run_id));
        if run_dir.exists() {
            info!("Removing existing work dir '{}'", run_dir.display());
            tokio::fs::remove_dir_all(&run_dir).await?;
        }
        tokio::fs::create_dir_all(&run_dir).await?;

        let clip_files = self.fetch_footage(job.timeline, &run_dir).await?;

        let parts: Vec<&[u8]> = job.audio.iter().map(|t| t.wav.as_slice()).collect();
        let narration = concat_wavs(&parts, &run_dir.join(NARRATION_FILE))?;
        debug!("Narration written: {:.2}s", narration);

        write_srt(&run_dir.join(SUBTITLE_FILE), &job.timeline.cues, self.settings.line_chars)?;

        if let Some(parent) = job.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = std::path::absolute(job.output)?;
        let music = match job.timeline.music.as_ref() {
            Some(track) if track.path.exists() => Some(std::path::absolute(&track.path)?),
            Some(track) => {
                warn!("Music file {} not found; exporting without music", track.path.display());
                None
            }
            None => None,
        };

        let args = ffmpeg_args(job.timeline, &clip_files, music.as_deref(), &output, &self.settings);
        info!("Encoding {} ({:.2}s)", output.display(), job.timeline.duration);
        let result = Command::new("ffmpeg")
            .current_dir(&run_dir)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| PipelineError::Export(format!("running ffmpeg: {}", e)))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            error!("ffmpeg failed to produce final video");
            return Err(PipelineError::Export(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!("Could not remove work dir {}: {}", run_dir.display(), e);
        }
        info!("Final video written to {}", output.display());
        Ok(output)
    }
}
