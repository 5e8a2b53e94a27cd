//! Caption timing.
//!
//! Turns one segment's text and its measured narration into contiguous
//! caption cues, then places them on the global timeline. Everything here is
//! pure: the same text, duration and word timings always give the same cues.

use crate::audio::{AudioTrack, WordTiming};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One caption display unit. `end > start` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionCue {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl CaptionCue {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Cue boundaries come from provider word timestamps.
    WordTiming,
    /// Cue lengths are shared out by character count.
    Proportional,
}

/// Groups words into caption chunks of at most `chunk_words` words.
pub fn chunk_words(text: &str, chunk_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(chunk_words.max(1))
        .map(|c| c.join(" "))
        .collect()
}

/// Picks the strategy the available signal allows and builds the segment's cues.
pub fn sync_segment(
    text: &str,
    duration: f64,
    words: Option<&[WordTiming]>,
    chunk_size: usize,
) -> (SyncStrategy, Vec<CaptionCue>) {
    match words {
        Some(timings) if !timings.is_empty() => (
            SyncStrategy::WordTiming,
            word_timed_cues(timings, duration, chunk_size),
        ),
        _ => (
            SyncStrategy::Proportional,
            proportional_cues(text, duration, chunk_size),
        ),
    }
}

/// Lengths of each chunk when `duration` is shared by character count.
///
/// The last chunk takes whatever the others leave, so the lengths always add
/// up to `duration` with no drift spread across earlier boundaries.
pub fn proportional_durations(chunks: &[String], duration: f64) -> Vec<f64> {
    if chunks.is_empty() {
        return Vec::new();
    }
    let counts: Vec<usize> = chunks.iter().map(|c| c.chars().count()).collect();
    let total: usize = counts.iter().sum();
    let last = chunks.len() - 1;
    let mut out = Vec::with_capacity(chunks.len());
    let mut used = 0.0;
    for (i, count) in counts.into_iter().enumerate() {
        if i == last {
            out.push(duration - used);
        } else {
            let share = if total > 0 {
                duration * count as f64 / total as f64
            } else {
                duration / chunks.len() as f64
            };
            used += share;
            out.push(share);
        }
    }
    out
}

/// Fallback strategy when the narration carries no timing metadata.
pub fn proportional_cues(text: &str, duration: f64, chunk_size: usize) -> Vec<CaptionCue> {
    if duration <= 0.0 {
        return Vec::new();
    }
    let chunks = chunk_words(text, chunk_size);
    let lengths = proportional_durations(&chunks, duration);
    let mut cues = Vec::with_capacity(chunks.len());
    let mut cursor = 0.0;
    let last = chunks.len().saturating_sub(1);
    for (i, (chunk, len)) in chunks.into_iter().zip(lengths).enumerate() {
        let end = if i == last { duration } else { cursor + len };
        cues.push(CaptionCue {
            text: chunk,
            start: cursor,
            end,
        });
        cursor = end;
    }
    cues
}

/// Preferred strategy: cue boundaries sit on returned word starts.
///
/// Each cue runs from its first word's start to the next cue's first word
/// start, so pauses belong to the cue before them. The first cue starts at
/// zero and the last ends at `duration`. A chunk whose boundary would not
/// move time forward is folded into the previous cue rather than emitted
/// with zero length.
pub fn word_timed_cues(words: &[WordTiming], duration: f64, chunk_size: usize) -> Vec<CaptionCue> {
    if duration <= 0.0 || words.is_empty() {
        return Vec::new();
    }
    let mut cues: Vec<CaptionCue> = Vec::new();
    for chunk in words.chunks(chunk_size.max(1)) {
        let text = chunk
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let boundary = chunk[0].start.clamp(0.0, duration);
        match cues.last_mut() {
            Some(prev) if boundary <= prev.start || boundary >= duration => {
                prev.text.push(' ');
                prev.text.push_str(&text);
                continue;
            }
            Some(prev) => prev.end = boundary,
            None => {}
        }
        let start = if cues.is_empty() { 0.0 } else { boundary };
        cues.push(CaptionCue {
            text,
            start,
            end: duration,
        });
    }
    cues
}

/// Shifts segment-local cues onto the global timeline.
pub fn offset_cues(cues: &[CaptionCue], offset: f64) -> Vec<CaptionCue> {
    cues.iter()
        .map(|c| CaptionCue {
            text: c.text.clone(),
            start: c.start + offset,
            end: c.end + offset,
        })
        .collect()
}

/// Builds the global cue track for a run, segment by segment.
///
/// Each segment's cues are offset by the measured length of every track
/// before it.
pub fn build_cue_track(segment_texts: &[&str], tracks: &[AudioTrack], chunk_size: usize) -> Vec<CaptionCue> {
    let mut out = Vec::new();
    let mut offset = 0.0_f64;
    for (text, track) in segment_texts.iter().zip(tracks) {
        let (_, local) = sync_segment(text, track.duration, track.words.as_deref(), chunk_size);
        out.extend(offset_cues(&local, offset));
        offset += track.duration;
    }
    out
}

pub fn write_srt(path: &Path, cues: &[CaptionCue], line_width: usize) -> std::io::Result<()> {
    let mut f = File::create(path)?;
    for (i, cue) in cues.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(f, "{} --> {}", format_srt_time(cue.start), format_srt_time(cue.end))?;
        for line in wrap_text(&cue.text, line_width) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    Ok(())
}

pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
