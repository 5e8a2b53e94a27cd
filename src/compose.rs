//! Timeline planning: which footage covers which stretch of narration.
//!
//! This module only decides placements; [`crate::render`] turns the plan
//! into pixels. Footage is trimmed to fit and never slowed down. When the
//! candidates run out, the last clip holds its final frame.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::subtitle::CaptionCue;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const EPS: f64 = 1e-6;

/// A stock footage candidate returned by media search.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClip {
    pub id: String,
    pub url: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

/// How a source frame is scaled to cover the output and then center-cropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub x: u32,
    pub y: u32,
}

/// Scales `src` up or down until it covers `out`, then centers the crop window.
/// Never letterboxes.
pub fn center_crop(src_width: u32, src_height: u32, out_width: u32, out_height: u32) -> CropRect {
    if src_width == 0 || src_height == 0 {
        return CropRect {
            scaled_width: out_width,
            scaled_height: out_height,
            x: 0,
            y: 0,
        };
    }
    let scale = f64::max(
        out_width as f64 / src_width as f64,
        out_height as f64 / src_height as f64,
    );
    let even_up = |v: f64, floor: u32| -> u32 {
        let v = ((v - 1e-6).ceil() as u32).max(floor);
        v + (v % 2)
    };
    let scaled_width = even_up(src_width as f64 * scale, out_width);
    let scaled_height = even_up(src_height as f64 * scale, out_height);
    CropRect {
        scaled_width,
        scaled_height,
        x: (scaled_width - out_width) / 2,
        y: (scaled_height - out_height) / 2,
    }
}

/// One clip occupying `[start, start + trim + hold)` on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlacement {
    pub clip: MediaClip,
    pub segment: usize,
    pub start: f64,
    /// Seconds of source footage used, from its first frame.
    pub trim: f64,
    /// Seconds the last used frame is frozen after the footage runs out.
    pub hold: f64,
    pub crop: CropRect,
}

impl ClipPlacement {
    pub fn duration(&self) -> f64 {
        self.trim + self.hold
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NarrationPlacement {
    pub segment: usize,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MusicTrack {
    pub path: PathBuf,
    pub volume: f64,
}

/// The full composition, bottom layer first: footage, captions, music, narration.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub width: u32,
    pub height: u32,
    pub clips: Vec<ClipPlacement>,
    pub cues: Vec<CaptionCue>,
    pub music: Option<MusicTrack>,
    pub narration: Vec<NarrationPlacement>,
    pub duration: f64,
}

impl Timeline {
    pub fn narration_seconds(&self) -> f64 {
        self.narration.iter().map(|n| n.duration).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty() || self.narration.is_empty()
    }
}

/// Plans timelines for one configuration. Cheap to build per run.
#[derive(Debug, Clone)]
pub struct Composer {
    min_seconds: f64,
    max_seconds: f64,
    max_extension: f64,
    width: u32,
    height: u32,
    music: Option<MusicTrack>,
}

impl Composer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_seconds: config.duration.min_seconds,
            max_seconds: config.duration.max_seconds,
            max_extension: config.composition.max_extension_seconds,
            width: config.output.width,
            height: config.output.height,
            music: config.music.path.clone().map(|path| MusicTrack {
                path,
                volume: config.music.volume,
            }),
        }
    }

    /// Lays out footage under the narration.
    ///
    /// `narration[i]` is segment `i`'s measured length and `candidates[i]` its
    /// ordered footage. A timeline shorter than the minimum bound is extended
    /// by letting the final segment's footage run on; narration and captions
    /// are never cut.
    pub fn compose(
        &self,
        narration: &[f64],
        candidates: &[Vec<MediaClip>],
        cues: Vec<CaptionCue>,
    ) -> Result<Timeline, PipelineError> {
        let spoken: f64 = narration.iter().sum();
        let out_of_bounds = || PipelineError::DurationOutOfBounds {
            actual: spoken,
            min: self.min_seconds,
            max: self.max_seconds,
        };
        if spoken > self.max_seconds + EPS {
            warn!("Narration runs {:.2}s, over the {:.0}s limit", spoken, self.max_seconds);
            return Err(out_of_bounds());
        }
        let total = spoken.max(self.min_seconds);
        let extension = total - spoken;
        if extension > self.max_extension + EPS {
            warn!(
                "Narration runs {:.2}s; reaching {:.0}s needs more than {:.0}s of extra footage",
                spoken, self.min_seconds, self.max_extension
            );
            return Err(out_of_bounds());
        }
        if extension > 0.0 {
            info!("Extending footage by {:.2}s to reach the minimum length", extension);
        }

        let mut used: HashSet<&str> = HashSet::new();
        let mut clips = Vec::new();
        let mut placements = Vec::with_capacity(narration.len());
        let mut offset = 0.0_f64;
        let last_segment = narration.len().saturating_sub(1);

        for (segment, &spoken_len) in narration.iter().enumerate() {
            let pool = candidates.get(segment).map(Vec::as_slice).unwrap_or_default();
            if pool.is_empty() {
                return Err(PipelineError::InsufficientMedia { segment, attempts: 0 });
            }
            let need = if segment == last_segment { spoken_len + extension } else { spoken_len };
            let segment_end = offset + need;

            // Footage not yet shown goes first, then repeats, each in search order.
            let ordered: Vec<&MediaClip> = pool
                .iter()
                .filter(|c| !used.contains(c.id.as_str()))
                .chain(pool.iter().filter(|c| used.contains(c.id.as_str())))
                .collect();

            let first_placement = clips.len();
            let mut cursor = offset;
            for clip in ordered {
                let remaining = segment_end - cursor;
                if remaining <= EPS {
                    break;
                }
                let trim = clip.duration.min(remaining);
                if trim <= EPS {
                    continue;
                }
                used.insert(clip.id.as_str());
                clips.push(self.place(clip, segment, cursor, trim));
                cursor += trim;
            }
            if clips.len() == first_placement {
                // Only zero-length footage: show the first frame for the whole segment.
                clips.push(self.place(&pool[0], segment, offset, 0.0));
            }
            if let Some(last) = clips.last_mut() {
                let hold = (segment_end - last.start - last.trim).max(0.0);
                if hold > EPS {
                    debug!("Holding clip {} for {:.2}s in segment {}", last.clip.id, hold, segment);
                }
                last.hold = hold;
            }

            placements.push(NarrationPlacement {
                segment,
                start: offset,
                duration: spoken_len,
            });
            offset += spoken_len;
        }

        info!(
            "Composed timeline: {} clips, {:.2}s narration, {:.2}s total",
            clips.len(),
            spoken,
            total
        );
        Ok(Timeline {
            width: self.width,
            height: self.height,
            clips,
            cues,
            music: self.music.clone(),
            narration: placements,
            duration: total,
        })
    }

    fn place(&self, clip: &MediaClip, segment: usize, start: f64, trim: f64) -> ClipPlacement {
        ClipPlacement {
            crop: center_crop(clip.width, clip.height, self.width, self.height),
            clip: clip.clone(),
            segment,
            start,
            trim,
            hold: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn clip(id: &str, duration: f64) -> MediaClip {
        MediaClip {
            id: id.to_string(),
            url: format!("https://videos.example/{}.mp4", id),
            duration,
            width: 720,
            height: 1280,
        }
    }

    fn composer(min: f64, max: f64) -> Composer {
        let mut config = PipelineConfig::default();
        config.duration.min_seconds = min;
        config.duration.max_seconds = max;
        Composer::from_config(&config)
    }

    fn assert_tiles(timeline: &Timeline) {
        let mut cursor = 0.0;
        for placement in &timeline.clips {
            assert!((placement.start - cursor).abs() < 1e-6, "gap before {:?}", placement);
            assert!(placement.trim <= placement.clip.duration + 1e-9, "stretched {:?}", placement);
            cursor = placement.end();
        }
        assert!((cursor - timeline.duration).abs() < 1e-6);
    }

    #[test]
    fn clips_are_trimmed_to_segment_length() {
        let timeline = composer(1.0, 60.0)
            .compose(&[4.0, 3.0], &[vec![clip("a", 10.0)], vec![clip("b", 2.0), clip("c", 5.0)]], vec![])
            .unwrap();
        let ids: Vec<&str> = timeline.clips.iter().map(|p| p.clip.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(timeline.clips[0].trim, 4.0);
        assert_eq!(timeline.clips[1].trim, 2.0);
        assert!((timeline.clips[2].trim - 1.0).abs() < 1e-9);
        assert!(timeline.clips.iter().all(|p| p.hold == 0.0));
        assert_eq!(timeline.narration[1].start, 4.0);
        assert_tiles(&timeline);
    }

    #[test]
    fn short_footage_holds_last_clip() {
        let timeline = composer(1.0, 60.0)
            .compose(&[6.0], &[vec![clip("a", 2.0), clip("b", 1.5)]], vec![])
            .unwrap();
        assert_eq!(timeline.clips.len(), 2);
        assert_eq!(timeline.clips[1].trim, 1.5);
        assert!((timeline.clips[1].hold - 2.5).abs() < 1e-9);
        assert_tiles(&timeline);
    }

    #[test]
    fn short_narration_is_extended_to_minimum() {
        let narration = [10.0, 8.0, 7.0];
        let candidates = vec![
            vec![clip("a", 12.0)],
            vec![clip("b", 9.0)],
            vec![clip("c", 8.0), clip("d", 3.0)],
        ];
        let timeline = composer(30.0, 60.0).compose(&narration, &candidates, vec![]).unwrap();
        assert_eq!(timeline.duration, 30.0);
        assert_eq!(timeline.narration_seconds(), 25.0);
        let tail = &timeline.clips[timeline.clips.len() - 2..];
        assert_eq!(tail[0].clip.id, "c");
        assert_eq!(tail[0].trim, 8.0);
        assert_eq!(tail[1].clip.id, "d");
        assert!((tail[1].trim - 3.0).abs() < 1e-9);
        assert!((tail[1].hold - 1.0).abs() < 1e-9);
        assert_tiles(&timeline);
    }

    #[test]
    fn overlong_narration_is_out_of_bounds() {
        let err = composer(30.0, 60.0)
            .compose(&[40.0, 25.0], &[vec![clip("a", 50.0)], vec![clip("b", 50.0)]], vec![])
            .unwrap_err();
        assert!(matches!(err, PipelineError::DurationOutOfBounds { actual, .. } if actual == 65.0));
    }

    #[test]
    fn unreachable_minimum_is_out_of_bounds() {
        // Default max extension is 15s; 5s of narration cannot reach 30s.
        let err = composer(30.0, 60.0).compose(&[5.0], &[vec![clip("a", 60.0)]], vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::DurationOutOfBounds { .. }));
    }

    #[test]
    fn unused_footage_is_preferred() {
        let shared = vec![clip("a", 5.0), clip("b", 5.0)];
        let timeline = composer(1.0, 60.0)
            .compose(&[3.0, 3.0], &[shared.clone(), shared], vec![])
            .unwrap();
        assert_eq!(timeline.clips[0].clip.id, "a");
        assert_eq!(timeline.clips[1].clip.id, "b");
    }

    #[test]
    fn missing_candidates_are_insufficient_media() {
        let err = composer(1.0, 60.0)
            .compose(&[3.0, 3.0], &[vec![clip("a", 5.0)], vec![]], vec![])
            .unwrap_err();
        assert_eq!(err, PipelineError::InsufficientMedia { segment: 1, attempts: 0 });
    }

    #[test]
    fn composition_is_repeatable() {
        let narration = [7.3, 9.1, 4.4];
        let candidates = vec![
            vec![clip("a", 3.3), clip("b", 2.0)],
            vec![clip("c", 20.0)],
            vec![clip("a", 3.3), clip("d", 1.1)],
        ];
        let c = composer(25.0, 60.0);
        let first = c.compose(&narration, &candidates, vec![]).unwrap();
        for _ in 0..5 {
            let again = c.compose(&narration, &candidates, vec![]).unwrap();
            assert_eq!(again.duration, first.duration);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn landscape_footage_is_center_cropped() {
        let crop = center_crop(1920, 1080, 1080, 1920);
        assert_eq!(crop.scaled_height, 1920);
        assert_eq!(crop.scaled_width, 3414);
        assert_eq!(crop.x, (3414 - 1080) / 2);
        assert_eq!(crop.y, 0);
    }

    #[test]
    fn matching_footage_is_not_cropped() {
        let crop = center_crop(720, 1280, 1080, 1920);
        assert_eq!(
            crop,
            CropRect {
                scaled_width: 1080,
                scaled_height: 1920,
                x: 0,
                y: 0
            }
        );
    }
}
