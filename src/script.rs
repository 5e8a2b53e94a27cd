//! Script model: draft parsing and narration segmentation.

use crate::config::{Niche, SegmenterConfig};
use crate::error::PipelineError;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Terminal punctuation only ends a sentence when whitespace or the end of
/// the text follows it, so "3.5" and "e.g.," stay inside their sentence.
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s).+?(?:[.!?]+(?:\s+|$)|$)").unwrap());
static STAGE_DIRECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
/// Emphasis, strike-through and inline code wrapped around text.
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*+([^*]+?)\*+|__([^_]+?)__|~~([^~]+?)~~|`([^`]+?)`").unwrap());
/// Heading hashes standing alone as a token, and stray asterisks.
static LOOSE_MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)#{1,6}(?:\s|$)|\*+").unwrap());

/// Words whose trailing period does not end the sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "st.", "jr.", "sr.", "vs.", "e.g.", "i.e.", "approx.", "no.",
];

/// Subject of one run. Fixed once the trend stage succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub title: String,
    pub niche: Niche,
}

impl Topic {
    pub fn new(title: impl Into<String>, niche: Niche) -> Self {
        Self {
            title: title.into(),
            niche,
        }
    }
}

/// Structured view of the text generator's answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptDraft {
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
    pub body: String,
    pub scene_suggestions: Vec<String>,
}

/// Splits the generator's answer into metadata and the narration body.
///
/// Lines between `---SCRIPT START---` and `---SCRIPT END---` form the body;
/// without those markers the whole answer is narrated.
pub fn parse_draft(raw: &str, topic: &Topic) -> ScriptDraft {
    let mut draft = ScriptDraft::default();
    let mut in_script = false;
    let mut saw_markers = false;
    let mut body_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("TITLE:") {
            draft.title = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("DESCRIPTION:") {
            draft.description = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("HASHTAGS:") {
            draft.hashtags = rest
                .split_whitespace()
                .filter(|h| h.starts_with('#'))
                .map(str::to_string)
                .collect();
        } else if line.contains("---SCRIPT START---") {
            in_script = true;
            saw_markers = true;
        } else if line.contains("---SCRIPT END---") {
            in_script = false;
        } else if let Some(rest) = line.strip_prefix("SCENE_SUGGESTIONS:") {
            draft.scene_suggestions = rest
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        } else if in_script && !line.is_empty() {
            body_lines.push(line);
        }
    }

    draft.body = if saw_markers {
        body_lines.join(" ")
    } else {
        warn!("Script markers missing; narrating the whole response");
        raw.trim().to_string()
    };
    if draft.title.is_empty() {
        draft.title = topic.title.chars().take(50).collect();
    }
    if draft.hashtags.is_empty() {
        draft.hashtags = vec![
            "#shorts".to_string(),
            "#viral".to_string(),
            format!("#{}", topic.niche),
        ];
    }
    draft
}

/// A canned draft for when the text generator cannot be used. Tech topics
/// get a how-to template; every other niche gets the motivational one.
pub fn fallback_draft(topic: &Topic) -> ScriptDraft {
    let subject = topic.title.trim();
    let body = match topic.niche {
        Niche::Tech => format!(
            "Stop scrolling, this changes how you use your devices. \
             Most people have never heard of {subject}. \
             It can save you hours every single week. \
             Step one: open your settings. \
             Step two: find the feature nobody talks about. \
             Step three: switch it on and see the difference. \
             Follow for more tech tips."
        ),
        _ => format!(
            "Here is something most people miss about {subject}. \
             The gap between people who succeed and people who don't isn't talent. \
             It isn't luck either. \
             It is showing up every day, even when you don't feel like it. \
             Fifteen focused minutes a day beats three hours once a week. \
             Small actions compound into big results. \
             Start today. \
             Follow for more."
        ),
    };
    ScriptDraft {
        title: subject.chars().take(50).collect(),
        description: format!("Learn about {subject} in this short video!"),
        hashtags: vec![
            "#shorts".to_string(),
            "#viral".to_string(),
            format!("#{}", topic.niche),
            "#fyp".to_string(),
        ],
        body,
        scene_suggestions: vec![
            "motivational imagery".to_string(),
            "success visuals".to_string(),
            "nature shots".to_string(),
        ],
    }
}

/// One continuously narrated unit of the script.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub text: String,
    /// Spoken length guessed from the word count, before any audio exists.
    pub estimated_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub segments: Vec<Segment>,
}

impl Script {
    pub fn estimated_seconds(&self) -> f64 {
        self.segments.iter().map(|s| s.estimated_seconds).sum()
    }

    /// Segment texts joined back into one narration.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn estimate_seconds(text: &str, words_per_minute: f64) -> f64 {
    let words = text.split_whitespace().count() as f64;
    words / words_per_minute * 60.0
}

/// Drops stage directions and markdown decoration, collapses whitespace.
pub fn clean_text(raw: &str) -> String {
    let without_directions = STAGE_DIRECTION.replace_all(raw, " ");
    let unwrapped = EMPHASIS.replace_all(&without_directions, |caps: &Captures| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .map_or(String::new(), |m| m.as_str().to_string())
    });
    let without_markup = LOOSE_MARKUP.replace_all(&unwrapped, " ");
    without_markup.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ends_with_abbreviation(sentence: &str) -> bool {
    sentence
        .split_whitespace()
        .next_back()
        .is_some_and(|w| ABBREVIATIONS.contains(&w.to_lowercase().as_str()))
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut pending = String::new();
    for piece in SENTENCE.find_iter(text).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()) {
        if !pending.is_empty() {
            pending.push(' ');
        }
        pending.push_str(piece);
        if !ends_with_abbreviation(&pending) {
            sentences.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        sentences.push(pending);
    }
    sentences
}

/// Groups whole sentences into segments of roughly `max_segment_seconds`.
///
/// A sentence is never split: one longer than the target becomes its own
/// segment. Fails with [`PipelineError::EmptyScript`] when nothing speakable
/// remains after cleaning.
pub fn segment(raw: &str, config: &SegmenterConfig) -> Result<Script, PipelineError> {
    let cleaned = clean_text(raw);
    let sentences: Vec<String> = split_sentences(&cleaned)
        .into_iter()
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect();
    if sentences.is_empty() {
        return Err(PipelineError::EmptyScript);
    }
    debug!("Script has {} sentences", sentences.len());

    let wpm = config.words_per_minute;
    let mut texts: Vec<String> = Vec::new();
    let mut current = String::new();
    for s in sentences {
        if current.is_empty() {
            current.push_str(&s);
            continue;
        }
        let joined = estimate_seconds(&current, wpm) + estimate_seconds(&s, wpm);
        if joined <= config.max_segment_seconds {
            current.push(' ');
            current.push_str(&s);
        } else {
            texts.push(std::mem::take(&mut current));
            current = s;
        }
    }
    if !current.is_empty() {
        texts.push(current);
    }

    let segments: Vec<Segment> = texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Segment {
            index,
            estimated_seconds: estimate_seconds(&text, wpm),
            text,
        })
        .collect();
    info!("Split script into {} segments", segments.len());
    Ok(Script { segments })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacing(max_segment_seconds: f64) -> SegmenterConfig {
        SegmenterConfig {
            max_segment_seconds,
            words_per_minute: 120.0,
        }
    }

    fn normalized(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn parse_draft_extracts_sections() {
        let raw = "TITLE: Wake Up Earlier\n\
                   DESCRIPTION: Mornings matter.\n\
                   HASHTAGS: #shorts #morning notatag\n\
                   \n\
                   ---SCRIPT START---\n\
                   Your alarm is lying to you.\n\
                   \n\
                   Here is why.\n\
                   ---SCRIPT END---\n\
                   SCENE_SUGGESTIONS: sunrise, coffee ,  \n";
        let draft = parse_draft(raw, &Topic::new("morning routine", Niche::Motivation));
        assert_eq!(draft.title, "Wake Up Earlier");
        assert_eq!(draft.description, "Mornings matter.");
        assert_eq!(draft.hashtags, vec!["#shorts", "#morning"]);
        assert_eq!(draft.body, "Your alarm is lying to you. Here is why.");
        assert_eq!(draft.scene_suggestions, vec!["sunrise", "coffee"]);
    }

    #[test]
    fn parse_draft_falls_back_without_markers() {
        let topic = Topic::new("x".repeat(80), Niche::Tech);
        let draft = parse_draft("  Just narrate this.  ", &topic);
        assert_eq!(draft.body, "Just narrate this.");
        assert_eq!(draft.title.len(), 50);
        assert_eq!(draft.hashtags, vec!["#shorts", "#viral", "#tech"]);
    }

    #[test]
    fn fallback_draft_narrates_the_topic() {
        let tech = fallback_draft(&Topic::new("  hidden phone settings ", Niche::Tech));
        assert!(tech.body.contains("Most people have never heard of hidden phone settings."));
        assert!(tech.body.starts_with("Stop scrolling"));
        assert_eq!(tech.title, "hidden phone settings");
        assert_eq!(tech.hashtags, vec!["#shorts", "#viral", "#tech", "#fyp"]);

        let finance = fallback_draft(&Topic::new("saving money", Niche::Finance));
        assert!(finance.body.contains("most people miss about saving money"));
        assert_eq!(finance.description, "Learn about saving money in this short video!");
        assert_eq!(finance.scene_suggestions.len(), 3);
        assert!(segment(&finance.body, &pacing(10.0)).unwrap().segments.len() > 1);
    }

    #[test]
    fn segments_group_sentences_up_to_target() {
        // 2 words/sec: each sentence below is 4 words = 2s.
        let text = "One two three four. Five six seven eight. Nine ten eleven twelve.";
        let script = segment(text, &pacing(4.0)).unwrap();
        assert_eq!(script.segments.len(), 2);
        assert_eq!(script.segments[0].text, "One two three four. Five six seven eight.");
        assert_eq!(script.segments[1].text, "Nine ten eleven twelve.");
        assert_eq!(script.segments[1].index, 1);
        assert!((script.segments[0].estimated_seconds - 4.0).abs() < 1e-9);
    }

    #[test]
    fn run_on_sentence_stays_whole() {
        let long = "This sentence keeps going and going well past any sensible limit for one caption block.";
        let text = format!("Short one. {} Tail.", long);
        let script = segment(&text, &pacing(2.0)).unwrap();
        let texts: Vec<&str> = script.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Short one.", long, "Tail."]);
        assert!(script.segments[1].estimated_seconds > 2.0);
    }

    #[test]
    fn rejoined_segments_reproduce_text() {
        let text = "Did you know...   octopuses have three hearts?\n\nTwo pump blood to the gills!\n\
                    The third handles the rest. And when they swim, it stops";
        let script = segment(text, &pacing(3.0)).unwrap();
        assert!(script.segments.len() > 1);
        assert_eq!(normalized(&script.text()), normalized(text));
    }

    #[test]
    fn markup_and_directions_are_stripped() {
        let script = segment("**Stop scrolling.** [pause] # Listen up!", &pacing(10.0)).unwrap();
        assert_eq!(script.text(), "Stop scrolling. Listen up!");
    }

    #[test]
    fn decimals_and_abbreviations_do_not_end_sentences() {
        let text = "The market grew 3.5 percent last year. Dr. Smith says $2.5 trillion moved, e.g. into bonds.";
        let script = segment(text, &pacing(1.0)).unwrap();
        let texts: Vec<&str> = script.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "The market grew 3.5 percent last year.",
                "Dr. Smith says $2.5 trillion moved, e.g. into bonds."
            ]
        );
        assert_eq!(script.text(), text);
    }

    #[test]
    fn ordinary_symbols_survive_cleaning() {
        assert_eq!(
            clean_text("## Rule #1: use *snake_case* __names__, not `CamelCase`. ~~never~~"),
            "Rule #1: use snake_case names, not CamelCase. never"
        );
    }

    #[test]
    fn empty_script_is_rejected() {
        assert_eq!(segment("   \n\t ", &pacing(10.0)), Err(PipelineError::EmptyScript));
        assert_eq!(segment("[music] ... !!! **", &pacing(10.0)), Err(PipelineError::EmptyScript));
    }
}
