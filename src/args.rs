use clap::Parser;
use shortsmith::Niche;
use shortsmith::config::VoiceProvider;
use std::path::PathBuf;

/// Generate short vertical videos from trending topics.
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Args {
    /// TOML settings file; missing values take their defaults.
    #[clap(long)]
    pub config: Option<PathBuf>,

    #[clap(long, value_enum, ignore_case = true)]
    pub niche: Option<Niche>,

    /// Narrate this topic instead of asking the trend source.
    #[clap(long)]
    pub topic: Option<String>,

    /// Number of videos to generate.
    #[clap(long)]
    pub batch: Option<usize>,

    /// Runs allowed in flight at once.
    #[clap(long)]
    pub concurrency: Option<usize>,

    #[clap(long)]
    pub out_dir: Option<PathBuf>,

    #[clap(long, value_enum)]
    pub voice: Option<VoiceProvider>,

    /// Background music mixed under the narration.
    #[clap(long)]
    pub music: Option<PathBuf>,

    /// Words per caption cue.
    #[clap(long)]
    pub chunk_words: Option<usize>,
}
