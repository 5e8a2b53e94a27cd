use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

/// Narration for one segment, as produced by a speech adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub segment: usize,
    /// Complete WAV file bytes.
    pub wav: Vec<u8>,
    /// Duration measured from the rendered audio, not the word-count estimate.
    pub duration: f64,
    /// Per-word timestamps, when the provider returns them.
    pub words: Option<Vec<WordTiming>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64, hound::Error> {
    let reader = WavReader::open(path)?;
    Ok(reader_duration(&reader))
}

pub fn wav_bytes_duration_seconds(bytes: &[u8]) -> Result<f64, hound::Error> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    Ok(reader_duration(&reader))
}

fn reader_duration<R: std::io::Read>(reader: &WavReader<R>) -> f64 {
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    frames / spec.sample_rate as f64
}

/// Wraps raw little-endian 16-bit mono PCM into a WAV container.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut out, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(out.into_inner())
}

/// Appends the segment tracks back to back into one WAV file.
///
/// All parts must share the first part's format; a single voice provider
/// renders every segment of a run, so a mismatch means corrupt input.
pub fn concat_wavs(parts: &[&[u8]], out_path: &Path) -> Result<f64, hound::Error> {
    let Some(first) = parts.first() else {
        return Err(hound::Error::FormatError("no audio to concatenate"));
    };
    let spec = WavReader::new(Cursor::new(*first))?.spec();
    let mut writer = WavWriter::create(out_path, spec)?;
    let mut frames = 0u64;
    for part in parts {
        let mut reader = WavReader::new(Cursor::new(*part))?;
        if reader.spec() != spec {
            return Err(hound::Error::FormatError("segment audio formats differ"));
        }
        frames += reader.duration() as u64;
        match spec.sample_format {
            SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
            }
            SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
            }
        }
    }
    writer.finalize()?;
    Ok(frames as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
pub(crate) fn silent_wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let samples = (seconds * sample_rate as f64).round() as usize;
    pcm16_to_wav(&vec![0u8; samples * 2], sample_rate).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_wrapping_measures_duration() {
        // 1.5 seconds of 16-bit mono at 16 kHz.
        let pcm = vec![0u8; 16_000 * 2 * 3 / 2];
        let wav = pcm16_to_wav(&pcm, 16_000).unwrap();
        let secs = wav_bytes_duration_seconds(&wav).unwrap();
        assert!((secs - 1.5).abs() < 1e-9);
    }

    #[test]
    fn concat_sums_durations() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("narration.wav");
        let a = silent_wav(1.25, 22_050);
        let b = silent_wav(2.0, 22_050);
        let total = concat_wavs(&[&a, &b], &out).unwrap();
        assert!((total - 3.25).abs() < 1e-4);
        assert!((wav_duration_seconds(&out).unwrap() - 3.25).abs() < 1e-4);
    }

    #[test]
    fn concat_rejects_mixed_formats() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("narration.wav");
        let a = silent_wav(0.5, 22_050);
        let b = silent_wav(0.5, 44_100);
        assert!(concat_wavs(&[&a, &b], &out).is_err());
        assert!(concat_wavs(&[], &out).is_err());
    }

    #[test]
    fn garbage_is_not_audio() {
        assert!(wav_bytes_duration_seconds(b"definitely not a wav").is_err());
    }
}
