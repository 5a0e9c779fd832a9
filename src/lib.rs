//! # kata-tts
//!
//! A Rust library for small-vocabulary text-to-speech built from recorded
//! word units.
//!
//! ## Features
//!
//! - **Concatenative synthesis**: joins recorded words with a fixed silence gap
//! - **Neural-guided unit selection**: a tiny word regressor predicts the
//!   average cepstrum of a word and the closest real recording is used
//! - **Statistical synthesis**: per-word Gaussian HMMs are sampled and the
//!   generated MFCC frames are inverted with Griffin-Lim
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! kata-tts = { version = "0.1", features = ["unit"] }
//! ```
//!
//! ```ignore
//! use std::path::PathBuf;
//! use kata_tts::{engines::unit::UnitEngine, SynthesisEngine};
//!
//! let mut engine = UnitEngine::new();
//! engine.load_model(&PathBuf::from("models"))?;
//!
//! let result = engine.synthesize("selamat pagi", None)?;
//! result.waveform.write_wav(&PathBuf::from("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engines;

use std::fmt;
use std::path::Path;

/// Mono audio samples with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Raw audio samples as f32 values in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A waveform of `duration_ms` milliseconds of digital silence.
    pub fn silence(duration_ms: u32, sample_rate: u32) -> Self {
        let len = (duration_ms as u64 * sample_rate as u64 / 1000) as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Read a WAV file, mixing multi-channel audio down to mono.
    pub fn read_wav(path: &Path) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A per-word problem that was recovered from during synthesis.
///
/// Words are never dropped silently: each skipped token or fallback adds one
/// warning to the [`SynthesisResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisWarning {
    /// The token is not part of the vocabulary.
    UnknownToken(String),
    /// The speaker has no recording of this word.
    WordNotFound(String),
    /// No trained artifact could be used for this word.
    NoModel { word: String, reason: String },
    /// Unit selection had no candidate recording for this word.
    NoCandidate(String),
    /// The word was produced with catalog selection instead of the requested mode.
    Fallback { word: String, reason: String },
}

impl fmt::Display for SynthesisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownToken(t) => write!(f, "word '{t}' is not in the vocabulary"),
            Self::WordNotFound(w) => write!(f, "no recording found for word '{w}'"),
            Self::NoModel { word, reason } => write!(f, "no model for word '{word}': {reason}"),
            Self::NoCandidate(w) => write!(f, "no candidate recording for word '{w}'"),
            Self::Fallback { word, reason } => {
                write!(f, "word '{word}' fell back to a recorded unit: {reason}")
            }
        }
    }
}

/// Returned by [`SynthesisEngine::synthesize_to_file`] when the text produced
/// no audio at all.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Nothing produced: no word of the text could be synthesized")]
pub struct NothingProduced;

/// The result of a synthesis (text-to-speech) operation.
#[derive(Debug)]
pub struct SynthesisResult {
    /// The synthesized utterance; empty when no word could be produced
    pub waveform: Waveform,
    /// Per-word problems encountered along the way
    pub warnings: Vec<SynthesisWarning>,
}

impl SynthesisResult {
    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.waveform.duration_secs()
    }
}

/// Common interface for text-to-speech synthesis engines.
///
/// This trait defines the standard operations that all synthesis engines must support.
/// Each engine may have different parameter types for model loading and inference configuration.
pub trait SynthesisEngine {
    /// Parameters for configuring inference behavior (mode, selection policy, etc.)
    type SynthesisParams;
    /// Parameters for configuring model loading (speaker, recordings, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Synthesize speech from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>>;

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `Waveform::write_wav()`.
    /// An empty utterance fails with [`NothingProduced`] and no file is written.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        let result = self.synthesize(text, params)?;
        if result.waveform.is_empty() {
            return Err(NothingProduced.into());
        }
        result.waveform.write_wav(wav_path)?;
        Ok(result)
    }
}
