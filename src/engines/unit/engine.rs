use std::path::{Path, PathBuf};

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{SynthesisEngine, SynthesisResult, SynthesisWarning, Waveform};

use super::catalog::{Catalog, FsRecordingSource, Recording, RecordingSource, SelectionPolicy};
use super::config::UnitConfig;
use super::features::FeatureExtractor;
use super::inverter::Inverter;
use super::model::{SpeakerModels, UnitError};
use super::selector::nearest;
use super::store::{ArtifactStore, DirArtifactStore};

/// How words are turned into audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMode {
    /// Recorded units picked by the selection policy.
    #[default]
    Concatenative,
    /// The regressor predicts a feature target; the nearest recording is used.
    NeuralGuided,
    /// Frames sampled from each word's HMM, inverted to audio.
    Statistical,
}

/// Parameters for loading a speaker.
#[derive(Debug, Clone, Default)]
pub struct UnitModelParams {
    /// Speaker directory to load. `None` picks the only speaker directory
    /// under the recordings root and fails if there are several.
    pub speaker: Option<String>,
    /// Directory holding one sub-directory of recordings per speaker.
    /// `None` uses the model path, so recordings and artifacts share
    /// `<root>/<speaker>/`.
    pub recordings_root: Option<PathBuf>,
}

/// Per-request overrides of the configured mode and selection policy.
#[derive(Debug, Clone, Default)]
pub struct UnitInferenceParams {
    pub mode: Option<SynthesisMode>,
    pub selection_policy: Option<SelectionPolicy>,
}

struct LoadedSpeaker {
    catalog: Catalog,
    models: SpeakerModels,
}

/// Small-vocabulary engine built on recorded word units.
///
/// ```rust,no_run
/// use kata_tts::{SynthesisEngine, engines::unit::{SynthesisMode, UnitEngine, UnitInferenceParams}};
/// use std::path::PathBuf;
///
/// let mut engine = UnitEngine::new();
/// engine.load_model(&PathBuf::from("models/unit"))?;
///
/// let params = UnitInferenceParams {
///     mode: Some(SynthesisMode::NeuralGuided),
///     ..Default::default()
/// };
/// let result = engine.synthesize("selamat pagi", Some(params))?;
/// for warning in &result.warnings {
///     eprintln!("{warning}");
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct UnitEngine {
    config: UnitConfig,
    extractor: FeatureExtractor,
    inverter: Inverter,
    source: Box<dyn RecordingSource>,
    loaded: Option<LoadedSpeaker>,
    rng: StdRng,
}

impl Default for UnitEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitEngine {
    /// Engine with the default configuration reading `.wav` files from disk.
    pub fn new() -> Self {
        Self::assemble(UnitConfig::default())
    }

    pub fn with_config(config: UnitConfig) -> Result<Self, UnitError> {
        config.validate()?;
        Ok(Self::assemble(config))
    }

    /// Replace where recordings are read from.
    pub fn with_source(mut self, source: impl RecordingSource + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    fn assemble(config: UnitConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(&config),
            inverter: Inverter::new(&config),
            source: Box::new(FsRecordingSource),
            loaded: None,
            rng: config.rng(),
            config,
        }
    }

    /// Build the catalog of `speaker` under `recordings_root` and load the
    /// speaker's trained artifacts from `store`.
    ///
    /// Missing artifacts are not an error here; they surface as warnings or
    /// fallbacks when a word needs them.
    pub fn load_speaker<S: ArtifactStore + ?Sized>(
        &mut self,
        recordings_root: &Path,
        speaker: &str,
        store: &S,
    ) -> Result<(), UnitError> {
        let catalog = Catalog::build(
            self.source.as_ref(),
            recordings_root,
            speaker,
            &self.config.vocabulary,
            &self.extractor,
        )?;
        let models = SpeakerModels::load(store, speaker, &self.config.vocabulary);
        self.loaded = Some(LoadedSpeaker { catalog, models });
        Ok(())
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.loaded.as_ref().map(|l| &l.catalog)
    }

    pub fn models(&self) -> Option<&SpeakerModels> {
        self.loaded.as_ref().map(|l| &l.models)
    }

    /// Synthesize `text` with an explicit mode and selection policy.
    ///
    /// Words that cannot be produced are skipped with a warning; an empty
    /// waveform means no word could be produced.
    pub fn synthesize_text(
        &mut self,
        text: &str,
        mode: SynthesisMode,
        policy: SelectionPolicy,
    ) -> Result<SynthesisResult, UnitError> {
        let loaded = self.loaded.as_ref().ok_or(UnitError::ModelNotLoaded)?;
        let mut planner = Planner {
            config: &self.config,
            catalog: &loaded.catalog,
            models: &loaded.models,
            policy,
            rng: &mut self.rng,
            warnings: Vec::new(),
        };

        let words: Vec<String> = text
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|token| {
                let known = planner.config.vocabulary.contains(token);
                if !known {
                    planner.warn(SynthesisWarning::UnknownToken(token.clone()));
                }
                known
            })
            .collect();
        log::debug!("Synthesizing {} words in {mode:?} mode", words.len());

        let waveform = match mode {
            SynthesisMode::Concatenative => {
                let units: Vec<&Recording> =
                    words.iter().filter_map(|w| planner.select(w)).collect();
                join_units(&units, &self.config)
            }
            SynthesisMode::NeuralGuided => {
                let units: Vec<&Recording> =
                    words.iter().filter_map(|w| planner.guided(w)).collect();
                join_units(&units, &self.config)
            }
            SynthesisMode::Statistical => {
                let segments: Vec<Array2<f64>> =
                    words.iter().filter_map(|w| planner.generated(w)).collect();
                render_frames(&segments, &self.extractor, &self.inverter, &self.config)?
            }
        };

        Ok(SynthesisResult {
            waveform,
            warnings: planner.warnings,
        })
    }
}

/// Per-request state: where units come from and the warnings collected so far.
struct Planner<'a> {
    config: &'a UnitConfig,
    catalog: &'a Catalog,
    models: &'a SpeakerModels,
    policy: SelectionPolicy,
    rng: &'a mut StdRng,
    warnings: Vec<SynthesisWarning>,
}

impl<'a> Planner<'a> {
    fn warn(&mut self, warning: SynthesisWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    fn select(&mut self, word: &str) -> Option<&'a Recording> {
        match self.catalog.select_one(word, self.policy, &mut *self.rng) {
            Ok(recording) => Some(recording),
            Err(_) => {
                self.warn(SynthesisWarning::WordNotFound(word.to_string()));
                None
            }
        }
    }

    fn guided(&mut self, word: &str) -> Option<&'a Recording> {
        let predicted = match self.models.regressor() {
            Ok(regressor) if regressor.dim() != self.config.n_mfcc => Err(UnitError::Dimension {
                expected: self.config.n_mfcc,
                found: regressor.dim(),
            }),
            Ok(regressor) => regressor.predict(word),
            Err(e) => Err(e),
        };
        let target = match predicted {
            Ok(target) => target,
            Err(e) => return self.fall_back(word, e),
        };
        let candidates = self.catalog.lookup(word).unwrap_or(&[]);
        match nearest(&target, candidates) {
            Ok(recording) => Some(recording),
            Err(UnitError::NoCandidate) => {
                self.warn(SynthesisWarning::NoCandidate(word.to_string()));
                None
            }
            Err(e) => self.fall_back(word, e),
        }
    }

    fn generated(&mut self, word: &str) -> Option<Array2<f64>> {
        let sampled = match self.models.acoustic(word) {
            Ok(model) if model.dim() != self.config.n_mfcc => Err(UnitError::Dimension {
                expected: self.config.n_mfcc,
                found: model.dim(),
            }),
            Ok(model) => {
                let frames = self.config.frames_per_state * model.n_states();
                model.sample(frames, &mut *self.rng)
            }
            Err(e) => Err(e),
        };
        match sampled {
            Ok(frames) => Some(frames),
            Err(e) => self
                .fall_back(word, e)
                .map(|recording| recording.features.clone()),
        }
    }

    /// Use a catalog unit for `word` when its model could not be used.
    fn fall_back(&mut self, word: &str, cause: UnitError) -> Option<&'a Recording> {
        let reason = match cause {
            UnitError::ModelLoad { reason, .. } => reason,
            other => other.to_string(),
        };
        if !self.config.fallback_to_catalog {
            self.warn(SynthesisWarning::NoModel {
                word: word.to_string(),
                reason,
            });
            return None;
        }
        let recording = self.select(word)?;
        self.warn(SynthesisWarning::Fallback {
            word: word.to_string(),
            reason,
        });
        Some(recording)
    }
}

/// Join generated frame sequences with silence frames and invert once.
fn render_frames(
    segments: &[Array2<f64>],
    extractor: &FeatureExtractor,
    inverter: &Inverter,
    config: &UnitConfig,
) -> Result<Waveform, UnitError> {
    if segments.is_empty() {
        return Ok(Waveform::new(Vec::new(), config.sample_rate));
    }
    let silence_frame = extractor.silence_frame();
    let gap = Array2::from_shape_fn(
        (config.silence_gap_frames(), silence_frame.len()),
        |(_, j)| silence_frame[j],
    );

    let mut views: Vec<ArrayView2<f64>> = Vec::with_capacity(segments.len() * 2);
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            views.push(gap.view());
        }
        views.push(segment.view());
    }
    let frames = concatenate(Axis(0), &views)?;
    inverter.invert(&frames)
}

/// Recorded units back to back with one silence gap between neighbours.
fn join_units(units: &[&Recording], config: &UnitConfig) -> Waveform {
    let gap = config.silence_gap_samples();
    let total = units.iter().map(|u| u.waveform.samples.len()).sum::<usize>()
        + gap * units.len().saturating_sub(1);

    let mut samples = Vec::with_capacity(total);
    for (i, unit) in units.iter().enumerate() {
        if i > 0 {
            samples.resize(samples.len() + gap, 0.0);
        }
        samples.extend_from_slice(&unit.waveform.samples);
    }
    Waveform::new(samples, config.sample_rate)
}

/// The single speaker directory under `root`.
fn sole_speaker(root: &Path) -> Result<String, UnitError> {
    let mut speakers = FsRecordingSource::speakers(root)?;
    if speakers.len() != 1 {
        return Err(UnitError::Config(format!(
            "expected one speaker directory under {}, found {}; set a speaker explicitly",
            root.display(),
            speakers.len()
        )));
    }
    Ok(speakers.remove(0))
}

impl Drop for UnitEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for UnitEngine {
    type SynthesisParams = UnitInferenceParams;
    type ModelParams = UnitModelParams;

    /// `model_path` is the artifact directory written by training.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let recordings_root = params
            .recordings_root
            .unwrap_or_else(|| model_path.to_path_buf());
        let speaker = match params.speaker {
            Some(speaker) => speaker,
            None => sole_speaker(&recordings_root)?,
        };
        let store = DirArtifactStore::new(model_path);
        self.load_speaker(&recordings_root, &speaker, &store)?;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.loaded = None;
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        let p = params.unwrap_or_default();
        let mode = p.mode.unwrap_or(self.config.mode);
        let policy = p.selection_policy.unwrap_or(self.config.selection_policy);
        Ok(self.synthesize_text(text, mode, policy)?)
    }

    /// Like the default, but an utterance with no audio is
    /// [`UnitError::NothingProduced`] and no file is written.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        let result = self.synthesize(text, params)?;
        if result.waveform.is_empty() {
            return Err(UnitError::NothingProduced.into());
        }
        result.waveform.write_wav(wav_path)?;
        Ok(result)
    }
}
