use std::collections::BTreeMap;

use super::hmm::AcousticModel;
use super::regressor::WordRegressor;
use super::store::{load_artifact, ArtifactKey, ArtifactStore};
use super::vocab::Vocabulary;

#[derive(thiserror::Error, Debug)]
pub enum UnitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Feature extraction failed: {0}")]
    Extraction(String),
    #[error("No recordings of any vocabulary word found for speaker '{0}'")]
    CatalogEmpty(String),
    #[error("No recording of word '{0}' in the catalog")]
    WordNotFound(String),
    #[error("Word '{0}' was not part of the regressor's training data")]
    UnknownWord(String),
    #[error("No candidate recordings to select from")]
    NoCandidate,
    #[error("Failed to load artifact {key}: {reason}")]
    ModelLoad { key: String, reason: String },
    #[error("No training data for '{0}'")]
    NoTrainingData(String),
    #[error("Expected feature dimension {expected}, got {found}")]
    Dimension { expected: usize, found: usize },
    #[error("Training failed: {0}")]
    Training(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Nothing produced: no word of the text could be synthesized")]
    NothingProduced,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// The trained artifacts of one speaker, loaded read-only.
///
/// Loading never fails as a whole: a word whose acoustic model is missing or
/// corrupt is remembered with the reason, and asking for it later yields
/// [`UnitError::ModelLoad`] so the synthesizer can fall back or warn.
#[derive(Debug, Default)]
pub struct SpeakerModels {
    speaker: String,
    acoustic: BTreeMap<String, AcousticModel>,
    missing: BTreeMap<String, String>,
    regressor: Option<WordRegressor>,
    regressor_error: Option<String>,
}

impl SpeakerModels {
    pub fn load<S: ArtifactStore + ?Sized>(store: &S, speaker: &str, vocab: &Vocabulary) -> Self {
        let mut acoustic = BTreeMap::new();
        let mut missing = BTreeMap::new();

        for word in vocab.words() {
            let key = ArtifactKey::acoustic(speaker, word);
            match load_artifact::<AcousticModel, _>(store, &key) {
                Ok(model) => {
                    acoustic.insert(word.clone(), model);
                }
                Err(e) => {
                    log::debug!("No acoustic model for '{word}': {e}");
                    missing.insert(word.clone(), load_reason(e));
                }
            }
        }

        let (regressor, regressor_error) =
            match load_artifact::<WordRegressor, _>(store, &ArtifactKey::regressor(speaker)) {
                Ok(r) => (Some(r), None),
                Err(e) => {
                    log::debug!("No regressor for speaker '{speaker}': {e}");
                    (None, Some(load_reason(e)))
                }
            };

        log::info!(
            "Loaded {} acoustic models for speaker '{speaker}' (regressor: {})",
            acoustic.len(),
            if regressor.is_some() { "yes" } else { "no" }
        );

        Self {
            speaker: speaker.to_string(),
            acoustic,
            missing,
            regressor,
            regressor_error,
        }
    }

    pub fn speaker(&self) -> &str {
        &self.speaker
    }

    /// Words that have a usable acoustic model, sorted.
    pub fn modeled_words(&self) -> impl Iterator<Item = &str> {
        self.acoustic.keys().map(|w| w.as_str())
    }

    pub fn acoustic(&self, word: &str) -> Result<&AcousticModel, UnitError> {
        let word = word.to_lowercase();
        self.acoustic.get(&word).ok_or_else(|| UnitError::ModelLoad {
            key: ArtifactKey::acoustic(&self.speaker, &word).to_string(),
            reason: self
                .missing
                .get(&word)
                .cloned()
                .unwrap_or_else(|| "word is not in the vocabulary".to_string()),
        })
    }

    pub fn regressor(&self) -> Result<&WordRegressor, UnitError> {
        self.regressor.as_ref().ok_or_else(|| UnitError::ModelLoad {
            key: ArtifactKey::regressor(&self.speaker).to_string(),
            reason: self
                .regressor_error
                .clone()
                .unwrap_or_else(|| "not loaded".to_string()),
        })
    }
}

fn load_reason(e: UnitError) -> String {
    match e {
        UnitError::ModelLoad { reason, .. } => reason,
        other => other.to_string(),
    }
}
