use std::path::Path;

use derive_builder::Builder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::catalog::SelectionPolicy;
use super::engine::SynthesisMode;
use super::model::UnitError;
use super::vocab::Vocabulary;

/// Every tunable the unit engine consumes.
///
/// Missing JSON fields and unset builder fields take the [`Default`] values,
/// which mirror the usual 16 kHz, 13-coefficient MFCC setup.
///
/// ```rust
/// use kata_tts::engines::unit::{SynthesisMode, UnitConfigBuilder};
///
/// let config = UnitConfigBuilder::default()
///     .mode(SynthesisMode::Statistical)
///     .seed(7u64)
///     .build()?;
/// assert_eq!(config.n_states, 5);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct UnitConfig {
    /// Words the engine can speak.
    pub vocabulary: Vocabulary,
    /// Sample rate recordings are resampled to, and of all output audio.
    pub sample_rate: u32,
    /// FFT size of the short-time analysis.
    pub n_fft: usize,
    /// Hop between analysis frames, in samples.
    pub hop_length: usize,
    /// Number of mel bands.
    pub n_mels: usize,
    /// Number of cepstral coefficients kept per frame.
    pub n_mfcc: usize,
    /// Silence inserted between consecutive words.
    pub silence_gap_ms: u32,
    /// Hidden states per acoustic model.
    pub n_states: usize,
    /// Frames sampled per hidden state in statistical mode.
    pub frames_per_state: usize,
    /// Upper bound on Baum-Welch iterations.
    pub em_iterations: usize,
    /// EM stops once the log-likelihood gain drops below this.
    pub em_tolerance: f64,
    /// Floor applied to every emission variance.
    pub min_covar: f64,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    /// Regressor training epochs.
    pub epochs: usize,
    pub learning_rate: f64,
    /// Log the regressor loss every this many epochs.
    pub loss_log_interval: usize,
    pub griffin_lim_iterations: usize,
    pub mode: SynthesisMode,
    pub selection_policy: SelectionPolicy,
    /// Use a recorded unit when the requested mode has no artifact for a word.
    pub fallback_to_catalog: bool,
    /// Seed for k-means, regressor init, HMM sampling and random selection.
    /// `None` seeds from OS entropy, so training is not reproducible.
    pub seed: Option<u64>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            sample_rate: 16000,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 13,
            silence_gap_ms: 100,
            n_states: 5,
            frames_per_state: 15,
            em_iterations: 100,
            em_tolerance: 1e-2,
            min_covar: 1e-3,
            embedding_dim: 32,
            hidden_dim: 64,
            epochs: 300,
            learning_rate: 0.01,
            loss_log_interval: 50,
            griffin_lim_iterations: 32,
            mode: SynthesisMode::Concatenative,
            selection_policy: SelectionPolicy::First,
            fallback_to_catalog: true,
            seed: None,
        }
    }
}

impl UnitConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, UnitError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| UnitError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make analysis or training degenerate.
    pub fn validate(&self) -> Result<(), UnitError> {
        let positive = [
            ("sample_rate", self.sample_rate as usize),
            ("n_fft", self.n_fft),
            ("hop_length", self.hop_length),
            ("n_mels", self.n_mels),
            ("n_mfcc", self.n_mfcc),
            ("n_states", self.n_states),
            ("frames_per_state", self.frames_per_state),
            ("em_iterations", self.em_iterations),
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
            ("epochs", self.epochs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(UnitError::Config(format!("'{name}' must be positive")));
        }
        if self.vocabulary.is_empty() {
            return Err(UnitError::Config("vocabulary is empty".to_string()));
        }
        if self.n_fft % 2 != 0 {
            return Err(UnitError::Config("'n_fft' must be even".to_string()));
        }
        if self.hop_length > self.n_fft {
            return Err(UnitError::Config(
                "'hop_length' must not exceed 'n_fft'".to_string(),
            ));
        }
        if self.n_mfcc > self.n_mels {
            return Err(UnitError::Config(
                "'n_mfcc' must not exceed 'n_mels'".to_string(),
            ));
        }
        if self.learning_rate.is_nan()
            || self.learning_rate <= 0.0
            || self.min_covar.is_nan()
            || self.min_covar <= 0.0
        {
            return Err(UnitError::Config(
                "'learning_rate' and 'min_covar' must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Length of the inter-word silence in samples.
    pub fn silence_gap_samples(&self) -> usize {
        (self.silence_gap_ms as u64 * self.sample_rate as u64 / 1000) as usize
    }

    /// Length of the inter-word silence in analysis frames.
    pub fn silence_gap_frames(&self) -> usize {
        (self.silence_gap_samples() as f64 / self.hop_length as f64).round() as usize
    }

    /// Frames sampled from an acoustic model per word in statistical mode.
    pub fn statistical_frames(&self) -> usize {
        self.frames_per_state * self.n_states
    }

    /// Random source for training and random selection; seeded when `seed` is set.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl From<UnitConfigBuilderError> for UnitError {
    fn from(e: UnitConfigBuilderError) -> Self {
        UnitError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = UnitConfig::default();
        config.validate().unwrap();
        assert_eq!(config.silence_gap_samples(), 1600);
        assert_eq!(config.silence_gap_frames(), 3);
        assert_eq!(config.statistical_frames(), 75);
    }

    #[test]
    fn builder_overrides_only_given_fields() {
        let config = UnitConfigBuilder::default()
            .n_states(3usize)
            .mode(SynthesisMode::NeuralGuided)
            .seed(11u64)
            .build()
            .unwrap();
        assert_eq!(config.n_states, 3);
        assert_eq!(config.mode, SynthesisMode::NeuralGuided);
        assert_eq!(config.seed, Some(11));
        assert_eq!(config.n_mfcc, 13);
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.json");
        std::fs::write(
            &path,
            r#"{"vocabulary": ["Aku", "kamu"], "mode": "statistical", "selection_policy": "random"}"#,
        )
        .unwrap();

        let config = UnitConfig::from_json_file(&path).unwrap();
        assert_eq!(config.vocabulary.len(), 2);
        assert_eq!(config.mode, SynthesisMode::Statistical);
        assert_eq!(config.selection_policy, SelectionPolicy::Random);
        assert_eq!(config.hop_length, 512);
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = UnitConfig::default();
        config.n_states = 0;
        assert!(matches!(config.validate(), Err(UnitError::Config(_))));

        let mut config = UnitConfig::default();
        config.n_mfcc = 200;
        assert!(config.validate().is_err());
    }
}
