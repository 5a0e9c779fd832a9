//! Recorded-unit text-to-speech for a small, fixed vocabulary.
//!
//! Each speaker records every vocabulary word one or more times. The engine
//! analyses the recordings into MFCC frames, trains one Gaussian HMM per word
//! plus a small word regressor, and speaks text word by word in one of three
//! modes:
//!
//! | Mode | Source of audio |
//! |---|---|
//! | `Concatenative` | A recording chosen by the selection policy |
//! | `NeuralGuided` | The recording nearest to the regressor's prediction |
//! | `Statistical` | HMM-sampled frames, inverted with Griffin-Lim |
//!
//! Words outside the vocabulary, words without recordings and words without
//! trained models never abort a request; they are skipped (or fall back to a
//! recording) and reported as [`SynthesisWarning`](crate::SynthesisWarning)s.
//!
//! # Directory Layout
//!
//! Recordings are named `<word><anything>.wav`; the leading letters name the
//! word. Training writes its artifacts next to them by default:
//!
//! ```text
//! models/unit/
//! └── afin/                 # one directory per speaker
//!     ├── aku_1.wav
//!     ├── aku_2.wav
//!     ├── kamu_1.wav
//!     ├── acoustic/
//!     │   ├── aku.json      # per-word HMM
//!     │   └── kamu.json
//!     └── regressor.json    # per-speaker word regressor
//! ```
//!
//! # Examples
//!
//! ## Training a speaker
//!
//! ```rust,no_run
//! use kata_tts::engines::unit::{
//!     train_speaker, Catalog, DirArtifactStore, FeatureExtractor, FsRecordingSource, UnitConfig,
//! };
//! use std::path::Path;
//!
//! let config = UnitConfig::default();
//! let extractor = FeatureExtractor::new(&config);
//! let root = Path::new("models/unit");
//! let catalog = Catalog::build(&FsRecordingSource, root, "afin", &config.vocabulary, &extractor)?;
//!
//! let mut store = DirArtifactStore::new(root);
//! let report = train_speaker(&catalog, &config, &mut store)?;
//! println!("trained {:?}, no data for {:?}", report.trained, report.without_data);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Synthesizing
//!
//! ```rust,no_run
//! use kata_tts::{SynthesisEngine, engines::unit::{SynthesisMode, UnitEngine, UnitInferenceParams, UnitModelParams}};
//! use std::path::PathBuf;
//!
//! let mut engine = UnitEngine::new();
//! engine.load_model_with_params(
//!     &PathBuf::from("models/unit"),
//!     UnitModelParams {
//!         speaker: Some("afin".to_string()),
//!         ..Default::default()
//!     },
//! )?;
//!
//! let params = UnitInferenceParams {
//!     mode: Some(SynthesisMode::Statistical),
//!     ..Default::default()
//! };
//! engine.synthesize_to_file("selamat malam", &PathBuf::from("out.wav"), Some(params))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod features;
pub mod hmm;
pub mod inverter;
pub mod model;
pub mod regressor;
pub mod selector;
pub mod store;
pub mod training;
pub mod vocab;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{
    Catalog, FsRecordingSource, MemoryRecordingSource, Recording, RecordingSource,
    SelectionPolicy,
};
pub use config::{UnitConfig, UnitConfigBuilder};
pub use engine::{SynthesisMode, UnitEngine, UnitInferenceParams, UnitModelParams};
pub use features::FeatureExtractor;
pub use hmm::AcousticModel;
pub use inverter::Inverter;
pub use model::{SpeakerModels, UnitError};
pub use regressor::WordRegressor;
pub use store::{ArtifactKey, ArtifactStore, DirArtifactStore, MemoryArtifactStore};
pub use training::{train_speaker, TrainingReport};
pub use vocab::Vocabulary;
