use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView2, Axis};

use super::catalog::Catalog;
use super::config::UnitConfig;
use super::hmm::{AcousticModel, HmmParams};
use super::model::UnitError;
use super::regressor::{RegressorParams, WordRegressor};
use super::store::{save_artifact, ArtifactKey, ArtifactStore};

/// Outcome of [`train_speaker`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub speaker: String,
    /// Words that now have an acoustic model.
    pub trained: Vec<String>,
    /// Vocabulary words without recordings; they have no model.
    pub without_data: Vec<String>,
    /// Words whose fit failed, with the reason; they have no model either.
    pub failed: Vec<(String, String)>,
    /// Final regressor loss, in standardised units.
    pub regressor_loss: Option<f64>,
}

/// Train one acoustic model per vocabulary word and the speaker's regressor,
/// and persist them to `store`.
///
/// A word with no recordings, or whose fit fails, gets no model and is listed
/// in the report; any artifact left from an earlier run for that word is
/// removed so the store matches the current data.
pub fn train_speaker<S: ArtifactStore + ?Sized>(
    catalog: &Catalog,
    config: &UnitConfig,
    store: &mut S,
) -> Result<TrainingReport, UnitError> {
    config.validate()?;
    let speaker = catalog.speaker();
    let mut rng = config.rng();
    let hmm_params = HmmParams::from(config);

    let mut report = TrainingReport {
        speaker: speaker.to_string(),
        trained: Vec::new(),
        without_data: Vec::new(),
        failed: Vec::new(),
        regressor_loss: None,
    };

    log::info!("Training acoustic models for speaker '{speaker}'");
    for word in config.vocabulary.words() {
        let sequences: Vec<ArrayView2<f64>> = catalog
            .lookup(word)
            .map(|recs| recs.iter().map(|r| r.features.view()).collect())
            .unwrap_or_default();

        let fitted = AcousticModel::fit(word, &sequences, &hmm_params, &mut rng);
        record_fit(store, &mut report, word, fitted)?;
    }

    let targets = word_targets(catalog)?;
    log::info!(
        "Training word regressor for speaker '{speaker}' on {} words",
        targets.len()
    );
    let regressor = WordRegressor::train(&targets, &RegressorParams::from(config), &mut rng)?;
    save_artifact(store, &ArtifactKey::regressor(speaker), &regressor)?;
    report.regressor_loss = regressor.final_loss();

    log::info!(
        "Finished speaker '{speaker}': {} models, {} words without data, {} failed",
        report.trained.len(),
        report.without_data.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Persist a fitted model, or drop the word's stale artifact and note why it
/// has none. Only store failures abort training.
fn record_fit<S: ArtifactStore + ?Sized>(
    store: &mut S,
    report: &mut TrainingReport,
    word: &str,
    fitted: Result<AcousticModel, UnitError>,
) -> Result<(), UnitError> {
    let key = ArtifactKey::acoustic(&report.speaker, word);
    let model = match fitted {
        Ok(model) => model,
        Err(e) => {
            match e {
                UnitError::NoTrainingData(_) => {
                    log::warn!("No data for '{word}', skipping its acoustic model");
                    report.without_data.push(word.to_string());
                }
                other => {
                    log::warn!("Fitting '{word}' failed, skipping its acoustic model: {other}");
                    report.failed.push((word.to_string(), other.to_string()));
                }
            }
            if store.remove(&key)? {
                log::info!("Removed stale artifact {key}");
            }
            return Ok(());
        }
    };
    save_artifact(store, &key, &model)?;
    report.trained.push(word.to_string());
    Ok(())
}

/// Mean of the per-recording average features, per word.
fn word_targets(catalog: &Catalog) -> Result<BTreeMap<String, Array1<f64>>, UnitError> {
    let mut targets = BTreeMap::new();
    for word in catalog.words() {
        let rows: Vec<_> = catalog.lookup(word)?.iter().map(|r| r.average.view()).collect();
        let stacked = ndarray::stack(Axis(0), &rows)?;
        if let Some(mean) = stacked.mean_axis(Axis(0)) {
            targets.insert(word.to_string(), mean);
        }
    }
    Ok(targets)
}
