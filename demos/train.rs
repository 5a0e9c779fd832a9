use std::path::PathBuf;
use std::time::Instant;

use kata_tts::engines::unit::{
    train_speaker, Catalog, DirArtifactStore, FeatureExtractor, FsRecordingSource, UnitConfig,
};

/// Usage: `train [RECORDINGS_ROOT] [CONFIG_JSON]`
///
/// Trains every speaker directory under the recordings root and writes the
/// artifacts next to the recordings.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let root = PathBuf::from(args.next().unwrap_or_else(|| "models/unit".to_string()));
    let config = match args.next() {
        Some(path) => UnitConfig::from_json_file(&PathBuf::from(path))?,
        None => UnitConfig::default(),
    };

    let extractor = FeatureExtractor::new(&config);
    let mut store = DirArtifactStore::new(&root);

    for speaker in FsRecordingSource::speakers(&root)? {
        let start = Instant::now();
        let catalog = match Catalog::build(
            &FsRecordingSource,
            &root,
            &speaker,
            &config.vocabulary,
            &extractor,
        ) {
            Ok(catalog) => catalog,
            Err(e) => {
                println!("{speaker}: skipped ({e})");
                continue;
            }
        };

        let report = train_speaker(&catalog, &config, &mut store)?;
        println!(
            "{speaker}: {} recordings, {} models in {:.2?}",
            catalog.len(),
            report.trained.len(),
            start.elapsed()
        );
        if !report.without_data.is_empty() {
            println!("  no recordings for: {}", report.without_data.join(", "));
        }
        for (word, reason) in &report.failed {
            println!("  failed to train '{word}': {reason}");
        }
        if let Some(loss) = report.regressor_loss {
            println!("  regressor loss: {loss:.4}");
        }
    }

    Ok(())
}
