use std::path::PathBuf;
use std::time::Instant;

use kata_tts::{
    engines::unit::{SynthesisMode, UnitEngine, UnitInferenceParams, UnitModelParams},
    SynthesisEngine,
};

/// Usage: `synthesize SPEAKER MODE "TEXT" [OUTPUT_WAV] [MODEL_DIR]`
///
/// MODE is one of `concatenative`, `neural_guided` or `statistical`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprintln!("usage: synthesize SPEAKER MODE \"TEXT\" [OUTPUT_WAV] [MODEL_DIR]");
        std::process::exit(2);
    }
    let mode: SynthesisMode = serde_json::from_value(serde_json::Value::String(args[1].clone()))
        .map_err(|_| format!("unknown mode '{}'", args[1]))?;
    let text = &args[2];
    let output = PathBuf::from(args.get(3).map(String::as_str).unwrap_or("output.wav"));
    let model_path = PathBuf::from(args.get(4).map(String::as_str).unwrap_or("models/unit"));

    let mut engine = UnitEngine::new();
    let load_start = Instant::now();
    engine.load_model_with_params(
        &model_path,
        UnitModelParams {
            speaker: Some(args[0].clone()),
            ..Default::default()
        },
    )?;
    println!("Speaker '{}' loaded in {:.2?}", args[0], load_start.elapsed());

    let params = UnitInferenceParams {
        mode: Some(mode),
        ..Default::default()
    };
    let synth_start = Instant::now();
    let result = engine.synthesize(text, Some(params))?;
    for warning in &result.warnings {
        println!("warning: {warning}");
    }

    if result.waveform.is_empty() {
        println!("Nothing produced; no file written");
        return Ok(());
    }
    println!(
        "Synthesized {:.2}s audio in {:.2?}",
        result.duration_secs(),
        synth_start.elapsed()
    );

    result.waveform.write_wav(&output)?;
    println!("Saved to {}", output.display());

    engine.unload_model();
    Ok(())
}
