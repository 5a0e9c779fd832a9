//! Fixtures shared by the unit engine's tests.

use std::f64::consts::PI;
use std::path::PathBuf;

use ndarray::{Array1, Array2};

use crate::Waveform;

use super::catalog::Recording;
use super::config::UnitConfig;

/// Default configuration with a small analysis window so tests stay fast.
pub(crate) fn small_config() -> UnitConfig {
    UnitConfig {
        n_fft: 512,
        hop_length: 128,
        n_mels: 40,
        n_states: 3,
        frames_per_state: 5,
        em_iterations: 20,
        epochs: 200,
        griffin_lim_iterations: 8,
        seed: Some(42),
        ..UnitConfig::default()
    }
}

/// A 16 kHz sine with a little harmonic content.
pub(crate) fn tone(freq: f64, len: usize) -> Waveform {
    let samples = (0..len)
        .map(|i| {
            let t = i as f64 / 16000.0;
            (0.4 * (2.0 * PI * freq * t).sin() + 0.1 * (4.0 * PI * freq * t).sin()) as f32
        })
        .collect();
    Waveform::new(samples, 16000)
}

pub(crate) fn recording_with_average(file_name: &str, average: Array1<f64>) -> Recording {
    Recording {
        speaker: "test".to_string(),
        word: "aku".to_string(),
        file_name: file_name.to_string(),
        path: PathBuf::from(file_name),
        waveform: Waveform::new(vec![0.0; 16], 16000),
        features: Array2::zeros((1, average.len())),
        average,
    }
}
