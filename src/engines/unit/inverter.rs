use ndarray::{Array2, Zip};
use rustfft::num_complex::Complex64;

use crate::Waveform;

use super::config::UnitConfig;
use super::features::{dct_matrix, mel_filterbank, Stft};
use super::model::UnitError;

/// Griffin-Lim momentum ("fast Griffin-Lim").
const MOMENTUM: f64 = 0.99;

/// Turns an MFCC sequence back into audio.
///
/// The cepstrum is undone with the transposed DCT, the mel power is spread
/// back over FFT bins, and Griffin-Lim recovers a phase. Phase estimation
/// starts from zero phase and there is no randomness, so identical input
/// always yields identical output. The result sounds buzzy: fine detail lost
/// by the mel and cepstral truncation does not come back.
pub struct Inverter {
    stft: Stft,
    /// `(n_mfcc, n_mels)` forward DCT; its transpose is the inverse.
    dct: Array2<f64>,
    /// `(n_bins, n_mels)` mel-to-linear interpolation weights.
    mel_to_linear: Array2<f64>,
    iterations: usize,
    sample_rate: u32,
}

impl Inverter {
    pub fn new(config: &UnitConfig) -> Self {
        let mel_basis = mel_filterbank(config.sample_rate, config.n_fft, config.n_mels);
        Self {
            stft: Stft::new(config.n_fft, config.hop_length),
            dct: dct_matrix(config.n_mfcc, config.n_mels),
            mel_to_linear: mel_to_linear(&mel_basis),
            iterations: config.griffin_lim_iterations,
            sample_rate: config.sample_rate,
        }
    }

    /// Approximate waveform of `features` (`(frames, n_mfcc)`).
    ///
    /// `frames` frames give `hop_length * (frames - 1)` samples.
    pub fn invert(&self, features: &Array2<f64>) -> Result<Waveform, UnitError> {
        if features.ncols() != self.dct.nrows() {
            return Err(UnitError::Dimension {
                expected: self.dct.nrows(),
                found: features.ncols(),
            });
        }
        if features.nrows() == 0 {
            return Ok(Waveform::new(Vec::new(), self.sample_rate));
        }

        let log_mel = features.dot(&self.dct);
        let mel_power = log_mel.mapv(|db| 10f64.powf(db / 10.0));
        let magnitude = mel_power
            .dot(&self.mel_to_linear.t())
            .mapv(|p| p.max(0.0).sqrt());

        let signal = self.griffin_lim(&magnitude);
        let peak = signal.iter().fold(0.0f64, |m, s| m.max(s.abs()));
        let gain = if peak > 1.0 { 1.0 / peak } else { 1.0 };
        let samples = signal.iter().map(|&s| (s * gain) as f32).collect();

        log::debug!(
            "Inverted {} frames into {} samples",
            features.nrows(),
            signal.len()
        );
        Ok(Waveform::new(samples, self.sample_rate))
    }

    fn griffin_lim(&self, magnitude: &Array2<f64>) -> Vec<f64> {
        let mut angles = magnitude.mapv(|_| Complex64::new(1.0, 0.0));
        let mut rebuilt = Array2::<Complex64>::zeros(magnitude.raw_dim());
        let blend = MOMENTUM / (1.0 + MOMENTUM);

        for _ in 0..self.iterations {
            let previous = rebuilt;
            let signal = self.stft.inverse(&with_phase(magnitude, &angles));
            rebuilt = self.stft.forward(&signal);

            Zip::from(&mut angles)
                .and(&rebuilt)
                .and(&previous)
                .for_each(|a, &r, &p| {
                    let next = r - p * blend;
                    *a = next / (next.norm() + 1e-16);
                });
        }

        self.stft.inverse(&with_phase(magnitude, &angles))
    }

    pub fn hop_length(&self) -> usize {
        self.stft.hop()
    }
}

fn with_phase(magnitude: &Array2<f64>, angles: &Array2<Complex64>) -> Array2<Complex64> {
    let mut out = angles.clone();
    Zip::from(&mut out)
        .and(magnitude)
        .for_each(|c, &m| *c *= m);
    out
}

/// Spread each mel band's power evenly over the bins it covers.
///
/// Weight of band `m` at bin `f` is `M[m,f] / (sum_f M[m,f] * sum_m M[m,f])`,
/// so a flat spectrum maps to itself. Bins no band covers stay silent.
fn mel_to_linear(mel_basis: &Array2<f64>) -> Array2<f64> {
    let (n_mels, n_bins) = mel_basis.dim();
    let band_area: Vec<f64> = (0..n_mels).map(|m| mel_basis.row(m).sum()).collect();
    let bin_cover: Vec<f64> = (0..n_bins).map(|f| mel_basis.column(f).sum()).collect();

    Array2::from_shape_fn((n_bins, n_mels), |(f, m)| {
        let w = mel_basis[[m, f]];
        if w > 0.0 && band_area[m] > 0.0 && bin_cover[f] > 0.0 {
            w / (band_area[m] * bin_cover[f])
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::unit::features::FeatureExtractor;
    use crate::engines::unit::testing::{small_config, tone};

    fn rms(samples: &[f32]) -> f64 {
        (samples.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn output_duration_matches_frame_count() {
        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        let inverter = Inverter::new(&config);

        let features = extractor.extract(&tone(330.0, 5000).samples, 16000).unwrap();
        let wave = inverter.invert(&features).unwrap();

        let implied = features.nrows() * config.hop_length;
        let diff = implied as i64 - wave.samples.len() as i64;
        assert!(diff.unsigned_abs() as usize <= config.hop_length);
        assert_eq!(wave.sample_rate, 16000);
    }

    #[test]
    fn inversion_is_deterministic() {
        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        let inverter = Inverter::new(&config);

        let features = extractor.extract(&tone(440.0, 3000).samples, 16000).unwrap();
        assert_eq!(
            inverter.invert(&features).unwrap(),
            inverter.invert(&features).unwrap()
        );
    }

    #[test]
    fn silence_frames_stay_quiet_and_speech_does_not() {
        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        let inverter = Inverter::new(&config);

        let silence = Array2::from_shape_fn((20, config.n_mfcc), |(_, j)| {
            extractor.silence_frame()[j]
        });
        let quiet = inverter.invert(&silence).unwrap();
        assert!(rms(&quiet.samples) < 1e-3);

        let features = extractor.extract(&tone(440.0, 3000).samples, 16000).unwrap();
        let loud = inverter.invert(&features).unwrap();
        assert!(rms(&loud.samples) > 1e-3);
        assert!(loud.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn empty_sequence_gives_empty_waveform() {
        let config = small_config();
        let inverter = Inverter::new(&config);
        let wave = inverter.invert(&Array2::zeros((0, config.n_mfcc))).unwrap();
        assert!(wave.is_empty());
    }

    #[test]
    fn wrong_coefficient_count_is_rejected() {
        let inverter = Inverter::new(&small_config());
        assert!(matches!(
            inverter.invert(&Array2::zeros((4, 20))),
            Err(UnitError::Dimension { expected: 13, found: 20 })
        ));
    }
}
