use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array1, Array2, Axis};
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use super::config::UnitConfig;
use super::model::UnitError;

/// Floor applied to mel power before taking the log.
pub const AMIN: f64 = 1e-10;

/// Dynamic range kept below the loudest bin, in dB.
pub const TOP_DB: f64 = 80.0;

/// Log-mel level of digital silence.
pub const SILENCE_DB: f64 = -100.0;

/// Short-time cepstral analysis (MFCC).
///
/// Frames are centred: the signal is zero-padded by `n_fft / 2` on both
/// sides, so a waveform of `n` samples yields `1 + n / hop_length` frames.
/// The output of [`extract`](Self::extract) has one row per frame and
/// `n_mfcc` columns.
pub struct FeatureExtractor {
    sample_rate: u32,
    n_mfcc: usize,
    stft: Stft,
    mel_basis: Array2<f64>,
    dct: Array2<f64>,
}

impl FeatureExtractor {
    pub fn new(config: &UnitConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            n_mfcc: config.n_mfcc,
            stft: Stft::new(config.n_fft, config.hop_length),
            mel_basis: mel_filterbank(config.sample_rate, config.n_fft, config.n_mels),
            dct: dct_matrix(config.n_mfcc, config.n_mels),
        }
    }

    pub fn n_mfcc(&self) -> usize {
        self.n_mfcc
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Compute the MFCC sequence of a mono waveform.
    ///
    /// Audio at another rate is resampled to the configured rate first.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<Array2<f64>, UnitError> {
        if samples.is_empty() {
            return Err(UnitError::Extraction("waveform is empty".to_string()));
        }
        if sample_rate == 0 {
            return Err(UnitError::Extraction("sample rate is zero".to_string()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(UnitError::Extraction(
                "waveform contains non-finite samples".to_string(),
            ));
        }

        let signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let signal = if sample_rate != self.sample_rate {
            resample(&signal, sample_rate, self.sample_rate)
        } else {
            signal
        };

        let spectrum = self.stft.forward(&signal);
        let power = spectrum.mapv(|c| c.norm_sqr());
        let mel = power.dot(&self.mel_basis.t());
        let log_mel = power_to_db(&mel);
        Ok(log_mel.dot(&self.dct.t()))
    }

    /// Time-mean of [`extract`](Self::extract): one descriptor per recording.
    pub fn extract_average(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Array1<f64>, UnitError> {
        let features = self.extract(samples, sample_rate)?;
        average(&features)
    }

    /// The cepstral frame of digital silence.
    pub fn silence_frame(&self) -> Array1<f64> {
        let log_mel = Array1::from_elem(self.dct.ncols(), SILENCE_DB);
        self.dct.dot(&log_mel)
    }
}

/// Mean over frames of a feature sequence.
pub fn average(features: &Array2<f64>) -> Result<Array1<f64>, UnitError> {
    features
        .mean_axis(Axis(0))
        .ok_or_else(|| UnitError::Extraction("feature sequence has no frames".to_string()))
}

/// `10 * log10(power)`, floored at `TOP_DB` below the global maximum.
fn power_to_db(power: &Array2<f64>) -> Array2<f64> {
    let db = power.mapv(|p| 10.0 * p.max(AMIN).log10());
    let peak = db.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let floor = peak - TOP_DB;
    db.mapv(|v| v.max(floor))
}

/// Linear-interpolation resampler.
pub fn resample(signal: &[f64], from: u32, to: u32) -> Vec<f64> {
    if from == to || signal.is_empty() {
        return signal.to_vec();
    }
    let out_len = ((signal.len() as u64 * to as u64) as f64 / from as f64).round() as usize;
    let step = from as f64 / to as f64;
    let last = signal.len() - 1;
    (0..out_len.max(1))
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = pos - idx as f64;
            let next = (idx + 1).min(last);
            signal[idx] * (1.0 - frac) + signal[next] * frac
        })
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-style, area-normalised triangular mel filters.
///
/// Shape is `(n_mels, n_fft / 2 + 1)`. Bands between 0 Hz and Nyquist.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let n_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut weights = Array2::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (lo, center, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (hi - lo);
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - lo) / (center - lo);
            let upper = (hi - f) / (hi - center);
            weights[[m, k]] = lower.min(upper).max(0.0) * enorm;
        }
    }
    weights
}

/// Orthonormal DCT-II basis, shape `(n_out, n_in)`.
pub fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f64> {
    let n = n_in as f64;
    Array2::from_shape_fn((n_out, n_in), |(k, i)| {
        let scale = if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        };
        scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos()
    })
}

/// Centred short-time Fourier transform with a periodic Hann window.
pub(crate) struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f64>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl Stft {
    pub(crate) fn new(n_fft: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        let window = (0..n_fft)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n_fft as f64).cos())
            .collect();
        Self {
            n_fft,
            hop,
            window,
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub(crate) fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub(crate) fn hop(&self) -> usize {
        self.hop
    }

    /// Spectrum of every frame, shape `(frames, n_fft / 2 + 1)`.
    pub(crate) fn forward(&self, signal: &[f64]) -> Array2<Complex64> {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0; signal.len() + 2 * pad];
        padded[pad..pad + signal.len()].copy_from_slice(signal);

        let n_frames = 1 + (padded.len() - self.n_fft) / self.hop;
        let mut out = Array2::zeros((n_frames, self.n_bins()));
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.n_fft];

        for t in 0..n_frames {
            let start = t * self.hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex64::new(padded[start + i] * self.window[i], 0.0);
            }
            self.forward.process(&mut buffer);
            for (k, value) in out.row_mut(t).iter_mut().enumerate() {
                *value = buffer[k];
            }
        }
        out
    }

    /// Weighted overlap-add inverse of [`forward`](Self::forward).
    ///
    /// Returns `hop * (frames - 1)` samples, the length of the signal that
    /// produced `frames` centred frames.
    pub(crate) fn inverse(&self, spectrum: &Array2<Complex64>) -> Vec<f64> {
        let n_frames = spectrum.nrows();
        if n_frames == 0 {
            return Vec::new();
        }
        let full_len = self.n_fft + self.hop * (n_frames - 1);
        let mut signal = vec![0.0; full_len];
        let mut norm = vec![0.0; full_len];
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.n_fft];
        let half = self.n_fft / 2;
        let scale = 1.0 / self.n_fft as f64;

        for (t, row) in spectrum.axis_iter(Axis(0)).enumerate() {
            for k in 0..=half {
                buffer[k] = row[k];
            }
            buffer[0].im = 0.0;
            buffer[half].im = 0.0;
            for k in half + 1..self.n_fft {
                buffer[k] = buffer[self.n_fft - k].conj();
            }
            self.inverse.process(&mut buffer);

            let start = t * self.hop;
            for i in 0..self.n_fft {
                let w = self.window[i];
                signal[start + i] += buffer[i].re * scale * w;
                norm[start + i] += w * w;
            }
        }

        let length = self.hop * (n_frames - 1);
        (half..half + length)
            .map(|i| {
                if norm[i] > f64::MIN_POSITIVE {
                    signal[i] / norm[i]
                } else {
                    signal[i]
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> UnitConfig {
        UnitConfig {
            n_fft: 512,
            hop_length: 128,
            n_mels: 40,
            ..UnitConfig::default()
        }
    }

    fn tone(freq: f64, len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (0.5 * (2.0 * PI * freq * i as f64 / rate as f64).sin()) as f32)
            .collect()
    }

    #[test]
    fn frame_count_follows_hop() {
        let config = small_config();
        let extractor = FeatureExtractor::new(&config);
        let features = extractor.extract(&tone(440.0, 4000, 16000), 16000).unwrap();
        assert_eq!(features.nrows(), 1 + 4000 / 128);
        assert_eq!(features.ncols(), 13);
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FeatureExtractor::new(&small_config());
        let wave = tone(300.0, 3000, 16000);
        let a = extractor.extract(&wave, 16000).unwrap();
        let b = extractor.extract(&wave, 16000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_tones_give_different_averages() {
        let extractor = FeatureExtractor::new(&small_config());
        let low = extractor.extract_average(&tone(200.0, 4000, 16000), 16000).unwrap();
        let high = extractor.extract_average(&tone(3000.0, 4000, 16000), 16000).unwrap();
        let dist: f64 = (&low - &high).mapv(|d| d * d).sum().sqrt();
        assert!(dist > 1.0, "distance {dist}");
    }

    #[test]
    fn empty_waveform_is_an_extraction_error() {
        let extractor = FeatureExtractor::new(&small_config());
        assert!(matches!(
            extractor.extract(&[], 16000),
            Err(UnitError::Extraction(_))
        ));
        assert!(matches!(
            extractor.extract(&[0.0, f32::NAN], 16000),
            Err(UnitError::Extraction(_))
        ));
    }

    #[test]
    fn other_rates_are_resampled() {
        let extractor = FeatureExtractor::new(&small_config());
        let features = extractor.extract(&tone(440.0, 4000, 8000), 8000).unwrap();
        assert_eq!(features.nrows(), 1 + 8000 / 128);
    }

    #[test]
    fn mel_filters_are_non_negative_and_cover_spectrum() {
        let basis = mel_filterbank(16000, 512, 40);
        assert_eq!(basis.dim(), (40, 257));
        assert!(basis.iter().all(|&w| w >= 0.0));
        assert!(basis.row(20).sum() > 0.0);
    }

    #[test]
    fn dct_basis_is_orthonormal() {
        let dct = dct_matrix(8, 8);
        let gram = dct.dot(&dct.t());
        for i in 0..8 {
            for j in 0..8 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn stft_inverse_reconstructs_signal() {
        let stft = Stft::new(256, 64);
        let signal: Vec<f64> = (0..2048).map(|i| (i as f64 * 0.05).sin()).collect();
        let spectrum = stft.forward(&signal);
        let rebuilt = stft.inverse(&spectrum);
        assert_eq!(rebuilt.len(), 64 * (spectrum.nrows() - 1));
        for i in 0..rebuilt.len().min(signal.len()) {
            assert!((rebuilt[i] - signal[i]).abs() < 1e-6, "sample {i}");
        }
    }

    #[test]
    fn silence_frame_only_carries_energy_in_c0() {
        let extractor = FeatureExtractor::new(&small_config());
        let frame = extractor.silence_frame();
        assert!(frame[0] < 0.0);
        assert!(frame.iter().skip(1).all(|c| c.abs() < 1e-9));
    }
}
