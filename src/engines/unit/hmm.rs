use std::f64::consts::PI;

use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::config::UnitConfig;
use super::model::UnitError;

/// Lloyd iterations used to place the initial state means.
const KMEANS_ITERATIONS: usize = 100;

/// Occupancy below which a state keeps its previous emission parameters.
const MIN_OCCUPANCY: f64 = 1e-10;

/// Settings for fitting an [`AcousticModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmmParams {
    pub n_states: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub min_covar: f64,
}

impl From<&UnitConfig> for HmmParams {
    fn from(config: &UnitConfig) -> Self {
        Self {
            n_states: config.n_states,
            max_iterations: config.em_iterations,
            tolerance: config.em_tolerance,
            min_covar: config.min_covar,
        }
    }
}

/// A hidden Markov model with diagonal-covariance Gaussian emissions,
/// trained on the MFCC sequences of one word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcousticModel {
    pub word: String,
    /// Initial state distribution, length `n_states`.
    pub start_prob: Array1<f64>,
    /// Row-stochastic transition matrix, `(n_states, n_states)`.
    pub transitions: Array2<f64>,
    /// Emission means, `(n_states, dim)`.
    pub means: Array2<f64>,
    /// Emission variances, `(n_states, dim)`.
    pub variances: Array2<f64>,
    /// Training log-likelihood evaluated before each EM update.
    pub log_likelihood_history: Vec<f64>,
}

#[derive(Debug)]
struct SufficientStats {
    start: Array1<f64>,
    transitions: Array2<f64>,
    occupancy: Array1<f64>,
    sum_x: Array2<f64>,
    sum_x2: Array2<f64>,
    log_likelihood: f64,
}

impl AcousticModel {
    /// Fit a model with Baum-Welch on the concatenation of `sequences`.
    ///
    /// Means start from k-means centroids drawn with `rng`, so two fits of the
    /// same data only agree when `rng` is seeded identically. EM stops after
    /// `max_iterations` or once the likelihood gain drops below `tolerance`.
    pub fn fit<R: Rng + ?Sized>(
        word: &str,
        sequences: &[ArrayView2<f64>],
        params: &HmmParams,
        rng: &mut R,
    ) -> Result<Self, UnitError> {
        let sequences: Vec<ArrayView2<f64>> = sequences
            .iter()
            .filter(|seq| seq.nrows() > 0)
            .cloned()
            .collect();
        if sequences.is_empty() {
            return Err(UnitError::NoTrainingData(word.to_string()));
        }
        let dim = sequences[0].ncols();
        if let Some(bad) = sequences.iter().find(|seq| seq.ncols() != dim) {
            return Err(UnitError::Dimension {
                expected: dim,
                found: bad.ncols(),
            });
        }

        let lengths: Vec<usize> = sequences.iter().map(|seq| seq.nrows()).collect();
        let frames = concatenate(Axis(0), &sequences)?;
        let n = params.n_states;

        let mut global_var = frames.var_axis(Axis(0), 0.0);
        global_var.mapv_inplace(|v| v.max(params.min_covar));

        let mut model = Self {
            word: word.to_string(),
            start_prob: Array1::from_elem(n, 1.0 / n as f64),
            transitions: Array2::from_elem((n, n), 1.0 / n as f64),
            means: kmeans(&frames, n, rng),
            variances: Array2::from_shape_fn((n, dim), |(_, j)| global_var[j]),
            log_likelihood_history: Vec::new(),
        };

        for iteration in 0..params.max_iterations {
            let stats = model.expectation(&frames, &lengths)?;
            model.maximization(&stats, params.min_covar);

            let previous = model.log_likelihood_history.last().copied();
            model.log_likelihood_history.push(stats.log_likelihood);
            if let Some(previous) = previous {
                if stats.log_likelihood - previous < params.tolerance {
                    log::debug!("EM for '{word}' converged after {} iterations", iteration + 1);
                    break;
                }
            }
        }

        log::info!(
            "Trained {n}-state model for '{word}' on {} sequences ({} frames), log-likelihood {:.2}",
            lengths.len(),
            frames.nrows(),
            model.log_likelihood_history.last().copied().unwrap_or(f64::NAN)
        );
        Ok(model)
    }

    pub fn n_states(&self) -> usize {
        self.start_prob.len()
    }

    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    /// Log-likelihood of one feature sequence under the model.
    pub fn log_likelihood(&self, sequence: ArrayView2<f64>) -> Result<f64, UnitError> {
        if sequence.ncols() != self.dim() {
            return Err(UnitError::Dimension {
                expected: self.dim(),
                found: sequence.ncols(),
            });
        }
        if sequence.nrows() == 0 {
            return Ok(0.0);
        }
        let log_b = self.emission_log_probs(sequence);
        let alpha = self.forward(&log_b);
        Ok(log_sum_exp(alpha.row(alpha.nrows() - 1).as_slice().unwrap_or(&[])))
    }

    /// Draw `n_frames` feature vectors by walking the state chain.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n_frames: usize,
        rng: &mut R,
    ) -> Result<Array2<f64>, UnitError> {
        let invalid = |e: WeightedError| {
            UnitError::Training(format!("invalid probabilities in '{}': {e}", self.word))
        };
        let start = WeightedIndex::new(self.start_prob.iter()).map_err(invalid)?;
        let rows = self
            .transitions
            .axis_iter(Axis(0))
            .map(|row| WeightedIndex::new(row.iter()).map_err(invalid))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Array2::zeros((n_frames, self.dim()));
        let mut state = start.sample(rng);
        for t in 0..n_frames {
            for j in 0..self.dim() {
                let z: f64 = StandardNormal.sample(rng);
                out[[t, j]] = self.means[[state, j]] + self.variances[[state, j]].sqrt() * z;
            }
            state = rows[state].sample(rng);
        }
        Ok(out)
    }

    /// Per-frame, per-state Gaussian log densities, `(frames, n_states)`.
    fn emission_log_probs(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let n = self.n_states();
        let dim = self.dim() as f64;
        let norms: Vec<f64> = (0..n)
            .map(|k| -0.5 * (dim * (2.0 * PI).ln() + self.variances.row(k).mapv(f64::ln).sum()))
            .collect();

        Array2::from_shape_fn((x.nrows(), n), |(t, k)| {
            let mahalanobis: f64 = x
                .row(t)
                .iter()
                .zip(self.means.row(k))
                .zip(self.variances.row(k))
                .map(|((v, m), var)| (v - m) * (v - m) / var)
                .sum();
            norms[k] - 0.5 * mahalanobis
        })
    }

    fn forward(&self, log_b: &Array2<f64>) -> Array2<f64> {
        let (frames, n) = log_b.dim();
        let log_start = self.start_prob.mapv(f64::ln);
        let log_trans = self.transitions.mapv(f64::ln);
        let mut alpha = Array2::zeros((frames, n));
        let mut scratch = vec![0.0; n];

        for j in 0..n {
            alpha[[0, j]] = log_start[j] + log_b[[0, j]];
        }
        for t in 1..frames {
            for j in 0..n {
                for (i, slot) in scratch.iter_mut().enumerate() {
                    *slot = alpha[[t - 1, i]] + log_trans[[i, j]];
                }
                alpha[[t, j]] = log_sum_exp(&scratch) + log_b[[t, j]];
            }
        }
        alpha
    }

    fn backward(&self, log_b: &Array2<f64>) -> Array2<f64> {
        let (frames, n) = log_b.dim();
        let log_trans = self.transitions.mapv(f64::ln);
        let mut beta = Array2::zeros((frames, n));
        let mut scratch = vec![0.0; n];

        for t in (0..frames.saturating_sub(1)).rev() {
            for i in 0..n {
                for (j, slot) in scratch.iter_mut().enumerate() {
                    *slot = log_trans[[i, j]] + log_b[[t + 1, j]] + beta[[t + 1, j]];
                }
                beta[[t, i]] = log_sum_exp(&scratch);
            }
        }
        beta
    }

    fn expectation(
        &self,
        frames: &Array2<f64>,
        lengths: &[usize],
    ) -> Result<SufficientStats, UnitError> {
        let (n, dim) = self.means.dim();
        let log_trans = self.transitions.mapv(f64::ln);
        let mut stats = SufficientStats {
            start: Array1::zeros(n),
            transitions: Array2::zeros((n, n)),
            occupancy: Array1::zeros(n),
            sum_x: Array2::zeros((n, dim)),
            sum_x2: Array2::zeros((n, dim)),
            log_likelihood: 0.0,
        };

        let mut offset = 0;
        for &len in lengths {
            let x = frames.slice(s![offset..offset + len, ..]);
            offset += len;

            let log_b = self.emission_log_probs(x);
            let alpha = self.forward(&log_b);
            let beta = self.backward(&log_b);
            let ll = log_sum_exp(alpha.row(len - 1).as_slice().unwrap_or(&[]));
            if !ll.is_finite() {
                return Err(UnitError::Training(format!(
                    "log-likelihood of '{}' is not finite",
                    self.word
                )));
            }
            stats.log_likelihood += ll;

            let gamma = (&alpha + &beta - ll).mapv(f64::exp);
            for t in 0..len - 1 {
                for i in 0..n {
                    for j in 0..n {
                        stats.transitions[[i, j]] += (alpha[[t, i]]
                            + log_trans[[i, j]]
                            + log_b[[t + 1, j]]
                            + beta[[t + 1, j]]
                            - ll)
                            .exp();
                    }
                }
            }

            stats.start += &gamma.row(0);
            stats.occupancy += &gamma.sum_axis(Axis(0));
            stats.sum_x += &gamma.t().dot(&x);
            stats.sum_x2 += &gamma.t().dot(&x.mapv(|v| v * v));
        }
        Ok(stats)
    }

    fn maximization(&mut self, stats: &SufficientStats, min_covar: f64) {
        let total = stats.start.sum();
        if total > 0.0 {
            self.start_prob = &stats.start / total;
        }

        for (i, row) in stats.transitions.axis_iter(Axis(0)).enumerate() {
            let row_sum = row.sum();
            if row_sum > 0.0 {
                self.transitions.row_mut(i).assign(&(&row / row_sum));
            }
        }

        for k in 0..self.n_states() {
            let occ = stats.occupancy[k];
            if occ < MIN_OCCUPANCY {
                continue;
            }
            let mean = &stats.sum_x.row(k) / occ;
            let var = (&stats.sum_x2.row(k) / occ - &mean * &mean).mapv(|v| v.max(min_covar));
            self.means.row_mut(k).assign(&mean);
            self.variances.row_mut(k).assign(&var);
        }
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// k-means++ seeding followed by Lloyd iterations; returns `(k, dim)` centroids.
fn kmeans<R: Rng + ?Sized>(points: &Array2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let (n_points, dim) = points.dim();
    let sq_dist = |a: ndarray::ArrayView1<f64>, b: ndarray::ArrayView1<f64>| -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    };

    let mut centers = Array2::zeros((k, dim));
    centers.row_mut(0).assign(&points.row(rng.gen_range(0..n_points)));
    for c in 1..k {
        let weights: Vec<f64> = points
            .axis_iter(Axis(0))
            .map(|p| {
                (0..c)
                    .map(|j| sq_dist(p, centers.row(j)))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let pick = match WeightedIndex::new(&weights) {
            Ok(dist) => dist.sample(rng),
            // every point already coincides with a center
            Err(_) => rng.gen_range(0..n_points),
        };
        centers.row_mut(c).assign(&points.row(pick));
    }

    let mut assignment = vec![usize::MAX; n_points];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.axis_iter(Axis(0)).enumerate() {
            let nearest = (0..k)
                .map(|j| (j, sq_dist(p, centers.row(j))))
                .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
                .0;
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = Array2::<f64>::zeros((k, dim));
        let mut counts = vec![0usize; k];
        for (i, p) in points.axis_iter(Axis(0)).enumerate() {
            sums.row_mut(assignment[i]).scaled_add(1.0, &p);
            counts[assignment[i]] += 1;
        }
        for j in 0..k {
            if counts[j] > 0 {
                centers.row_mut(j).assign(&(&sums.row(j) / counts[j] as f64));
            }
        }
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(n_states: usize) -> HmmParams {
        HmmParams {
            n_states,
            max_iterations: 50,
            tolerance: 1e-4,
            min_covar: 1e-3,
        }
    }

    /// Sequences that sit near 0.0 for their first half and near 5.0 after.
    fn two_phase_sequences(rng: &mut StdRng) -> Vec<Array2<f64>> {
        (0..4)
            .map(|_| {
                Array2::from_shape_fn((40, 3), |(t, _)| {
                    let level = if t < 20 { 0.0 } else { 5.0 };
                    let z: f64 = StandardNormal.sample(rng);
                    level + 0.3 * z
                })
            })
            .collect()
    }

    fn views(seqs: &[Array2<f64>]) -> Vec<ArrayView2<'_, f64>> {
        seqs.iter().map(|s| s.view()).collect()
    }

    #[test]
    fn recovers_two_well_separated_states() {
        let mut rng = StdRng::seed_from_u64(1);
        let seqs = two_phase_sequences(&mut rng);
        let model = AcousticModel::fit("aku", &views(&seqs), &params(2), &mut rng).unwrap();

        let mut firsts: Vec<f64> = model.means.column(0).to_vec();
        firsts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(firsts[0].abs() < 0.5, "means {firsts:?}");
        assert!((firsts[1] - 5.0).abs() < 0.5, "means {firsts:?}");

        for row in model.transitions.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(model.variances.iter().all(|&v| v >= 1e-3));
    }

    #[test]
    fn log_likelihood_never_decreases_across_iterations() {
        let mut rng = StdRng::seed_from_u64(2);
        let seqs = two_phase_sequences(&mut rng);
        let model = AcousticModel::fit("kamu", &views(&seqs), &params(3), &mut rng).unwrap();

        assert!(!model.log_likelihood_history.is_empty());
        for pair in model.log_likelihood_history.windows(2) {
            let slack = 1e-6 * pair[0].abs().max(1.0);
            assert!(pair[1] >= pair[0] - slack, "history {:?}", model.log_likelihood_history);
        }
    }

    #[test]
    fn seeded_fits_are_reproducible() {
        let mut data_rng = StdRng::seed_from_u64(3);
        let seqs = two_phase_sequences(&mut data_rng);

        let a = AcousticModel::fit("pagi", &views(&seqs), &params(3), &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = AcousticModel::fit("pagi", &views(&seqs), &params(3), &mut StdRng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            AcousticModel::fit("sore", &[], &params(2), &mut rng),
            Err(UnitError::NoTrainingData(w)) if w == "sore"
        ));
        assert!(matches!(
            AcousticModel::fit("sore", &[empty.view()], &params(2), &mut rng),
            Err(UnitError::NoTrainingData(_))
        ));
    }

    #[test]
    fn sampling_yields_requested_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let seqs = two_phase_sequences(&mut rng);
        let model = AcousticModel::fit("kita", &views(&seqs), &params(2), &mut rng).unwrap();

        let sampled = model.sample(30, &mut rng).unwrap();
        assert_eq!(sampled.dim(), (30, 3));
        assert!(sampled.iter().all(|v| v.is_finite()));
        // every frame is drawn near one of the two learned levels
        assert!(sampled.iter().all(|&v| v > -3.0 && v < 8.0));
    }

    #[test]
    fn trained_data_scores_higher_than_unrelated_data() {
        let mut rng = StdRng::seed_from_u64(6);
        let seqs = two_phase_sequences(&mut rng);
        let model = AcousticModel::fit("malam", &views(&seqs), &params(2), &mut rng).unwrap();

        let unrelated = Array2::from_elem((40, 3), -10.0);
        let own = model.log_likelihood(seqs[0].view()).unwrap();
        let other = model.log_likelihood(unrelated.view()).unwrap();
        assert!(own > other);

        let wrong_dim = Array2::<f64>::zeros((5, 4));
        assert!(matches!(
            model.log_likelihood(wrong_dim.view()),
            Err(UnitError::Dimension { expected: 3, found: 4 })
        ));
    }
}
