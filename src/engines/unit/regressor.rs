use std::collections::BTreeMap;

use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::config::UnitConfig;
use super::model::UnitError;

/// Standard deviation below which a target dimension is left unscaled.
const MIN_SCALE: f64 = 1e-8;

/// Settings for [`WordRegressor::train`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressorParams {
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Log the loss every this many epochs; 0 disables logging.
    pub log_interval: usize,
}

impl From<&UnitConfig> for RegressorParams {
    fn from(config: &UnitConfig) -> Self {
        Self {
            embedding_dim: config.embedding_dim,
            hidden_dim: config.hidden_dim,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            log_interval: config.loss_log_interval,
        }
    }
}

/// Maps a word to the average MFCC vector of its recordings.
///
/// Architecture: a word embedding, a hidden ReLU layer and a linear output
/// layer. Targets are standardised per dimension during training and the
/// statistics are kept so [`predict`](Self::predict) returns raw cepstra.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordRegressor {
    /// Trained words; row `i` of `embedding` belongs to `words[i]`.
    words: Vec<String>,
    embedding: Array2<f64>,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
    target_mean: Array1<f64>,
    target_scale: Array1<f64>,
    /// Mean-squared error (standardised units) after every epoch.
    loss_history: Vec<f64>,
}

struct Gradients {
    embedding: Array2<f64>,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

/// First and second moment estimates of one parameter tensor.
struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }
}

struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    step: i32,
}

impl Adam {
    fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
        }
    }

    fn update<D: Dimension>(
        &self,
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
        moments: &mut Moments<D>,
    ) {
        let (b1, b2) = (self.beta1, self.beta2);
        let correction1 = 1.0 - b1.powi(self.step);
        let correction2 = 1.0 - b2.powi(self.step);
        let (lr, eps) = (self.learning_rate, self.eps);
        Zip::from(param)
            .and(grad)
            .and(&mut moments.m)
            .and(&mut moments.v)
            .for_each(|p, &g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

impl WordRegressor {
    /// Train on one target vector per word, full-batch, with Adam.
    pub fn train<R: Rng + ?Sized>(
        targets: &BTreeMap<String, Array1<f64>>,
        params: &RegressorParams,
        rng: &mut R,
    ) -> Result<Self, UnitError> {
        let dim = match targets.values().next() {
            Some(first) => first.len(),
            None => return Err(UnitError::NoTrainingData("word regressor".to_string())),
        };
        if let Some(bad) = targets.values().find(|t| t.len() != dim) {
            return Err(UnitError::Dimension {
                expected: dim,
                found: bad.len(),
            });
        }

        let words: Vec<String> = targets.keys().map(|w| w.to_lowercase()).collect();
        let rows: Vec<_> = targets.values().map(|t| t.view()).collect();
        let y = ndarray::stack(Axis(0), &rows)?;

        let target_mean = y
            .mean_axis(Axis(0))
            .ok_or_else(|| UnitError::NoTrainingData("word regressor".to_string()))?;
        let target_scale = y
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > MIN_SCALE { s } else { 1.0 });
        let y_norm = (&y - &target_mean) / &target_scale;

        let (e_dim, h_dim) = (params.embedding_dim, params.hidden_dim);
        let mut model = Self {
            words,
            embedding: Array2::from_shape_fn((targets.len(), e_dim), |_| {
                StandardNormal.sample(rng)
            }),
            w1: uniform_init((h_dim, e_dim), e_dim, rng),
            b1: uniform_init(h_dim, e_dim, rng),
            w2: uniform_init((dim, h_dim), h_dim, rng),
            b2: uniform_init(dim, h_dim, rng),
            target_mean,
            target_scale,
            loss_history: Vec::with_capacity(params.epochs),
        };

        let mut adam = Adam::new(params.learning_rate);
        let mut m_embedding = Moments::like(&model.embedding);
        let mut m_w1 = Moments::like(&model.w1);
        let mut m_b1 = Moments::like(&model.b1);
        let mut m_w2 = Moments::like(&model.w2);
        let mut m_b2 = Moments::like(&model.b2);

        for epoch in 0..params.epochs {
            let (loss, grads) = model.loss_and_gradients(&y_norm);
            if params.log_interval > 0 && epoch % params.log_interval == 0 {
                log::info!("Epoch {epoch}: loss = {loss:.4}");
            }
            model.loss_history.push(loss);

            adam.step += 1;
            adam.update(&mut model.embedding, &grads.embedding, &mut m_embedding);
            adam.update(&mut model.w1, &grads.w1, &mut m_w1);
            adam.update(&mut model.b1, &grads.b1, &mut m_b1);
            adam.update(&mut model.w2, &grads.w2, &mut m_w2);
            adam.update(&mut model.b2, &grads.b2, &mut m_b2);
        }

        Ok(model)
    }

    /// Predicted average feature vector for `word`.
    pub fn predict(&self, word: &str) -> Result<Array1<f64>, UnitError> {
        let needle = word.to_lowercase();
        let index = self
            .words
            .iter()
            .position(|w| *w == needle)
            .ok_or_else(|| UnitError::UnknownWord(word.to_string()))?;

        let hidden = (self.w1.dot(&self.embedding.row(index)) + &self.b1).mapv(|v| v.max(0.0));
        let out = self.w2.dot(&hidden) + &self.b2;
        Ok(out * &self.target_scale + &self.target_mean)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn dim(&self) -> usize {
        self.b2.len()
    }

    pub fn loss_history(&self) -> &[f64] {
        &self.loss_history
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }

    /// Full-batch MSE over all words and its gradients.
    ///
    /// Row `i` of the batch is word `i`, so the batch input is the embedding
    /// table itself.
    fn loss_and_gradients(&self, y: &Array2<f64>) -> (f64, Gradients) {
        let x = &self.embedding;
        let pre = x.dot(&self.w1.t()) + &self.b1;
        let act = pre.mapv(|v| v.max(0.0));
        let out = act.dot(&self.w2.t()) + &self.b2;

        let diff = &out - y;
        let count = diff.len() as f64;
        let loss = diff.mapv(|d| d * d).sum() / count;

        let d_out = diff * (2.0 / count);
        let w2 = d_out.t().dot(&act);
        let b2 = d_out.sum_axis(Axis(0));
        let mut d_pre = d_out.dot(&self.w2);
        Zip::from(&mut d_pre).and(&pre).for_each(|g, &p| {
            if p <= 0.0 {
                *g = 0.0;
            }
        });
        let w1 = d_pre.t().dot(x);
        let b1 = d_pre.sum_axis(Axis(0));
        let embedding = d_pre.dot(&self.w1);

        (
            loss,
            Gradients {
                embedding,
                w1,
                b1,
                w2,
                b2,
            },
        )
    }
}

/// `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`, the usual dense-layer init.
fn uniform_init<Sh, D, R>(shape: Sh, fan_in: usize, rng: &mut R) -> Array<f64, D>
where
    Sh: ndarray::ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    let bound = 1.0 / (fan_in as f64).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    Array::from_shape_simple_fn(shape, || dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> RegressorParams {
        RegressorParams {
            embedding_dim: 8,
            hidden_dim: 16,
            epochs: 300,
            learning_rate: 0.01,
            log_interval: 50,
        }
    }

    fn targets() -> BTreeMap<String, Array1<f64>> {
        BTreeMap::from([
            ("aku".to_string(), array![-420.0, 60.0, -5.0]),
            ("kamu".to_string(), array![-380.0, 20.0, 10.0]),
            ("makan".to_string(), array![-300.0, 45.0, 2.0]),
        ])
    }

    fn distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        (a - b).mapv(|d| d * d).sum().sqrt()
    }

    #[test]
    fn predictions_land_closest_to_their_own_target() {
        let targets = targets();
        let mut rng = StdRng::seed_from_u64(21);
        let model = WordRegressor::train(&targets, &params(), &mut rng).unwrap();

        for (word, target) in &targets {
            let predicted = model.predict(word).unwrap();
            assert_eq!(predicted.len(), 3);
            let own = distance(&predicted, target);
            for (other, other_target) in &targets {
                if other != word {
                    assert!(own < distance(&predicted, other_target), "{word} vs {other}");
                }
            }
        }
    }

    #[test]
    fn loss_goes_down() {
        let mut rng = StdRng::seed_from_u64(22);
        let model = WordRegressor::train(&targets(), &params(), &mut rng).unwrap();

        let history = model.loss_history();
        assert_eq!(history.len(), 300);
        assert!(model.final_loss().unwrap() < history[0] * 0.1);
    }

    #[test]
    fn untrained_word_is_unknown() {
        let mut rng = StdRng::seed_from_u64(23);
        let model = WordRegressor::train(&targets(), &params(), &mut rng).unwrap();

        assert!(matches!(
            model.predict("mereka"),
            Err(UnitError::UnknownWord(w)) if w == "mereka"
        ));
        assert!(model.predict("AKU").is_ok());
    }

    #[test]
    fn single_word_predicts_its_target() {
        let one = BTreeMap::from([("pagi".to_string(), array![-250.0, 12.0])]);
        let mut rng = StdRng::seed_from_u64(24);
        let model = WordRegressor::train(&one, &params(), &mut rng).unwrap();

        let predicted = model.predict("pagi").unwrap();
        assert!(distance(&predicted, &one["pagi"]) < 1.0, "{predicted}");
    }

    #[test]
    fn requires_training_data() {
        let mut rng = StdRng::seed_from_u64(25);
        assert!(matches!(
            WordRegressor::train(&BTreeMap::new(), &params(), &mut rng),
            Err(UnitError::NoTrainingData(_))
        ));
    }
}
