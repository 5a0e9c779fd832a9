use ndarray::Array1;

use super::catalog::Recording;
use super::model::UnitError;

/// Euclidean distance between two feature vectors of equal length.
pub fn euclidean(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Pick the recording whose average feature is closest to `target`.
///
/// Ties go to the candidate met first, so catalog order decides. A single
/// candidate is returned whatever its distance.
pub fn nearest<'a, I>(target: &Array1<f64>, candidates: I) -> Result<&'a Recording, UnitError>
where
    I: IntoIterator<Item = &'a Recording>,
{
    let mut best: Option<(&Recording, f64)> = None;
    for candidate in candidates {
        if candidate.average.len() != target.len() {
            return Err(UnitError::Dimension {
                expected: target.len(),
                found: candidate.average.len(),
            });
        }
        let distance = euclidean(target, &candidate.average);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }

    best.map(|(recording, distance)| {
        log::debug!(
            "Selected '{}' for '{}' at distance {distance:.3}",
            recording.file_name,
            recording.word
        );
        recording
    })
    .ok_or(UnitError::NoCandidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::unit::testing::recording_with_average;
    use ndarray::array;

    #[test]
    fn picks_minimum_distance() {
        let candidates = vec![
            recording_with_average("aku_0.wav", array![0.0, 0.0]),
            recording_with_average("aku_1.wav", array![3.0, 4.0]),
            recording_with_average("aku_2.wav", array![1.0, 1.0]),
        ];
        let chosen = nearest(&array![2.5, 3.0], &candidates).unwrap();
        assert_eq!(chosen.file_name, "aku_1.wav");

        let brute = candidates
            .iter()
            .min_by(|a, b| {
                euclidean(&array![2.5, 3.0], &a.average)
                    .partial_cmp(&euclidean(&array![2.5, 3.0], &b.average))
                    .unwrap()
            })
            .unwrap();
        assert_eq!(brute.file_name, chosen.file_name);
    }

    #[test]
    fn ties_go_to_first_candidate() {
        let candidates = vec![
            recording_with_average("aku_a.wav", array![1.0, 0.0]),
            recording_with_average("aku_b.wav", array![-1.0, 0.0]),
        ];
        let chosen = nearest(&array![0.0, 0.0], &candidates).unwrap();
        assert_eq!(chosen.file_name, "aku_a.wav");
    }

    #[test]
    fn singleton_is_returned_regardless_of_distance() {
        let candidates = vec![recording_with_average("kamu.wav", array![1e6, -1e6])];
        let chosen = nearest(&array![0.0, 0.0], &candidates).unwrap();
        assert_eq!(chosen.file_name, "kamu.wav");
    }

    #[test]
    fn empty_candidate_set_fails() {
        let none: Vec<Recording> = Vec::new();
        assert!(matches!(
            nearest(&array![0.0], &none),
            Err(UnitError::NoCandidate)
        ));
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let candidates = vec![recording_with_average("aku.wav", array![1.0, 2.0, 3.0])];
        assert!(matches!(
            nearest(&array![0.0, 0.0], &candidates),
            Err(UnitError::Dimension { expected: 2, found: 3 })
        ));
    }
}
