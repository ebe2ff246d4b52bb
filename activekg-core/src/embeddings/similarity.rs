//! Vector similarity calculations.

/// Calculate cosine similarity between two vectors.
///
/// Returns a value in `[-1, 1]`; `0.0` when dimensions differ or either
/// vector has zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// L2-normalize a vector in place and return it.
///
/// Zero vectors pass through unchanged.
#[must_use]
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Drift between an old and a new embedding: `1 - cosine(old, new)`.
///
/// Zero when there was no prior embedding. The result is clamped to `[0, 2]`.
#[must_use]
pub fn drift_score(old: Option<&[f32]>, new: &[f32]) -> f64 {
    match old {
        Some(old) => {
            let drift = 1.0 - f64::from(cosine_similarity(old, new));
            drift.clamp(0.0, 2.0)
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_unit_similarity() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_zero_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_vector_passes_through_normalization() {
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn drift_is_zero_without_prior_embedding() {
        assert_eq!(drift_score(None, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn drift_of_identical_embeddings_is_zero() {
        let v = l2_normalize(vec![0.5, 0.5, 0.7]);
        assert!(drift_score(Some(&v), &v) < 1e-6);
    }

    #[test]
    fn drift_of_opposite_embeddings_is_two() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((drift_score(Some(&a), &b) - 2.0).abs() < 1e-6);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn vec_pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
        (1usize..48).prop_flat_map(|len| {
            (
                proptest::collection::vec(-100.0f32..100.0, len),
                proptest::collection::vec(-100.0f32..100.0, len),
            )
        })
    }

    proptest! {
        #[test]
        fn normalization_yields_unit_norm_or_zero(
            v in proptest::collection::vec(-100.0f32..100.0, 1..64)
        ) {
            let normalized = l2_normalize(v.clone());
            let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
            if v.iter().any(|x| *x != 0.0) {
                prop_assert!((norm - 1.0).abs() < 1e-3);
            } else {
                prop_assert_eq!(norm, 0.0);
            }
        }

        #[test]
        fn cosine_is_symmetric_and_bounded((a, b) in vec_pair()) {
            let ab = cosine_similarity(&a, &b);
            let ba = cosine_similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-5);
            prop_assert!((-1.0 - 1e-4..=1.0 + 1e-4).contains(&ab));
        }

        #[test]
        fn drift_stays_in_range((a, b) in vec_pair()) {
            let drift = drift_score(Some(&a), &b);
            prop_assert!((0.0..=2.0).contains(&drift));
        }
    }
}
