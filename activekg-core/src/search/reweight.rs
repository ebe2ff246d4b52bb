//! Recency and drift decay reweighting.

use chrono::{DateTime, Utc};

/// Decay parameters for optional per-request reweighting.
#[derive(Debug, Clone, Copy)]
pub struct DecayParams {
    /// Recency decay rate per day
    pub lambda: f32,
    /// Drift decay rate
    pub beta: f32,
}

/// Multiply a base score by `exp(-λ·age_days) · exp(-β·drift)`.
///
/// Used only for ranking; callers must never prune on the reweighted value.
/// Missing timestamps contribute no recency penalty; missing drift scores
/// contribute no drift penalty.
#[must_use]
pub fn apply_decay(
    base: f32,
    updated_at: Option<DateTime<Utc>>,
    drift_score: Option<f64>,
    params: DecayParams,
    now: DateTime<Utc>,
) -> f32 {
    let age_factor = updated_at.map_or(1.0, |ts| {
        let age_days = (now - ts).num_seconds().max(0) as f32 / 86_400.0;
        (-params.lambda * age_days).exp()
    });
    let drift_factor = drift_score.map_or(1.0, |d| (-params.beta * d as f32).exp());
    base * age_factor * drift_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const PARAMS: DecayParams = DecayParams {
        lambda: 0.01,
        beta: 0.5,
    };

    #[test]
    fn fresh_zero_drift_keeps_base_score() {
        let now = Utc::now();
        let score = apply_decay(0.8, Some(now), Some(0.0), PARAMS, now);
        assert!((score - 0.8).abs() < 1e-5);
    }

    #[test]
    fn older_nodes_score_lower() {
        let now = Utc::now();
        let fresh = apply_decay(0.8, Some(now), None, PARAMS, now);
        let stale = apply_decay(0.8, Some(now - Duration::days(100)), None, PARAMS, now);
        assert!(stale < fresh);
    }

    #[test]
    fn drifted_nodes_score_lower() {
        let now = Utc::now();
        let stable = apply_decay(0.8, None, Some(0.0), PARAMS, now);
        let drifted = apply_decay(0.8, None, Some(1.0), PARAMS, now);
        assert!(drifted < stable);
    }

    #[test]
    fn missing_signals_apply_no_penalty() {
        let now = Utc::now();
        assert_eq!(apply_decay(0.5, None, None, PARAMS, now), 0.5);
    }
}
