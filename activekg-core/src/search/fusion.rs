//! Hybrid score fusion: reciprocal rank fusion and weighted combination.

use std::collections::HashMap;

use uuid::Uuid;

/// A fused hit with its combined score and per-retriever components.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: Uuid,
    /// Combined score in the scale of the fusion mode
    pub score: f32,
    /// Raw vector similarity, if the id appeared in the vector list
    pub vector_score: Option<f32>,
    /// Raw lexical score, if the id appeared in the lexical list
    pub lexical_score: Option<f32>,
}

/// Reciprocal rank fusion: `score(d) = Σ 1/(k + rank_i(d))` over the lists
/// the document appears in, ranks starting at 1.
///
/// The absolute scores of the input lists are ignored; only order matters.
/// Output is sorted by fused score descending, ties broken by id so results
/// are deterministic.
#[must_use]
pub fn rrf_fuse(vector: &[(Uuid, f32)], lexical: &[(Uuid, f32)], k: f32) -> Vec<FusedHit> {
    let mut hits: HashMap<Uuid, FusedHit> = HashMap::new();

    for (rank, (id, score)) in vector.iter().enumerate() {
        let entry = hits.entry(*id).or_insert_with(|| FusedHit {
            id: *id,
            score: 0.0,
            vector_score: None,
            lexical_score: None,
        });
        entry.score += 1.0 / (k + (rank as f32 + 1.0));
        entry.vector_score = Some(*score);
    }

    for (rank, (id, score)) in lexical.iter().enumerate() {
        let entry = hits.entry(*id).or_insert_with(|| FusedHit {
            id: *id,
            score: 0.0,
            vector_score: None,
            lexical_score: None,
        });
        entry.score += 1.0 / (k + (rank as f32 + 1.0));
        entry.lexical_score = Some(*score);
    }

    sorted(hits)
}

/// Weighted fusion: `α·norm(vector) + β·norm(lexical)` after min-max
/// normalizing each list to `[0, 1]`.
///
/// A document missing from one list contributes 0 for that side. Degenerate
/// lists (all scores equal) normalize to 1.0 so a single perfect hit is not
/// zeroed out.
#[must_use]
pub fn weighted_fuse(
    vector: &[(Uuid, f32)],
    lexical: &[(Uuid, f32)],
    alpha: f32,
    beta: f32,
) -> Vec<FusedHit> {
    let norm_vec = min_max_normalize(vector);
    let norm_lex = min_max_normalize(lexical);

    let mut hits: HashMap<Uuid, FusedHit> = HashMap::new();

    for (i, (id, raw)) in vector.iter().enumerate() {
        let entry = hits.entry(*id).or_insert_with(|| FusedHit {
            id: *id,
            score: 0.0,
            vector_score: None,
            lexical_score: None,
        });
        entry.score += alpha * norm_vec[i];
        entry.vector_score = Some(*raw);
    }

    for (i, (id, raw)) in lexical.iter().enumerate() {
        let entry = hits.entry(*id).or_insert_with(|| FusedHit {
            id: *id,
            score: 0.0,
            vector_score: None,
            lexical_score: None,
        });
        entry.score += beta * norm_lex[i];
        entry.lexical_score = Some(*raw);
    }

    sorted(hits)
}

fn min_max_normalize(list: &[(Uuid, f32)]) -> Vec<f32> {
    if list.is_empty() {
        return Vec::new();
    }
    let min = list.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = list
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    list.iter()
        .map(|(_, s)| {
            if range <= f32::EPSILON {
                1.0
            } else {
                (s - min) / range
            }
        })
        .collect()
}

fn sorted(hits: HashMap<Uuid, FusedHit>) -> Vec<FusedHit> {
    let mut out: Vec<FusedHit> = hits.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}
