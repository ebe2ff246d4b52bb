//! Score fusion, decay reweighting, and reranking for hybrid retrieval.

pub mod fusion;
pub mod rerank;
pub mod reweight;

pub use fusion::{rrf_fuse, weighted_fuse, FusedHit};
pub use rerank::{LexicalOverlapReranker, Reranker};
pub use reweight::{apply_decay, DecayParams};
