//! Process-wide constants.

/// Reserved relation name for lineage edges (child points at its parent).
pub const DERIVED_FROM: &str = "DERIVED_FROM";

/// Class tag marking a parent document node.
pub const CLASS_DOCUMENT: &str = "Document";

/// Class tag marking a chunk node.
pub const CLASS_CHUNK: &str = "Chunk";

/// Class tag marking a soft-deleted node awaiting purge.
pub const CLASS_DELETED: &str = "Deleted";

/// Default embedding dimension when none is configured.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default trigger threshold when a trigger spec omits one.
pub const DEFAULT_TRIGGER_THRESHOLD: f32 = 0.85;

/// Reciprocal rank fusion constant.
pub const RRF_K: f32 = 60.0;

/// Default number of candidates handed to the reranker.
pub const RERANK_TOP_N: usize = 50;

/// Default soft-delete grace period in seconds (24 hours).
pub const DEFAULT_DELETION_GRACE_SECS: i64 = 86_400;

/// Maximum characters fed to the embedding backend per input.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8_000;

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1_200;

/// Default chunk overlap in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;
