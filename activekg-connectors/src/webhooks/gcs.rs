//! GCS Pub/Sub push verification: shared-secret header compare.

/// Constant-time comparison of the `X-PubSub-Token` header against the
/// configured shared secret.
#[must_use]
pub fn verify_shared_secret(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    // Fold length difference into the accumulator instead of early return
    let mut diff = u8::from(expected.len() != provided.len());
    let max = expected.len().max(provided.len());
    for i in 0..max {
        let e = expected.get(i).copied().unwrap_or(0);
        let p = provided.get(i).copied().unwrap_or(0);
        diff |= e ^ p;
    }
    diff == 0
}
