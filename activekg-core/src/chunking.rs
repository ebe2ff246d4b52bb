//! Bounded-size text chunking with overlap.

use crate::config::ChunkingSettings;

/// One chunk of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the document
    pub index: usize,
    pub text: String,
}

/// Split text into chunks of at most `size` characters with `overlap`
/// characters repeated between consecutive chunks.
///
/// Break points prefer whitespace near the boundary so words are not split
/// mid-token. Empty or whitespace-only input yields no chunks. `overlap` is
/// clamped below `size` so the cursor always advances.
#[must_use]
pub fn chunk_text(text: &str, settings: &ChunkingSettings) -> Vec<Chunk> {
    let size = settings.size.max(1);
    let overlap = settings.overlap.min(size.saturating_sub(1));

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let end = if hard_end < chars.len() {
            // Scan back for whitespace within the last quarter of the window
            let floor = start + (size * 3 / 4);
            (floor..hard_end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .map_or(hard_end, |i| i + 1)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(Chunk {
                index,
                text: piece.to_string(),
            });
            index += 1;
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(size: usize, overlap: usize) -> ChunkingSettings {
        ChunkingSettings { size, overlap }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world", &settings(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &settings(100, 10)).is_empty());
        assert!(chunk_text("   \n\t ", &settings(100, 10)).is_empty());
    }

    #[test]
    fn long_text_is_split_with_overlap() {
        let text = "word ".repeat(200);
        let chunks = chunk_text(&text, &settings(100, 20));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 100);
        }
        // Overlap: the tail of chunk N reappears at the head of chunk N+1
        let tail: String = chunks[0].text.chars().rev().take(10).collect();
        let tail: String = tail.chars().rev().collect();
        assert!(chunks[1].text.contains(tail.trim()));
    }

    #[test]
    fn chunk_indexes_are_sequential() {
        let text = "lorem ipsum dolor sit amet ".repeat(50);
        let chunks = chunk_text(&text, &settings(80, 10));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn overlap_larger_than_size_still_advances() {
        let text = "abcdef ".repeat(30);
        let chunks = chunk_text(&text, &settings(10, 50));
        assert!(chunks.len() > 1);
        assert!(chunks.len() < 100);
    }
}
