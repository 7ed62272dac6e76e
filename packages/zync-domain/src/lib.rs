pub mod records;
pub mod scoring;

pub use records::{DocumentMetadata, GhostBranch, IndexedDocument, MemoryNode, Sentiment};
pub use scoring::RankingWeights;

/// Whether `content` is long enough to be worth embedding.
pub fn is_indexable(content: &str, min_chars: usize) -> bool {
	content.trim().chars().count() >= min_chars
}
