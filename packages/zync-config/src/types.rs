use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

pub const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 1_000;
pub const DEFAULT_INDEX_CAPACITY: usize = 500;
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 5;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_SIMILARITY_WEIGHT: f32 = 0.7;
pub const DEFAULT_RECENCY_WEIGHT: f32 = 0.3;
pub const DEFAULT_DECAY_PER_HOUR: f32 = 0.1;
pub const DEFAULT_DECAY_FLOOR: f32 = 0.1;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub index: Index,
	#[serde(default)]
	pub ranking: Ranking,
	#[serde(default)]
	pub provenance: Provenance,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	/// Directory holding one snapshot file per persisted collection.
	pub path: PathBuf,
	/// Quiet period after the last mutation before a snapshot is written.
	#[serde(default = "default_flush_debounce_ms")]
	pub flush_debounce_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Index {
	#[serde(default = "default_index_capacity")]
	pub capacity: usize,
	#[serde(default = "default_min_content_chars")]
	pub min_content_chars: usize,
	#[serde(default = "default_top_k")]
	pub default_top_k: usize,
}
impl Default for Index {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_INDEX_CAPACITY,
			min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
			default_top_k: DEFAULT_TOP_K,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Ranking {
	#[serde(default = "default_similarity_weight")]
	pub similarity_weight: f32,
	#[serde(default = "default_recency_weight")]
	pub recency_weight: f32,
	/// Share of the recency term lost per elapsed hour.
	#[serde(default = "default_decay_per_hour")]
	pub decay_per_hour: f32,
	#[serde(default = "default_decay_floor")]
	pub decay_floor: f32,
}
impl Default for Ranking {
	fn default() -> Self {
		Self {
			similarity_weight: DEFAULT_SIMILARITY_WEIGHT,
			recency_weight: DEFAULT_RECENCY_WEIGHT,
			decay_per_hour: DEFAULT_DECAY_PER_HOUR,
			decay_floor: DEFAULT_DECAY_FLOOR,
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Provenance {
	#[serde(default)]
	pub reference_policy: ReferencePolicy,
}

/// How the provenance tree treats a parent or anchor id that does not resolve.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
	/// Reject the write with a not-found error.
	#[default]
	Strict,
	/// Store the record anyway, as a root node or an unanchored ghost branch.
	Tolerant,
}

fn default_flush_debounce_ms() -> u64 {
	DEFAULT_FLUSH_DEBOUNCE_MS
}

fn default_index_capacity() -> usize {
	DEFAULT_INDEX_CAPACITY
}

fn default_min_content_chars() -> usize {
	DEFAULT_MIN_CONTENT_CHARS
}

fn default_top_k() -> usize {
	DEFAULT_TOP_K
}

fn default_similarity_weight() -> f32 {
	DEFAULT_SIMILARITY_WEIGHT
}

fn default_recency_weight() -> f32 {
	DEFAULT_RECENCY_WEIGHT
}

fn default_decay_per_hour() -> f32 {
	DEFAULT_DECAY_PER_HOUR
}

fn default_decay_floor() -> f32 {
	DEFAULT_DECAY_FLOOR
}
