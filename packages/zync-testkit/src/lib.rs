mod error;

pub use error::{Error, Result};

use std::{
	collections::HashMap,
	env,
	future::Future,
	path::{Path, PathBuf},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use color_eyre::eyre;
use uuid::Uuid;

use zync_config::{
	Config, EmbeddingProviderConfig, Index, Provenance, Providers, Ranking, ReferencePolicy,
	Service, Storage,
};
use zync_service::{BoxFuture, EmbeddingProvider};

pub const TEST_DIMENSIONS: u32 = 8;

/// Config wired for tests: short debounce, small vectors, strict references.
pub fn test_config(storage_path: &Path) -> Config {
	Config {
		service: Service { log_level: "debug".to_string() },
		storage: Storage { path: storage_path.to_path_buf(), flush_debounce_ms: 20 },
		providers: Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "fake".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: "test-key".to_string(),
				path: "/embeddings".to_string(),
				model: "fake-embedding".to_string(),
				dimensions: TEST_DIMENSIONS,
				timeout_ms: 500,
				default_headers: serde_json::Map::new(),
			},
		},
		index: Index::default(),
		ranking: Ranking::default(),
		provenance: Provenance { reference_policy: ReferencePolicy::Strict },
	}
}

#[derive(Clone, Copy, Debug)]
enum Mode {
	Hashed,
	Failing,
	Empty,
	Slow(Duration),
}

/// Deterministic embedding provider.
///
/// Texts registered with [`FakeEmbedding::with_vector`] map to that exact vector. Any other text is
/// hashed word by word into `dimensions` buckets, so texts sharing words land close together.
pub struct FakeEmbedding {
	dimensions: usize,
	mode: Mode,
	fixed: HashMap<String, Vec<f32>>,
	calls: Arc<AtomicUsize>,
}
impl FakeEmbedding {
	pub fn new(dimensions: u32) -> Self {
		Self::with_mode(dimensions, Mode::Hashed)
	}

	/// Every call fails with a provider error.
	pub fn failing(dimensions: u32) -> Self {
		Self::with_mode(dimensions, Mode::Failing)
	}

	/// Every call succeeds with an empty vector.
	pub fn empty(dimensions: u32) -> Self {
		Self::with_mode(dimensions, Mode::Empty)
	}

	/// Every call sleeps for `delay` before answering.
	pub fn slow(dimensions: u32, delay: Duration) -> Self {
		Self::with_mode(dimensions, Mode::Slow(delay))
	}

	pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
		self.fixed.insert(text.to_string(), vector);

		self
	}

	pub fn call_counter(&self) -> Arc<AtomicUsize> {
		self.calls.clone()
	}

	fn with_mode(dimensions: u32, mode: Mode) -> Self {
		Self {
			dimensions: dimensions as usize,
			mode,
			fixed: HashMap::new(),
			calls: Arc::new(AtomicUsize::new(0)),
		}
	}

	fn vector_for(&self, text: &str) -> Vec<f32> {
		if let Some(vector) = self.fixed.get(text) {
			return vector.clone();
		}

		hashed_vector(text, self.dimensions)
	}
}
impl EmbeddingProvider for FakeEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			match self.mode {
				Mode::Failing => Err(eyre::eyre!("Fake embedding provider is unavailable.")),
				Mode::Empty => Ok(texts.iter().map(|_| Vec::new()).collect()),
				Mode::Slow(delay) => {
					tokio::time::sleep(delay).await;

					Ok(texts.iter().map(|text| self.vector_for(text)).collect())
				},
				Mode::Hashed => Ok(texts.iter().map(|text| self.vector_for(text)).collect()),
			}
		})
	}
}

/// Bag-of-words vector: each lowercase word adds 1.0 to a blake3-chosen bucket.
pub fn hashed_vector(text: &str, dimensions: usize) -> Vec<f32> {
	let mut vector = vec![0.0; dimensions.max(1)];

	for word in text.split_whitespace() {
		let word = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();

		if word.is_empty() {
			continue;
		}

		let hash = blake3::hash(word.as_bytes());
		let bytes = hash.as_bytes();
		let bucket = u64::from_le_bytes([
			bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
		]) as usize % vector.len();

		vector[bucket] += 1.0;
	}

	vector
}

/// Unique directory under the system temp dir, removed on drop.
pub struct ScratchDir {
	path: PathBuf,
}
impl ScratchDir {
	pub fn new(prefix: &str) -> Result<Self> {
		let path = env::temp_dir().join(format!("{prefix}_{}", Uuid::new_v4().simple()));

		std::fs::create_dir_all(&path).map_err(|err| {
			Error::Message(format!("Failed to create scratch dir {}: {err}.", path.display()))
		})?;

		Ok(Self { path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}
impl Drop for ScratchDir {
	fn drop(&mut self) {
		if let Err(err) = std::fs::remove_dir_all(&self.path) {
			eprintln!("Scratch dir cleanup failed for {}: {err}.", self.path.display());
		}
	}
}

pub async fn with_scratch_dir<F, Fut, T>(prefix: &str, f: F) -> Result<T>
where
	F: FnOnce(PathBuf) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let dir = ScratchDir::new(prefix)?;

	f(dir.path().to_path_buf()).await
}
