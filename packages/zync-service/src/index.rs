//! Flat similarity index ranking documents by cosine closeness blended with recency.

use std::{
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use zync_config::{Config, EmbeddingProviderConfig};
use zync_domain::{
	DocumentMetadata, IndexedDocument, RankingWeights, Sentiment, is_indexable,
	scoring::{age_hours, blended_score, cosine_similarity, decay_factor},
};
use zync_storage::{
	debounce::{FlushFn, Flusher},
	kv::KvStore,
	snapshot,
};

use crate::{EmbeddingProvider, Result};

const DOCUMENTS_KEY: &str = "index.documents";
const DOCUMENTS_SCHEMA: &str = "zync.index_documents/v1";

/// A search hit with the terms that produced its rank.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredDocument {
	pub document: IndexedDocument,
	pub similarity: f32,
	pub decay_factor: f32,
	pub score: f32,
}

#[derive(Clone)]
pub struct SimilarityIndex {
	shared: Arc<Shared>,
	flusher: Arc<Flusher>,
	provider: Arc<dyn EmbeddingProvider>,
	embedding: Arc<EmbeddingProviderConfig>,
	weights: RankingWeights,
	min_content_chars: usize,
	default_top_k: usize,
	embed_timeout: Duration,
}
impl SimilarityIndex {
	pub async fn open(
		cfg: &Config,
		provider: Arc<dyn EmbeddingProvider>,
		store: Arc<dyn KvStore>,
	) -> Result<Self> {
		let dimensions = cfg.providers.embedding.dimensions as usize;
		let loaded: Vec<IndexedDocument> =
			snapshot::load(store.as_ref(), DOCUMENTS_KEY, DOCUMENTS_SCHEMA).await?;
		let total = loaded.len();
		let documents: Vec<IndexedDocument> =
			loaded.into_iter().filter(|doc| doc.embedding.len() == dimensions).collect();

		if documents.len() != total {
			tracing::warn!(
				skipped = total - documents.len(),
				dimensions,
				"Skipped stored documents with a different embedding dimension."
			);
		}

		tracing::info!(documents = documents.len(), "Loaded similarity index.");

		let shared = Arc::new(Shared {
			store,
			documents: Mutex::new(documents),
			flush_lock: tokio::sync::Mutex::new(()),
			capacity: cfg.index.capacity,
		});
		let flush_shared = shared.clone();
		let flush: FlushFn = Arc::new(move || {
			let shared = flush_shared.clone();

			Box::pin(async move { shared.flush().await.is_ok() })
		});
		let flusher = Arc::new(Flusher::spawn(
			"similarity_index",
			Duration::from_millis(cfg.storage.flush_debounce_ms),
			flush,
		));

		Ok(Self {
			shared,
			flusher,
			provider,
			embedding: Arc::new(cfg.providers.embedding.clone()),
			weights: RankingWeights::from(&cfg.ranking),
			min_content_chars: cfg.index.min_content_chars,
			default_top_k: cfg.index.default_top_k,
			embed_timeout: Duration::from_millis(cfg.providers.embedding.timeout_ms),
		})
	}

	pub fn default_top_k(&self) -> usize {
		self.default_top_k
	}

	/// Embeds and stores `content`. Returns `None` when the content is too short or no usable
	/// embedding could be obtained.
	pub async fn add(
		&self,
		content: impl Into<String>,
		metadata: Option<DocumentMetadata>,
		sentiment: Option<Sentiment>,
	) -> Option<Uuid> {
		self.add_at(content, metadata, sentiment, OffsetDateTime::now_utc()).await
	}

	/// Same as [`Self::add`] with an explicit creation time, for backfills and imports.
	pub async fn add_at(
		&self,
		content: impl Into<String>,
		metadata: Option<DocumentMetadata>,
		sentiment: Option<Sentiment>,
		created_at: OffsetDateTime,
	) -> Option<Uuid> {
		let content = content.into();

		if !is_indexable(&content, self.min_content_chars) {
			tracing::debug!(
				min_content_chars = self.min_content_chars,
				"Skipping content below minimum length."
			);

			return None;
		}

		let embedding = self.embed_one(&content).await?;
		let document = IndexedDocument::new(content, embedding, metadata, sentiment, created_at);
		let document_id = document.id;

		self.shared.lock().push(document);
		self.flusher.mark_dirty();

		Some(document_id)
	}

	pub async fn search(&self, query: &str, top_k: usize) -> Vec<IndexedDocument> {
		self.search_scored(query, top_k).await.into_iter().map(|hit| hit.document).collect()
	}

	pub async fn search_scored(&self, query: &str, top_k: usize) -> Vec<ScoredDocument> {
		self.search_scored_at(query, top_k, OffsetDateTime::now_utc()).await
	}

	/// Ranks against an explicit clock reading.
	pub async fn search_scored_at(
		&self,
		query: &str,
		top_k: usize,
		now: OffsetDateTime,
	) -> Vec<ScoredDocument> {
		if top_k == 0 {
			return Vec::new();
		}

		let Some(query_vec) = self.embed_one(query).await else {
			return Vec::new();
		};
		let documents = self.shared.lock();

		rank(&documents, &query_vec, top_k, now, &self.weights)
	}

	/// Drops every document and the persisted snapshot. A flush still pending from earlier
	/// mutations keeps the key absent.
	pub async fn clear(&self) {
		let _guard = self.shared.flush_lock.lock().await;
		let dropped = {
			let mut documents = self.shared.lock();
			let dropped = documents.len();

			documents.clear();

			dropped
		};

		if let Err(err) = self.shared.store.remove(DOCUMENTS_KEY).await {
			tracing::error!(error = %err, "Failed to remove persisted similarity index.");
		}

		tracing::info!(dropped, "Cleared similarity index.");
	}

	pub fn remove(&self, document_id: Uuid) -> bool {
		self.retain(|doc| doc.id != document_id) > 0
	}

	/// Keeps only documents matching `keep`. Returns how many were removed.
	pub fn retain<F>(&self, mut keep: F) -> usize
	where
		F: FnMut(&IndexedDocument) -> bool,
	{
		let removed = {
			let mut documents = self.shared.lock();
			let before = documents.len();

			documents.retain(|doc| keep(doc));

			before - documents.len()
		};

		if removed > 0 {
			self.flusher.mark_dirty();
		}

		removed
	}

	pub fn len(&self) -> usize {
		self.shared.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// All documents in insertion order, oldest first.
	pub fn documents(&self) -> Vec<IndexedDocument> {
		self.shared.lock().clone()
	}

	/// Applies the capacity bound and writes the snapshot immediately.
	pub async fn flush(&self) -> Result<()> {
		self.shared.flush().await
	}

	pub async fn shutdown(&self) {
		self.flusher.shutdown().await;
	}

	async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
		let texts = vec![text.to_string()];
		let call = self.provider.embed(&self.embedding, &texts);
		let vectors = match tokio::time::timeout(self.embed_timeout, call).await {
			Ok(Ok(vectors)) => vectors,
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Embedding provider failed.");

				return None;
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = self.embed_timeout.as_millis() as u64,
					"Embedding provider timed out."
				);

				return None;
			},
		};
		let Some(vector) = vectors.into_iter().next() else {
			tracing::warn!("Embedding provider returned no vectors.");

			return None;
		};

		if vector.is_empty() {
			tracing::debug!("Embedding provider returned an empty vector.");

			return None;
		}
		if vector.len() != self.embedding.dimensions as usize {
			tracing::warn!(
				expected = self.embedding.dimensions,
				actual = vector.len(),
				"Embedding vector dimension mismatch."
			);

			return None;
		}
		if vector.iter().any(|value| !value.is_finite()) {
			tracing::warn!("Embedding vector contains non-finite values.");

			return None;
		}

		Some(vector)
	}
}

/// Scores every document against `query`, then keeps the best `top_k`. Equal scores keep
/// insertion order.
pub fn rank(
	documents: &[IndexedDocument],
	query: &[f32],
	top_k: usize,
	now: OffsetDateTime,
	weights: &RankingWeights,
) -> Vec<ScoredDocument> {
	let mut scored: Vec<(usize, f32, f32, f32)> = documents
		.iter()
		.enumerate()
		.map(|(position, doc)| {
			let similarity = cosine_similarity(query, &doc.embedding);
			let decay = decay_factor(age_hours(doc.created_at, now), weights);

			(position, similarity, decay, blended_score(similarity, decay, weights))
		})
		.collect();

	scored.sort_by(|a, b| b.3.total_cmp(&a.3));
	scored.truncate(top_k);

	scored
		.into_iter()
		.map(|(position, similarity, decay_factor, score)| {
			let mut document = documents[position].clone();

			document.temporal_weight = decay_factor;

			ScoredDocument { document, similarity, decay_factor, score }
		})
		.collect()
}

struct Shared {
	store: Arc<dyn KvStore>,
	documents: Mutex<Vec<IndexedDocument>>,
	flush_lock: tokio::sync::Mutex<()>,
	capacity: usize,
}
impl Shared {
	fn lock(&self) -> MutexGuard<'_, Vec<IndexedDocument>> {
		self.documents.lock().unwrap_or_else(|err| err.into_inner())
	}

	async fn flush(&self) -> Result<()> {
		let _guard = self.flush_lock.lock().await;
		let encoded = {
			let mut documents = self.lock();

			if documents.len() > self.capacity {
				let evicted = documents.len() - self.capacity;

				documents.drain(..evicted);

				tracing::info!(evicted, capacity = self.capacity, "Evicted oldest documents.");
			}

			if documents.is_empty() {
				None
			} else {
				Some(snapshot::encode(DOCUMENTS_SCHEMA, documents.as_slice()))
			}
		};
		// An empty index persists as a missing key, which loads back as empty.
		let result = match encoded {
			Some(Ok(bytes)) => self.store.put(DOCUMENTS_KEY, bytes).await,
			Some(Err(err)) => Err(err),
			None => self.store.remove(DOCUMENTS_KEY).await,
		};

		if let Err(err) = &result {
			tracing::error!(error = %err, "Failed to save similarity index.");
		}

		Ok(result?)
	}
}
