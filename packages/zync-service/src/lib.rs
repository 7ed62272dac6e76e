pub mod index;
pub mod indexer;
pub mod provenance;

mod error;

pub use error::{Error, Result};
pub use index::{ScoredDocument, SimilarityIndex};
pub use indexer::{IndexRequest, IndexSender, Indexer};
pub use provenance::{DEFAULT_CONFIDENCE, ProvenanceTree, TreeStats};
pub use zync_storage::BoxFuture;

use std::{collections::HashSet, sync::Arc, time::Duration};

use serde::Serialize;
use uuid::Uuid;

use zync_config::{Config, EmbeddingProviderConfig};
use zync_providers::embedding::HttpEmbedder;
use zync_storage::kv::{FsStore, KvStore};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

/// Embedding provider backed by the configured HTTP endpoint.
pub struct HttpProvider {
	embedder: HttpEmbedder,
}
impl HttpProvider {
	pub fn new(cfg: &EmbeddingProviderConfig) -> Result<Self> {
		Ok(Self { embedder: HttpEmbedder::new(cfg)? })
	}
}
impl EmbeddingProvider for HttpProvider {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(self.embedder.embed(cfg, texts))
	}
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ForgetReport {
	pub node_ids: Vec<Uuid>,
	pub documents_removed: usize,
}

/// Owns one provenance tree and one similarity index and keeps them correlated.
pub struct ZyncService {
	pub cfg: Config,
	tree: ProvenanceTree,
	index: SimilarityIndex,
	indexer: Indexer,
}
impl ZyncService {
	pub async fn open(
		cfg: Config,
		provider: Arc<dyn EmbeddingProvider>,
		store: Arc<dyn KvStore>,
	) -> Result<Self> {
		let index = SimilarityIndex::open(&cfg, provider, store.clone()).await?;
		let indexer = Indexer::spawn(index.clone());
		let tree = ProvenanceTree::open(
			store,
			cfg.provenance.reference_policy,
			Duration::from_millis(cfg.storage.flush_debounce_ms),
		)
		.await?
		.with_index_sender(indexer.sender());

		Ok(Self { cfg, tree, index, indexer })
	}

	/// Opens the filesystem store at `storage.path` and the HTTP embedding provider.
	pub async fn open_default(cfg: Config) -> Result<Self> {
		let store = FsStore::open(&cfg.storage.path).await?;
		let provider = HttpProvider::new(&cfg.providers.embedding)?;

		Self::open(cfg, Arc::new(provider), Arc::new(store)).await
	}

	pub fn tree(&self) -> &ProvenanceTree {
		&self.tree
	}

	pub fn index(&self) -> &SimilarityIndex {
		&self.index
	}

	pub async fn recall(&self, query: &str, top_k: Option<usize>) -> Vec<ScoredDocument> {
		let top_k = top_k.unwrap_or_else(|| self.index.default_top_k());

		self.index.search_scored(query, top_k).await
	}

	/// Deletes a node with its subtree and drops the index documents that point at them.
	pub async fn forget(&self, node_id: Uuid) -> Result<ForgetReport> {
		self.settle().await;

		let node_ids = self.tree.delete(node_id)?;

		Ok(self.drop_documents(node_ids))
	}

	pub async fn prune(&self, min_confidence: f32) -> ForgetReport {
		self.settle().await;

		let node_ids = self.tree.prune(min_confidence);

		self.drop_documents(node_ids)
	}

	/// Waits for queued background indexing to finish.
	pub async fn settle(&self) {
		self.indexer.drain().await;
	}

	/// Finishes queued indexing, closes the indexer, and writes both snapshots. Nodes added
	/// afterwards stay in the tree but are no longer indexed.
	pub async fn shutdown(&self) {
		self.indexer.close().await;
		self.tree.shutdown().await;
		self.index.shutdown().await;

		tracing::info!("Memory service shut down.");
	}

	fn drop_documents(&self, node_ids: Vec<Uuid>) -> ForgetReport {
		if node_ids.is_empty() {
			return ForgetReport::default();
		}

		let removed: HashSet<Uuid> = node_ids.iter().copied().collect();
		let documents_removed = self.index.retain(|doc| {
			doc.metadata
				.as_ref()
				.and_then(|metadata| metadata.node_id())
				.is_none_or(|node_id| !removed.contains(&node_id))
		});

		ForgetReport { node_ids, documents_removed }
	}
}
