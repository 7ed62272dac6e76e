use std::{
	path::Path,
	sync::{Arc, atomic::Ordering},
	time::Duration,
};

use time::OffsetDateTime;
use uuid::Uuid;

use zync_config::Config;
use zync_domain::{DocumentMetadata, Sentiment};
use zync_service::{EmbeddingProvider, SimilarityIndex};
use zync_storage::kv::{KvStore, MemoryStore};
use zync_testkit::{FakeEmbedding, TEST_DIMENSIONS, test_config};

fn config() -> Config {
	test_config(Path::new("unused"))
}

fn axis(cos: f32) -> Vec<f32> {
	let mut vector = vec![0.0; TEST_DIMENSIONS as usize];

	vector[0] = cos;
	vector[1] = (1.0 - cos * cos).sqrt();

	vector
}

async fn open_index(
	cfg: &Config,
	provider: FakeEmbedding,
	store: Arc<MemoryStore>,
) -> SimilarityIndex {
	let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
	let store: Arc<dyn KvStore> = store;

	SimilarityIndex::open(cfg, provider, store).await.expect("Failed to open index.")
}

#[tokio::test]
async fn short_content_is_dropped_without_embedding() {
	let provider = FakeEmbedding::new(TEST_DIMENSIONS);
	let calls = provider.call_counter();
	let index = open_index(&config(), provider, Arc::new(MemoryStore::new())).await;

	assert!(index.add("abcd", None, None).await.is_none());
	assert!(index.add("   ab   ", None, None).await.is_none());
	assert!(index.is_empty());
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	assert!(index.add("abcde", None, None).await.is_some());
	assert_eq!(index.len(), 1);

	index.shutdown().await;
}

#[tokio::test]
async fn search_returns_top_k_in_descending_score() {
	let provider = FakeEmbedding::new(TEST_DIMENSIONS)
		.with_vector("cache warming strategy", axis(0.99))
		.with_vector("database connection pool", axis(0.2))
		.with_vector("cache eviction policy", axis(0.8))
		.with_vector("retry with exponential backoff", axis(0.5))
		.with_vector("cache invalidation is hard", axis(0.95))
		.with_vector("cache", axis(1.0));
	let index = open_index(&config(), provider, Arc::new(MemoryStore::new())).await;

	for content in [
		"cache warming strategy",
		"database connection pool",
		"cache eviction policy",
		"retry with exponential backoff",
		"cache invalidation is hard",
	] {
		index.add(content, None, None).await.expect("Failed to index document.");
	}

	let hits = index.search_scored("cache", 3).await;
	let contents: Vec<&str> = hits.iter().map(|hit| hit.document.content.as_str()).collect();

	assert_eq!(
		contents,
		vec!["cache warming strategy", "cache invalidation is hard", "cache eviction policy"]
	);
	assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
	assert_eq!(index.search("cache", 10).await.len(), 5);
	assert!(index.search("cache", 0).await.is_empty());

	index.shutdown().await;
}

#[tokio::test]
async fn recency_breaks_close_similarity() {
	let provider = FakeEmbedding::new(TEST_DIMENSIONS)
		.with_vector("older but closer", axis(0.95))
		.with_vector("newer but looser", axis(0.9))
		.with_vector("the query", axis(1.0));
	let index = open_index(&config(), provider, Arc::new(MemoryStore::new())).await;
	let now = OffsetDateTime::now_utc();
	let older = index
		.add_at("older but closer", None, None, now - time::Duration::hours(5))
		.await
		.expect("Failed to index older document.");
	let newer = index
		.add_at("newer but looser", None, None, now)
		.await
		.expect("Failed to index newer document.");
	let hits = index.search_scored_at("the query", 2, now).await;

	assert_eq!(hits[0].document.id, newer);
	assert_eq!(hits[1].document.id, older);
	assert!((hits[0].score - 0.93).abs() < 1e-3);
	assert!((hits[1].score - 0.815).abs() < 1e-3);
	assert!((hits[1].decay_factor - 0.5).abs() < 1e-6);
	assert_eq!(hits[1].document.temporal_weight, hits[1].decay_factor);

	index.shutdown().await;
}

#[tokio::test]
async fn provider_failure_degrades_to_empty_results() {
	let store = Arc::new(MemoryStore::new());
	let index = open_index(&config(), FakeEmbedding::failing(TEST_DIMENSIONS), store).await;

	assert!(index.add("a perfectly fine memory", None, None).await.is_none());
	assert!(index.search("fine", 3).await.is_empty());
	assert!(index.is_empty());

	index.shutdown().await;
}

#[tokio::test]
async fn empty_embedding_is_a_miss() {
	let store = Arc::new(MemoryStore::new());
	let index = open_index(&config(), FakeEmbedding::empty(TEST_DIMENSIONS), store).await;

	assert!(index.add("a perfectly fine memory", None, None).await.is_none());
	assert!(index.search_scored("fine", 3).await.is_empty());

	index.shutdown().await;
}

#[tokio::test]
async fn wrong_dimension_embedding_is_a_miss() {
	let store = Arc::new(MemoryStore::new());
	let index = open_index(&config(), FakeEmbedding::new(TEST_DIMENSIONS + 1), store).await;

	assert!(index.add("a perfectly fine memory", None, None).await.is_none());
	assert!(index.is_empty());

	index.shutdown().await;
}

#[tokio::test]
async fn slow_provider_times_out() {
	let mut cfg = config();

	cfg.providers.embedding.timeout_ms = 30;

	let provider = FakeEmbedding::slow(TEST_DIMENSIONS, Duration::from_millis(500));
	let index = open_index(&cfg, provider, Arc::new(MemoryStore::new())).await;

	assert!(index.add("a perfectly fine memory", None, None).await.is_none());
	assert!(index.search("fine", 3).await.is_empty());

	index.shutdown().await;
}

#[tokio::test]
async fn flush_keeps_newest_documents_within_capacity() {
	let store = Arc::new(MemoryStore::new());
	let cfg = config();
	let capacity = cfg.index.capacity;
	let index = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store.clone()).await;
	let mut ids = Vec::new();

	for i in 0..capacity + 5 {
		ids.push(index.add(format!("document number {i}"), None, None).await.expect("add"));
	}

	index.flush().await.expect("Failed to flush index.");

	let kept: Vec<Uuid> = index.documents().into_iter().map(|doc| doc.id).collect();

	assert_eq!(kept.len(), capacity);
	assert_eq!(kept, ids[5..].to_vec());

	index.shutdown().await;

	let reopened = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store).await;

	assert_eq!(reopened.len(), capacity);

	reopened.shutdown().await;
}

#[tokio::test]
async fn snapshot_round_trips_documents() {
	let store = Arc::new(MemoryStore::new());
	let cfg = config();
	let index = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store.clone()).await;
	let node_id = Uuid::new_v4();

	index
		.add(
			"remember the deploy window",
			Some(DocumentMetadata::MemoryNode { node_id }),
			Some(Sentiment::Analytical),
		)
		.await
		.expect("Failed to index document.");
	index.shutdown().await;

	assert!(store.contains("index.documents"));

	let reopened = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store).await;

	assert_eq!(reopened.documents(), index.documents());
	assert_eq!(
		reopened.documents()[0].metadata.as_ref().and_then(DocumentMetadata::node_id),
		Some(node_id)
	);

	reopened.shutdown().await;
}

#[tokio::test]
async fn stored_documents_with_other_dimension_are_skipped() {
	let store = Arc::new(MemoryStore::new());
	let cfg = config();
	let index = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store.clone()).await;

	index.add("written with eight dimensions", None, None).await.expect("add");
	index.shutdown().await;

	let mut wider = config();

	wider.providers.embedding.dimensions = TEST_DIMENSIONS * 2;

	let reopened = open_index(&wider, FakeEmbedding::new(TEST_DIMENSIONS * 2), store).await;

	assert!(reopened.is_empty());

	reopened.shutdown().await;
}

#[tokio::test]
async fn clear_drops_documents_and_snapshot() {
	let store = Arc::new(MemoryStore::new());
	let index = open_index(&config(), FakeEmbedding::new(TEST_DIMENSIONS), store.clone()).await;

	index.add("something worth keeping", None, None).await.expect("add");
	index.flush().await.expect("Failed to flush index.");

	assert!(store.contains("index.documents"));

	index.clear().await;

	assert!(index.is_empty());
	assert!(!store.contains("index.documents"));

	// The add above is still waiting in the debounce window.
	tokio::time::sleep(Duration::from_millis(200)).await;

	assert!(!store.contains("index.documents"));

	index.shutdown().await;
}

#[tokio::test]
async fn remove_and_retain_report_what_they_dropped() {
	let store = Arc::new(MemoryStore::new());
	let index = open_index(&config(), FakeEmbedding::new(TEST_DIMENSIONS), store).await;
	let first = index.add("first document", None, None).await.expect("add");

	index.add("second document", None, Some(Sentiment::Positive)).await.expect("add");
	index.add("third document", None, Some(Sentiment::Negative)).await.expect("add");

	assert!(index.remove(first));
	assert!(!index.remove(first));
	assert_eq!(index.retain(|doc| doc.sentiment != Some(Sentiment::Negative)), 1);
	assert_eq!(index.len(), 1);

	index.shutdown().await;
}

#[tokio::test]
async fn mutations_coalesce_into_one_write() {
	let store = Arc::new(MemoryStore::new());
	let mut cfg = config();

	cfg.storage.flush_debounce_ms = 100;

	let index = open_index(&cfg, FakeEmbedding::new(TEST_DIMENSIONS), store.clone()).await;

	for i in 0..5 {
		index.add(format!("burst entry {i}"), None, None).await.expect("add");
	}

	tokio::time::sleep(Duration::from_millis(400)).await;

	assert_eq!(store.put_count(), 1);

	index.shutdown().await;

	assert_eq!(store.put_count(), 1);
}
