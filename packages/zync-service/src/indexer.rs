//! Detached background task that feeds new memory nodes into the similarity index.

use tokio::sync::{mpsc, oneshot};

use zync_domain::{DocumentMetadata, Sentiment};

use crate::index::SimilarityIndex;

#[derive(Clone, Debug)]
pub struct IndexRequest {
	pub content: String,
	pub metadata: Option<DocumentMetadata>,
	pub sentiment: Option<Sentiment>,
}

enum Message {
	Index(IndexRequest),
	Drain(oneshot::Sender<()>),
	Close(oneshot::Sender<()>),
}

/// Cheap handle for submitting index requests without waiting on them.
#[derive(Clone)]
pub struct IndexSender {
	tx: mpsc::UnboundedSender<Message>,
}
impl IndexSender {
	/// Queues the request. Returns false when the indexer task has stopped.
	pub fn submit(&self, request: IndexRequest) -> bool {
		self.tx.send(Message::Index(request)).is_ok()
	}
}

pub struct Indexer {
	sender: IndexSender,
}
impl Indexer {
	pub fn spawn(index: SimilarityIndex) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();

		tokio::spawn(run(index, rx));

		Self { sender: IndexSender { tx } }
	}

	pub fn sender(&self) -> IndexSender {
		self.sender.clone()
	}

	/// Waits until every request queued before this call has been processed.
	pub async fn drain(&self) {
		let (ack_tx, ack_rx) = oneshot::channel();

		if self.sender.tx.send(Message::Drain(ack_tx)).is_err() {
			return;
		}
		if ack_rx.await.is_err() {
			tracing::warn!("Indexer stopped before draining.");
		}
	}

	/// Processes everything already queued, then stops the task. Later submissions are refused.
	pub async fn close(&self) {
		let (ack_tx, ack_rx) = oneshot::channel();

		if self.sender.tx.send(Message::Close(ack_tx)).is_err() {
			return;
		}
		if ack_rx.await.is_err() {
			tracing::warn!("Indexer stopped before closing.");
		}
	}
}

async fn run(index: SimilarityIndex, mut rx: mpsc::UnboundedReceiver<Message>) {
	while let Some(message) = rx.recv().await {
		match message {
			Message::Index(request) => {
				let node_id = request.metadata.as_ref().and_then(DocumentMetadata::node_id);
				let sentiment = request.sentiment.map(Sentiment::as_str);

				match index.add(request.content, request.metadata, request.sentiment).await {
					Some(document_id) => {
						tracing::debug!(
							?node_id,
							%document_id,
							?sentiment,
							"Indexed memory content."
						);
					},
					None => {
						tracing::debug!(?node_id, "Memory content was not indexed.");
					},
				}
			},
			Message::Drain(ack) => {
				let _ = ack.send(());
			},
			Message::Close(ack) => {
				rx.close();

				let _ = ack.send(());

				break;
			},
		}
	}

	tracing::debug!("Indexer stopped.");
}
