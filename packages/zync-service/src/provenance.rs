//! Parent-linked tree of reasoning steps plus the alternatives rejected along the way.

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use zync_config::ReferencePolicy;
use zync_domain::{DocumentMetadata, GhostBranch, MemoryNode, Sentiment};
use zync_storage::{
	debounce::{FlushFn, Flusher},
	kv::KvStore,
	snapshot,
};

use crate::{
	Error, Result,
	indexer::{IndexRequest, IndexSender},
};

pub const DEFAULT_CONFIDENCE: f32 = 1.0;

const NODES_KEY: &str = "provenance.nodes";
const NODES_SCHEMA: &str = "zync.provenance_nodes/v1";
const GHOSTS_KEY: &str = "provenance.ghosts";
const GHOSTS_SCHEMA: &str = "zync.provenance_ghosts/v1";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TreeStats {
	pub nodes: usize,
	pub ghost_branches: usize,
	pub roots: usize,
}

#[derive(Clone)]
pub struct ProvenanceTree {
	shared: Arc<Shared>,
	flusher: Arc<Flusher>,
	policy: ReferencePolicy,
	index_sender: Option<IndexSender>,
}
impl ProvenanceTree {
	pub async fn open(
		store: Arc<dyn KvStore>,
		policy: ReferencePolicy,
		flush_delay: Duration,
	) -> Result<Self> {
		let nodes: Vec<MemoryNode> = snapshot::load(store.as_ref(), NODES_KEY, NODES_SCHEMA).await?;
		let ghosts: Vec<GhostBranch> =
			snapshot::load(store.as_ref(), GHOSTS_KEY, GHOSTS_SCHEMA).await?;
		let state = TreeState::from_records(nodes, ghosts);

		tracing::info!(
			nodes = state.nodes.len(),
			ghost_branches = state.ghosts.len(),
			"Loaded provenance tree."
		);

		let shared = Arc::new(Shared {
			store,
			state: Mutex::new(state),
			flush_lock: tokio::sync::Mutex::new(()),
		});
		let flush_shared = shared.clone();
		let flush: FlushFn = Arc::new(move || {
			let shared = flush_shared.clone();

			Box::pin(async move { shared.flush().await.is_ok() })
		});
		let flusher = Arc::new(Flusher::spawn("provenance", flush_delay, flush));

		Ok(Self { shared, flusher, policy, index_sender: None })
	}

	/// Routes the content of every new node to the similarity index.
	pub fn with_index_sender(mut self, sender: IndexSender) -> Self {
		self.index_sender = Some(sender);

		self
	}

	pub fn policy(&self) -> ReferencePolicy {
		self.policy
	}

	pub fn add_memory(
		&self,
		content: impl Into<String>,
		parent_id: Option<Uuid>,
		confidence: f32,
	) -> Result<Uuid> {
		if !confidence.is_finite() {
			return Err(Error::InvalidRequest {
				message: format!("Confidence must be a finite number, got {confidence}."),
			});
		}

		let content = content.into();
		let now = OffsetDateTime::now_utc();
		let node_id = {
			let mut state = self.shared.lock();

			if let Some(parent_id) = parent_id
				&& !state.nodes.contains_key(&parent_id)
			{
				match self.policy {
					ReferencePolicy::Strict => {
						return Err(Error::NotFound {
							message: format!("Parent node {parent_id} does not exist."),
						});
					},
					ReferencePolicy::Tolerant => {
						tracing::warn!(%parent_id, "Parent node missing; storing node as a root.");
					},
				}
			}

			let node = MemoryNode::new(content.clone(), parent_id, confidence, now);
			let node_id = node.id;

			if let Some(parent) = parent_id.and_then(|id| state.nodes.get_mut(&id)) {
				parent.children_ids.push(node_id);
			}

			state.insert_node(node);

			node_id
		};

		self.flusher.mark_dirty();

		if let Some(sender) = &self.index_sender {
			let request = IndexRequest {
				content,
				metadata: Some(DocumentMetadata::MemoryNode { node_id }),
				sentiment: Some(Sentiment::Analytical),
			};

			if !sender.submit(request) {
				tracing::warn!(%node_id, "Indexer is gone; memory node will not be searchable.");
			}
		}

		Ok(node_id)
	}

	pub fn add_ghost_branch(
		&self,
		origin_node_id: Uuid,
		content: impl Into<String>,
		reason: impl Into<String>,
	) -> Result<Uuid> {
		let ghost = GhostBranch::new(origin_node_id, content, reason, OffsetDateTime::now_utc());
		let ghost_id = ghost.id;

		{
			let mut state = self.shared.lock();

			match state.nodes.get_mut(&origin_node_id) {
				Some(origin) => origin.ghost_branch_ids.push(ghost_id),
				None => match self.policy {
					ReferencePolicy::Strict => {
						return Err(Error::NotFound {
							message: format!("Origin node {origin_node_id} does not exist."),
						});
					},
					ReferencePolicy::Tolerant => {
						tracing::warn!(
							%origin_node_id,
							%ghost_id,
							"Origin node missing; storing ghost branch unanchored."
						);
					},
				},
			}

			state.insert_ghost(ghost);
		}

		self.flusher.mark_dirty();

		Ok(ghost_id)
	}

	/// Root-first path ending at `node_id`. A missing parent truncates the path.
	pub fn get_trace(&self, node_id: Uuid) -> Vec<MemoryNode> {
		let state = self.shared.lock();

		state.trace(node_id).into_iter().cloned().collect()
	}

	pub fn get_ghost_branches_for_trace(&self, node_id: Uuid) -> Vec<GhostBranch> {
		let state = self.shared.lock();
		let mut seen = HashSet::new();

		state
			.trace(node_id)
			.into_iter()
			.flat_map(|node| node.ghost_branch_ids.iter())
			.filter(|ghost_id| seen.insert(**ghost_id))
			.filter_map(|ghost_id| state.ghosts.get(ghost_id))
			.cloned()
			.collect()
	}

	pub fn get(&self, node_id: Uuid) -> Option<MemoryNode> {
		self.shared.lock().nodes.get(&node_id).cloned()
	}

	pub fn ghost(&self, ghost_id: Uuid) -> Option<GhostBranch> {
		self.shared.lock().ghosts.get(&ghost_id).cloned()
	}

	pub fn nodes(&self) -> Vec<MemoryNode> {
		self.shared.lock().ordered_nodes().into_iter().cloned().collect()
	}

	pub fn ghost_branches(&self) -> Vec<GhostBranch> {
		self.shared.lock().ordered_ghosts().into_iter().cloned().collect()
	}

	/// Case-insensitive substring match over node content, in insertion order.
	pub fn find(&self, text: &str) -> Vec<MemoryNode> {
		let needle = text.trim().to_lowercase();
		let state = self.shared.lock();

		state
			.ordered_nodes()
			.into_iter()
			.filter(|node| needle.is_empty() || node.content.to_lowercase().contains(&needle))
			.cloned()
			.collect()
	}

	/// Removes the node, its subtree, and every ghost branch anchored in that subtree.
	/// Returns the removed node ids in pre-order.
	pub fn delete(&self, node_id: Uuid) -> Result<Vec<Uuid>> {
		let removed = {
			let mut state = self.shared.lock();

			if !state.nodes.contains_key(&node_id) {
				return Err(Error::NotFound { message: format!("Node {node_id} does not exist.") });
			}

			state.remove_subtree(node_id)
		};

		tracing::info!(%node_id, removed = removed.len(), "Deleted provenance subtree.");

		self.flusher.mark_dirty();

		Ok(removed)
	}

	/// Deletes every node below `min_confidence`, along with its subtree.
	pub fn prune(&self, min_confidence: f32) -> Vec<Uuid> {
		let removed = {
			let mut state = self.shared.lock();
			let candidates: Vec<Uuid> = state
				.ordered_nodes()
				.into_iter()
				.filter(|node| node.confidence < min_confidence)
				.map(|node| node.id)
				.collect();
			let mut removed = Vec::new();

			for node_id in candidates {
				if state.nodes.contains_key(&node_id) {
					removed.extend(state.remove_subtree(node_id));
				}
			}

			removed
		};

		if !removed.is_empty() {
			tracing::info!(min_confidence, removed = removed.len(), "Pruned provenance tree.");

			self.flusher.mark_dirty();
		}

		removed
	}

	pub fn stats(&self) -> TreeStats {
		let state = self.shared.lock();
		let roots = state
			.nodes
			.values()
			.filter(|node| node.parent_id.is_none_or(|id| !state.nodes.contains_key(&id)))
			.count();

		TreeStats { nodes: state.nodes.len(), ghost_branches: state.ghosts.len(), roots }
	}

	/// Writes the snapshot immediately, bypassing the debounce window.
	pub async fn flush(&self) -> Result<()> {
		self.shared.flush().await
	}

	pub async fn shutdown(&self) {
		self.flusher.shutdown().await;
	}
}

struct Shared {
	store: Arc<dyn KvStore>,
	state: Mutex<TreeState>,
	flush_lock: tokio::sync::Mutex<()>,
}
impl Shared {
	fn lock(&self) -> MutexGuard<'_, TreeState> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}

	async fn flush(&self) -> Result<()> {
		let _guard = self.flush_lock.lock().await;
		let encoded = {
			let state = self.lock();

			snapshot::encode(NODES_SCHEMA, &state.ordered_nodes()).and_then(|nodes| {
				snapshot::encode(GHOSTS_SCHEMA, &state.ordered_ghosts())
					.map(|ghosts| (nodes, ghosts))
			})
		};
		let result = match encoded {
			Ok((nodes, ghosts)) => match self.store.put(NODES_KEY, nodes).await {
				Ok(()) => self.store.put(GHOSTS_KEY, ghosts).await,
				Err(err) => Err(err),
			},
			Err(err) => Err(err),
		};

		if let Err(err) = &result {
			tracing::error!(error = %err, "Failed to save provenance tree.");
		}

		Ok(result?)
	}
}

#[derive(Default)]
struct TreeState {
	nodes: HashMap<Uuid, MemoryNode>,
	node_order: Vec<Uuid>,
	ghosts: HashMap<Uuid, GhostBranch>,
	ghost_order: Vec<Uuid>,
}
impl TreeState {
	fn from_records(nodes: Vec<MemoryNode>, ghosts: Vec<GhostBranch>) -> Self {
		let mut state = Self::default();

		for node in nodes {
			if state.nodes.contains_key(&node.id) {
				tracing::warn!(node_id = %node.id, "Skipping duplicate node in snapshot.");

				continue;
			}

			state.insert_node(node);
		}
		for ghost in ghosts {
			if state.ghosts.contains_key(&ghost.id) {
				tracing::warn!(
					ghost_id = %ghost.id,
					"Skipping duplicate ghost branch in snapshot."
				);

				continue;
			}

			state.insert_ghost(ghost);
		}

		state
	}

	fn insert_node(&mut self, node: MemoryNode) {
		self.node_order.push(node.id);
		self.nodes.insert(node.id, node);
	}

	fn insert_ghost(&mut self, ghost: GhostBranch) {
		self.ghost_order.push(ghost.id);
		self.ghosts.insert(ghost.id, ghost);
	}

	fn ordered_nodes(&self) -> Vec<&MemoryNode> {
		self.node_order.iter().filter_map(|id| self.nodes.get(id)).collect()
	}

	fn ordered_ghosts(&self) -> Vec<&GhostBranch> {
		self.ghost_order.iter().filter_map(|id| self.ghosts.get(id)).collect()
	}

	fn trace(&self, node_id: Uuid) -> Vec<&MemoryNode> {
		let mut trace = Vec::new();
		let mut seen = HashSet::new();
		let mut current = self.nodes.get(&node_id);

		while let Some(node) = current {
			if !seen.insert(node.id) {
				tracing::warn!(node_id = %node.id, "Cycle in provenance chain; truncating trace.");

				break;
			}

			trace.push(node);

			current = node.parent_id.and_then(|parent_id| self.nodes.get(&parent_id));
		}

		trace.reverse();

		trace
	}

	fn subtree(&self, root: Uuid) -> Vec<Uuid> {
		let mut out = Vec::new();
		let mut seen = HashSet::new();
		let mut stack = vec![root];

		while let Some(node_id) = stack.pop() {
			if !seen.insert(node_id) {
				continue;
			}

			let Some(node) = self.nodes.get(&node_id) else {
				continue;
			};

			out.push(node_id);
			stack.extend(node.children_ids.iter().rev());
		}

		out
	}

	fn remove_subtree(&mut self, root: Uuid) -> Vec<Uuid> {
		let removed = self.subtree(root);

		if let Some(parent_id) = self.nodes.get(&root).and_then(|node| node.parent_id)
			&& let Some(parent) = self.nodes.get_mut(&parent_id)
		{
			parent.children_ids.retain(|id| *id != root);
		}

		for node_id in &removed {
			if let Some(node) = self.nodes.remove(node_id) {
				for ghost_id in node.ghost_branch_ids {
					self.ghosts.remove(&ghost_id);
				}
			}
		}

		let Self { nodes, node_order, ghosts, ghost_order } = self;

		node_order.retain(|id| nodes.contains_key(id));
		ghost_order.retain(|id| ghosts.contains_key(id));

		removed
	}
}
