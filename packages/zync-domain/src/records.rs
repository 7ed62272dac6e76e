use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A recorded reasoning step.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MemoryNode {
	pub id: Uuid,
	pub content: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parent_id: Option<Uuid>,
	#[serde(default)]
	pub children_ids: Vec<Uuid>,
	#[serde(default)]
	pub ghost_branch_ids: Vec<Uuid>,
	pub confidence: f32,
	#[serde(default)]
	pub tags: BTreeSet<String>,
}
impl MemoryNode {
	pub fn new(
		content: impl Into<String>,
		parent_id: Option<Uuid>,
		confidence: f32,
		now: OffsetDateTime,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			content: content.into(),
			created_at: now,
			parent_id,
			children_ids: Vec::new(),
			ghost_branch_ids: Vec::new(),
			confidence,
			tags: BTreeSet::new(),
		}
	}

	pub fn is_root(&self) -> bool {
		self.parent_id.is_none()
	}
}

/// A rejected alternative, anchored to the node where it was rejected.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GhostBranch {
	pub id: Uuid,
	pub origin_node_id: Uuid,
	pub content: String,
	pub reason_for_rejection: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}
impl GhostBranch {
	pub fn new(
		origin_node_id: Uuid,
		content: impl Into<String>,
		reason_for_rejection: impl Into<String>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			origin_node_id,
			content: content.into(),
			reason_for_rejection: reason_for_rejection.into(),
			created_at: now,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
	Positive,
	Neutral,
	Negative,
	Analytical,
}
impl Sentiment {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Positive => "positive",
			Self::Neutral => "neutral",
			Self::Negative => "negative",
			Self::Analytical => "analytical",
		}
	}
}

/// Caller payload attached to an indexed document. The index never inspects it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentMetadata {
	MemoryNode { node_id: Uuid },
	External { reference: String },
}
impl DocumentMetadata {
	pub fn node_id(&self) -> Option<Uuid> {
		match self {
			Self::MemoryNode { node_id } => Some(*node_id),
			Self::External { .. } => None,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IndexedDocument {
	pub id: Uuid,
	pub content: String,
	pub embedding: Vec<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<DocumentMetadata>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// 1.0 when stored; search results carry the decay factor computed for that search.
	#[serde(default = "initial_temporal_weight")]
	pub temporal_weight: f32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sentiment: Option<Sentiment>,
}
impl IndexedDocument {
	pub fn new(
		content: impl Into<String>,
		embedding: Vec<f32>,
		metadata: Option<DocumentMetadata>,
		sentiment: Option<Sentiment>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			content: content.into(),
			embedding,
			metadata,
			created_at: now,
			temporal_weight: initial_temporal_weight(),
			sentiment,
		}
	}
}

fn initial_temporal_weight() -> f32 {
	1.0
}
