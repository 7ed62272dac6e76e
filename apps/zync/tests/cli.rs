use std::{path::Path, sync::Arc};

use clap::Parser;
use uuid::Uuid;

use zync::{Args, Command, execute};
use zync_service::{EmbeddingProvider, ZyncService};
use zync_storage::kv::{KvStore, MemoryStore};
use zync_testkit::{FakeEmbedding, TEST_DIMENSIONS, test_config};

async fn open_service() -> ZyncService {
	let provider: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbedding::new(TEST_DIMENSIONS));
	let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());

	ZyncService::open(test_config(Path::new("unused")), provider, store)
		.await
		.expect("Failed to open service.")
}

fn node_id(value: &serde_json::Value, field: &str) -> Uuid {
	value[field].as_str().and_then(|raw| raw.parse().ok()).expect("Missing id in output.")
}

#[test]
fn parses_remember_with_parent() {
	let parent = Uuid::new_v4();
	let args = Args::try_parse_from([
		"zync",
		"-c",
		"zync.toml",
		"remember",
		"the build is flaky",
		"--parent",
		&parent.to_string(),
		"--confidence",
		"0.4",
	])
	.expect("Failed to parse arguments.");

	assert_eq!(args.config, Path::new("zync.toml"));
	assert!(matches!(
		args.command,
		Command::Remember { parent: Some(id), confidence, .. } if id == parent && confidence == 0.4
	));
}

#[test]
fn remember_defaults_to_full_confidence() {
	let args = Args::try_parse_from(["zync", "-c", "zync.toml", "remember", "a root step"])
		.expect("Failed to parse arguments.");

	assert!(matches!(
		args.command,
		Command::Remember { parent: None, confidence, .. } if confidence == 1.0
	));
}

#[test]
fn parses_kebab_case_commands() {
	let args = Args::try_parse_from(["zync", "--config", "zync.toml", "clear-index"])
		.expect("Failed to parse arguments.");

	assert!(matches!(args.command, Command::ClearIndex));

	let args = Args::try_parse_from(["zync", "-c", "zync.toml", "prune", "--min-confidence", "0.3"])
		.expect("Failed to parse arguments.");

	assert!(matches!(args.command, Command::Prune { min_confidence } if min_confidence == 0.3));
}

#[test]
fn rejects_malformed_node_ids() {
	assert!(Args::try_parse_from(["zync", "-c", "zync.toml", "trace", "not-a-uuid"]).is_err());
	assert!(Args::try_parse_from(["zync", "trace", &Uuid::new_v4().to_string()]).is_err());
}

#[tokio::test]
async fn commands_drive_the_service() {
	let service = open_service().await;
	let root = execute(
		&service,
		Command::Remember {
			content: "the deploy failed on migrations".to_string(),
			parent: None,
			confidence: 1.0,
		},
	)
	.await
	.expect("remember failed");
	let root_id = node_id(&root, "node_id");
	let child = execute(
		&service,
		Command::Remember {
			content: "roll back the schema change".to_string(),
			parent: Some(root_id),
			confidence: 0.9,
		},
	)
	.await
	.expect("remember failed");
	let child_id = node_id(&child, "node_id");

	execute(
		&service,
		Command::Reject {
			origin: root_id,
			content: "retry the deploy".to_string(),
			reason: "same migration would fail again".to_string(),
		},
	)
	.await
	.expect("reject failed");

	let trace =
		execute(&service, Command::Trace { node_id: child_id }).await.expect("trace failed");

	assert_eq!(trace.as_array().map(Vec::len), Some(2));

	let ghosts =
		execute(&service, Command::Ghosts { node_id: child_id }).await.expect("ghosts failed");

	assert_eq!(ghosts[0]["reason_for_rejection"], "same migration would fail again");

	let stats = execute(&service, Command::Stats).await.expect("stats failed");

	assert_eq!(stats["nodes"], 2);
	assert_eq!(stats["ghost_branches"], 1);
	assert_eq!(stats["documents"], 2);

	let recall = Command::Recall { query: "schema change".to_string(), top_k: Some(1) };
	let hits = execute(&service, recall).await.expect("recall failed");

	assert_eq!(hits.as_array().map(Vec::len), Some(1));
	assert!(hits[0]["score"].is_number());

	let found = execute(&service, Command::Find { text: "DEPLOY".to_string() })
		.await
		.expect("find failed");

	assert_eq!(found.as_array().map(Vec::len), Some(1));

	let forgotten =
		execute(&service, Command::Forget { node_id: root_id }).await.expect("forget failed");

	assert_eq!(forgotten["node_ids"].as_array().map(Vec::len), Some(2));
	assert_eq!(forgotten["documents_removed"], 2);

	service.shutdown().await;
}

#[tokio::test]
async fn unknown_parent_is_an_error() {
	let service = open_service().await;
	let result = execute(
		&service,
		Command::Remember {
			content: "dangling step".to_string(),
			parent: Some(Uuid::new_v4()),
			confidence: 1.0,
		},
	)
	.await;

	assert!(result.is_err());

	service.shutdown().await;
}

#[tokio::test]
async fn non_finite_confidence_is_an_error() {
	let service = open_service().await;
	let args = Args::try_parse_from([
		"zync",
		"-c",
		"zync.toml",
		"remember",
		"a step",
		"--confidence",
		"NaN",
	])
	.expect("Failed to parse arguments.");

	assert!(execute(&service, args.command).await.is_err());
	assert_eq!(service.tree().stats().nodes, 0);

	service.shutdown().await;
}
