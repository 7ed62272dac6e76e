use std::path::PathBuf;

use clap::{
	Parser, Subcommand,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use zync_service::{DEFAULT_CONFIDENCE, ScoredDocument, TreeStats, ZyncService};

pub const VERSION: &str = concat!(
	env!("CARGO_PKG_VERSION"),
	"-",
	env!("VERGEN_GIT_SHA"),
	"-",
	env!("VERGEN_CARGO_TARGET_TRIPLE"),
);

#[derive(Debug, Parser)]
#[command(
	version = VERSION,
	rename_all = "kebab",
	styles = styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Record a reasoning step, optionally under a parent step.
	Remember {
		content: String,
		#[arg(long, value_name = "NODE_ID")]
		parent: Option<Uuid>,
		#[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
		confidence: f32,
	},
	/// Record an alternative that was considered at a step and rejected.
	Reject {
		#[arg(long, value_name = "NODE_ID")]
		origin: Uuid,
		content: String,
		#[arg(long)]
		reason: String,
	},
	/// Print the root-first chain of steps ending at a node.
	Trace { node_id: Uuid },
	/// Print the rejected alternatives along a node's chain.
	Ghosts { node_id: Uuid },
	/// Rank stored memories against a query.
	Recall {
		query: String,
		#[arg(long, short = 'k')]
		top_k: Option<usize>,
	},
	/// List steps whose content contains the text.
	Find { text: String },
	/// Delete a step, everything built on it, and its search entries.
	Forget { node_id: Uuid },
	/// Delete every step below a confidence threshold.
	Prune {
		#[arg(long)]
		min_confidence: f32,
	},
	Stats,
	ClearIndex,
}

#[derive(Debug, Serialize)]
struct RecallHit {
	id: Uuid,
	node_id: Option<Uuid>,
	content: String,
	score: f32,
	similarity: f32,
	decay_factor: f32,
}
impl From<ScoredDocument> for RecallHit {
	fn from(hit: ScoredDocument) -> Self {
		Self {
			id: hit.document.id,
			node_id: hit.document.metadata.as_ref().and_then(|metadata| metadata.node_id()),
			content: hit.document.content,
			score: hit.score,
			similarity: hit.similarity,
			decay_factor: hit.decay_factor,
		}
	}
}

#[derive(Debug, Serialize)]
struct StatsReport {
	#[serde(flatten)]
	tree: TreeStats,
	documents: usize,
}

pub fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Cyan.on_default() | Effects::BOLD)
		.usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
		.literal(AnsiColor::Yellow.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = zync_config::load(&args.config)?;

	init_tracing(&config);

	let service = ZyncService::open_default(config).await?;
	let outcome = execute(&service, args.command).await;

	// Persist whatever the command managed to change, even when it failed.
	service.shutdown().await;

	println!("{}", serde_json::to_string_pretty(&outcome?)?);

	Ok(())
}

/// Runs one command against an open service and returns its JSON output.
pub async fn execute(service: &ZyncService, command: Command) -> color_eyre::Result<Value> {
	let tree = service.tree();
	let output = match command {
		Command::Remember { content, parent, confidence } => {
			let node_id = tree.add_memory(content, parent, confidence)?;

			serde_json::json!({ "node_id": node_id })
		},
		Command::Reject { origin, content, reason } => {
			let ghost_id = tree.add_ghost_branch(origin, content, reason)?;

			serde_json::json!({ "ghost_id": ghost_id })
		},
		Command::Trace { node_id } => serde_json::to_value(tree.get_trace(node_id))?,
		Command::Ghosts { node_id } =>
			serde_json::to_value(tree.get_ghost_branches_for_trace(node_id))?,
		Command::Recall { query, top_k } => {
			let hits: Vec<RecallHit> =
				service.recall(&query, top_k).await.into_iter().map(RecallHit::from).collect();

			serde_json::to_value(hits)?
		},
		Command::Find { text } => serde_json::to_value(tree.find(&text))?,
		Command::Forget { node_id } => serde_json::to_value(service.forget(node_id).await?)?,
		Command::Prune { min_confidence } =>
			serde_json::to_value(service.prune(min_confidence).await)?,
		Command::Stats => {
			service.settle().await;

			let report = StatsReport { tree: tree.stats(), documents: service.index().len() };

			serde_json::to_value(report)?
		},
		Command::ClearIndex => {
			service.settle().await;

			let cleared = service.index().len();

			service.index().clear().await;

			serde_json::json!({ "cleared": cleared })
		},
	};

	Ok(output)
}

fn init_tracing(config: &zync_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
