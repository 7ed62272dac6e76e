use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid storage key: {0}")]
	InvalidKey(String),
	#[error("Storage I/O failed at {path:?}.")]
	Io { path: PathBuf, source: std::io::Error },
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("Snapshot schema mismatch: expected {expected}, found {found}.")]
	SchemaMismatch { expected: String, found: String },
	#[error("Snapshot checksum mismatch for {schema}.")]
	ChecksumMismatch { schema: String },
}
