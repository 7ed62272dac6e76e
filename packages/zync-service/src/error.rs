pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<zync_storage::Error> for Error {
	fn from(err: zync_storage::Error) -> Self {
		match err {
			zync_storage::Error::InvalidKey(key) =>
				Self::InvalidRequest { message: format!("Invalid storage key {key}.") },
			other => Self::Storage { message: other.to_string() },
		}
	}
}

impl From<color_eyre::Report> for Error {
	fn from(err: color_eyre::Report) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
