mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, DEFAULT_DECAY_FLOOR, DEFAULT_DECAY_PER_HOUR, DEFAULT_FLUSH_DEBOUNCE_MS,
	DEFAULT_INDEX_CAPACITY, DEFAULT_MIN_CONTENT_CHARS, DEFAULT_RECENCY_WEIGHT,
	DEFAULT_SIMILARITY_WEIGHT, DEFAULT_TOP_K, EmbeddingProviderConfig, Index, Provenance,
	Providers, Ranking, ReferencePolicy, Service, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	finish(cfg)
}

pub fn parse(raw: &str) -> Result<Config> {
	let cfg: Config = toml::from_str(raw).map_err(Error::ParseInline)?;

	finish(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if cfg.storage.path.as_os_str().is_empty() {
		return Err(Error::Validation { message: "storage.path must be non-empty.".to_string() });
	}

	let embedding = &cfg.providers.embedding;

	for (label, value) in [
		("providers.embedding.provider_id", &embedding.provider_id),
		("providers.embedding.api_base", &embedding.api_base),
		("providers.embedding.api_key", &embedding.api_key),
		("providers.embedding.model", &embedding.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if embedding.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.index.capacity == 0 {
		return Err(Error::Validation {
			message: "index.capacity must be greater than zero.".to_string(),
		});
	}
	if cfg.index.default_top_k == 0 {
		return Err(Error::Validation {
			message: "index.default_top_k must be greater than zero.".to_string(),
		});
	}

	for (label, weight) in [
		("ranking.similarity_weight", cfg.ranking.similarity_weight),
		("ranking.recency_weight", cfg.ranking.recency_weight),
	] {
		if !weight.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=1.0).contains(&weight) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if !cfg.ranking.decay_per_hour.is_finite() {
		return Err(Error::Validation {
			message: "ranking.decay_per_hour must be a finite number.".to_string(),
		});
	}
	if cfg.ranking.decay_per_hour < 0.0 {
		return Err(Error::Validation {
			message: "ranking.decay_per_hour must be zero or greater.".to_string(),
		});
	}
	if !cfg.ranking.decay_floor.is_finite()
		|| cfg.ranking.decay_floor <= 0.0
		|| cfg.ranking.decay_floor > 1.0
	{
		return Err(Error::Validation {
			message: "ranking.decay_floor must be greater than 0.0 and at most 1.0.".to_string(),
		});
	}

	Ok(())
}

fn finish(mut cfg: Config) -> Result<Config> {
	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

fn normalize(cfg: &mut Config) {
	let log_level = cfg.service.log_level.trim();

	cfg.service.log_level =
		if log_level.is_empty() { "info".to_string() } else { log_level.to_string() };

	let api_base = cfg.providers.embedding.api_base.trim_end_matches('/');

	cfg.providers.embedding.api_base = api_base.to_string();
}
