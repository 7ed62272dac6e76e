use std::{
	collections::HashMap,
	io::ErrorKind,
	path::{Path, PathBuf},
	sync::{
		Mutex,
		atomic::{AtomicU64, AtomicUsize, Ordering},
	},
};

use tokio::fs;

use crate::{BoxFuture, Error, Result};

/// A flat local key-value store holding whole snapshots.
pub trait KvStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

	fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<()>>;

	fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Stores each key as `<root>/<key>.json`, replacing files atomically through a rename.
#[derive(Debug)]
pub struct FsStore {
	root: PathBuf,
	temp_counter: AtomicU64,
}
impl FsStore {
	pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
		let root = root.into();

		fs::create_dir_all(&root)
			.await
			.map_err(|err| Error::Io { path: root.clone(), source: err })?;

		tracing::debug!(root = %root.display(), "Opened filesystem store.");

		Ok(Self { root, temp_counter: AtomicU64::new(0) })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, key: &str) -> Result<PathBuf> {
		validate_key(key)?;

		Ok(self.root.join(format!("{key}.json")))
	}

	async fn get_inner(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let path = self.path_for(key)?;

		match fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
			Err(err) => Err(Error::Io { path, source: err }),
		}
	}

	async fn put_inner(&self, key: &str, value: Vec<u8>) -> Result<()> {
		let path = self.path_for(key)?;
		let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
		let temp = self.root.join(format!("{key}.json.{}.{seq}.tmp", std::process::id()));

		fs::write(&temp, &value)
			.await
			.map_err(|err| Error::Io { path: temp.clone(), source: err })?;

		if let Err(err) = fs::rename(&temp, &path).await {
			if let Err(cleanup) = fs::remove_file(&temp).await {
				tracing::warn!(
					path = %temp.display(),
					error = %cleanup,
					"Failed to remove temp snapshot."
				);
			}

			return Err(Error::Io { path, source: err });
		}

		Ok(())
	}

	async fn remove_inner(&self, key: &str) -> Result<()> {
		let path = self.path_for(key)?;

		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
			Err(err) => Err(Error::Io { path, source: err }),
		}
	}
}
impl KvStore for FsStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
		Box::pin(self.get_inner(key))
	}

	fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.put_inner(key, value))
	}

	fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.remove_inner(key))
	}
}

/// In-process store. Counts writes so callers can observe flush coalescing.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: Mutex<HashMap<String, Vec<u8>>>,
	puts: AtomicUsize,
}
impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_count(&self) -> usize {
		self.puts.load(Ordering::SeqCst)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).contains_key(key)
	}

	pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).get(key).cloned()
	}

	pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).insert(key.to_string(), value);
	}
}
impl KvStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
		let value = self.raw(key);

		Box::pin(async move { Ok(value) })
	}

	fn put<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<()>> {
		let result = validate_key(key).map(|()| {
			self.insert_raw(key, value);
			self.puts.fetch_add(1, Ordering::SeqCst);
		});

		Box::pin(async move { result })
	}

	fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).remove(key);

		Box::pin(async { Ok(()) })
	}
}

fn validate_key(key: &str) -> Result<()> {
	let valid = !key.is_empty()
		&& !key.starts_with('.')
		&& key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

	if valid { Ok(()) } else { Err(Error::InvalidKey(key.to_string())) }
}
