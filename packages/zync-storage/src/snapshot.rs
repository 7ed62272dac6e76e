//! Whole-collection snapshots: a schema tag, a blake3 checksum of the records, and the records.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::value::RawValue;

use crate::{Error, Result, kv::KvStore};

#[derive(Serialize)]
struct EnvelopeOut<'a> {
	schema: &'a str,
	checksum: String,
	records: &'a RawValue,
}

#[derive(Deserialize)]
struct EnvelopeIn {
	schema: String,
	checksum: String,
	records: Box<RawValue>,
}

pub fn encode<T>(schema: &str, records: &[T]) -> Result<Vec<u8>>
where
	T: Serialize,
{
	let records = serde_json::value::to_raw_value(records)?;
	let checksum = checksum(records.get());
	let envelope = EnvelopeOut { schema, checksum, records: &records };

	Ok(serde_json::to_vec(&envelope)?)
}

pub fn decode<T>(schema: &str, bytes: &[u8]) -> Result<Vec<T>>
where
	T: DeserializeOwned,
{
	let envelope: EnvelopeIn = serde_json::from_slice(bytes)?;

	if envelope.schema != schema {
		return Err(Error::SchemaMismatch {
			expected: schema.to_string(),
			found: envelope.schema,
		});
	}
	if checksum(envelope.records.get()) != envelope.checksum {
		return Err(Error::ChecksumMismatch { schema: envelope.schema });
	}

	Ok(serde_json::from_str(envelope.records.get())?)
}

/// Reads `key` and decodes it. A missing key is an empty collection.
pub async fn load<T>(store: &dyn KvStore, key: &str, schema: &str) -> Result<Vec<T>>
where
	T: DeserializeOwned,
{
	match store.get(key).await? {
		Some(bytes) => decode(schema, &bytes),
		None => Ok(Vec::new()),
	}
}

fn checksum(raw: &str) -> String {
	blake3::hash(raw.as_bytes()).to_hex().to_string()
}
