//! Export/import: serialize the live entry set to a binary file, with
//! optional real zlib compression.
//!
//! Grounded on the reference codebase's `BincodeCodec`/`EncodedData` in
//! `codec.rs` for the wire-format shape, but this module uses a real
//! `flate2::write::ZlibEncoder`/`ZlibDecoder` rather than the reference
//! module's simulated (no-op) `CompressionAlgorithm` — round-trip
//! persistence correctness is a tested property here (`SPEC_FULL.md` §8
//! property 8), not just an interface shape to imitate.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;
use std::io::{Read, Write};

use crate::entry::Entry;
use crate::error::{CacheError, CacheResult};
use crate::table::EntryTable;

/// Export every live (non-expired) entry in `table` to `path`, as
/// bincode wrapped in zlib at `compression_level` (0 = store, 9 = max).
pub fn export<K, V>(table: &EntryTable<K, V>, path: &str, compression_level: u32) -> CacheResult<()>
where
    K: Eq + Hash + Clone + Serialize,
    V: Clone + Serialize,
{
    let now = crate::entry::now_millis();
    let live: Vec<(K, Entry<V>)> = table
        .modified_snapshot()
        .into_iter()
        .filter_map(|(key, _)| {
            table
                .get_raw(&key)
                .filter(|e| !e.is_expired_at(now))
                .map(|e| (key, e))
        })
        .collect();

    let encoded = bincode::serialize(&live).map_err(|e| CacheError::other(e))?;

    let level = Compression::new(compression_level.min(9));
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder
        .write_all(&encoded)
        .map_err(|e| CacheError::UnreachableFile(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CacheError::UnreachableFile(e.to_string()))?;

    std::fs::write(path, compressed).map_err(|e| CacheError::UnreachableFile(e.to_string()))
}

/// Import entries previously written by [`export`] into `table` via
/// bulk-put (overwriting any existing entries for the same keys).
/// Returns the number of entries restored.
pub fn import<K, V>(table: &EntryTable<K, V>, path: &str) -> CacheResult<usize>
where
    K: Eq + Hash + Clone + DeserializeOwned,
    V: Clone + DeserializeOwned,
{
    let compressed = std::fs::read(path).map_err(|e| CacheError::UnreachableFile(e.to_string()))?;

    let mut decoder = ZlibDecoder::new(compressed.as_slice());
    let mut encoded = Vec::new();
    decoder
        .read_to_end(&mut encoded)
        .map_err(|e| CacheError::UnreachableFile(e.to_string()))?;

    let restored: Vec<(K, Entry<V>)> = bincode::deserialize(&encoded).map_err(|e| CacheError::other(e))?;
    let count = restored.len();
    for (key, entry) in restored {
        table.put(key, entry);
    }
    Ok(count)
}
