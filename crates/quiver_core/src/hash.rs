use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use xxhash_rust::xxh3::xxh3_128;
use xxhash_rust::xxh3::Xxh3;

/// quiver needs a hasher for generating identifiers used in caches and output names.
///
/// The hashes don't need to be incredibly fast, but they should be stable across
/// runs, machines, platforms and versions, since they end up written to disk in cache
/// keys and bundle file names.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: &str) -> String {
  hash_bytes(s.as_bytes())
}

/// 128-bit lowercase hex digest
pub fn hash_bytes(s: &[u8]) -> String {
  format!("{:032x}", xxh3_128(s))
}

/// Folds the hash of a derived rendition into the hash of the asset that produced it
pub fn fold_hash(hash: &str, sub_hash: &str) -> String {
  hash_string(&format!("{}{}", hash, sub_hash))
}

/// Short base64 digest, used for production asset ids
pub fn short_hash(s: &str, len: usize) -> String {
  let digest = STANDARD.encode(xxh3_128(s.as_bytes()).to_be_bytes());
  digest.chars().take(len).collect()
}
