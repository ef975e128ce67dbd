/// Version of the quiver crates, folded into cache fingerprints so that upgrading invalidates
/// every cache entry.
pub fn quiver_version() -> &'static str {
  env!("CARGO_PKG_VERSION")
}
