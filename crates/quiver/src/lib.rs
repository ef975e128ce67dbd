pub use bundler::*;
pub use error::*;
pub use quiver_cache as cache;
pub use quiver_core as core;
pub use quiver_farm as farm;
pub use quiver_filesystem as file_system;
pub use watch::*;

pub mod bundle;
pub mod graph;
pub mod handlers;
pub mod logging;
pub mod notifier;
pub mod packagers;
pub mod pipeline;
pub mod resolver;
pub mod server_error;
pub mod worker;

mod bundler;
mod error;
mod watch;
