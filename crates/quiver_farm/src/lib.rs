//! Distributes pipeline calls across a pool of worker processes
//!
//! The coordinating process owns a [`Farm`] actor and talks to it through a cloneable
//! [`FarmHandle`]. Every worker process runs a [`Child`] endpoint which hosts a single
//! [`WorkerModule`]. Both sides exchange newline delimited JSON [`Message`]s, and workers may
//! call back into the coordinator through [`MasterOperations`].
pub use self::child::*;
pub use self::error::*;
pub use self::farm::*;
pub use self::module::*;
pub use self::options::*;
pub use self::protocol::*;
pub use self::spawner::*;

mod child;
mod error;
mod farm;
mod module;
mod options;
mod protocol;
mod spawner;
mod worker;
