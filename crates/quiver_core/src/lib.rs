pub mod diagnostic;
pub mod hash;
pub mod task_queue;
pub mod types;
pub mod version;
