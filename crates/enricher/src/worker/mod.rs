pub mod events;
pub mod pool;

pub use events::WorkerEvent;
pub use pool::{PoolConfig, WorkerHandle, WorkerPool};
