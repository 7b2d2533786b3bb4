pub mod error;
pub mod queue;
pub mod stats;

pub use error::EnqueueError;
pub use queue::DeliveryQueue;
pub use stats::QueueStats;
