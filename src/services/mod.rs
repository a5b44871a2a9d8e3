//! Services for voice storage, the task queue, and the background jobs.

pub mod clock;
pub mod jobs;
pub mod notifier;
pub mod scheduler;
pub mod task_queue;
pub mod voice_store;
