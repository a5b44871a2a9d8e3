//! Data models for the application.
//!
//! These models represent the entities stored in the local SQLite database.
//! All row models derive `FromRow` for SQLx queries and `Serialize` so they
//! can be logged or exported as JSON.

pub mod task;
pub mod voice;

// Re-exports for convenient access
pub use task::{CompletedTask, ScheduledTask, TaskKind};
pub use voice::{VoteCounts, VoteKind, Voice, VoiceStatus};
