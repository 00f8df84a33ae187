//! # Audio Module
//!
//! Per-guild queues and the playback engine that drives them.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - Ordered pending items with a now-playing slot
//! - Repeat modes (`None`, `All`, `Single`), shuffle and play history
//! - Snapshots and pagination for display
//!
//! ### [`engine`] - Playback Engine
//! - Joins/leaves voice sessions through an [`transport::AudioTransport`]
//! - Resolves queries, enqueues, advances on track end, autoplays
//! - Persists queue state after every mutation
//!
//! ### [`transport`] and [`notifier`]
//! - Seams to the outside world: the node voice/player connection and the
//!   chat front end. Both are traits so tests can substitute fakes.
//!
//! ## Concurrency
//!
//! Guilds never share a lock. Within a guild, queue mutations are serialized
//! by a `tokio::sync::Mutex` and slow network work happens with it released.

pub mod engine;
pub mod notifier;
pub mod queue;
pub mod transport;

pub use engine::{AdvanceOutcome, EngineDeps, EngineSettings, EnqueueOutcome, QueueEngine};
pub use notifier::{LogNotifier, Notice, Notifier};
pub use queue::{GuildQueue, PlayingState, QueueItem, QueuePage, QueueSnapshot, RepeatMode};
pub use transport::{AudioTransport, Session};
