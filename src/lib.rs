//! # lavaqueue
//!
//! Queueing and track-resolution core for a chat-platform music bot backed by
//! a pool of Lavalink-style audio nodes.
//!
//! ## Modules
//!
//! - [`nodes`]: node pool bookkeeping and penalty-based node selection
//! - [`cache`]: TTL caches for resolved tracks and related-track stubs
//! - [`sources`]: track resolution through the nodes and related-track scraping
//! - [`audio`]: per-guild queues and the playback engine
//! - [`events`]: table-driven routing of transport events into the engine
//! - [`storage`]: per-guild JSON persistence
//! - [`config`]: layered configuration
//!
//! The voice transport and the chat front end are outside this crate; they
//! plug in through [`audio::AudioTransport`] and [`audio::Notifier`].

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod nodes;
pub mod sources;
pub mod storage;

pub use audio::{QueueEngine, RepeatMode};
pub use config::Config;
pub use error::{MusicError, MusicResult};
pub use events::{EventRouter, PlayerEvent};
pub use nodes::NodePool;
