//! lixnet-core: wire format, id generation and configuration.
//! All other lixnet crates depend on this one.

pub mod config;
pub mod ids;
pub mod wire;

pub use config::LixnetConfig;
pub use ids::{IdGenerator, RandomIds, SequentialIds};
pub use wire::{ChunkLine, Envelope, Frame, WireError};
