//! relayq — sequenced real-time prompt queue server.
//!
//! Many concurrent clients submit short text prompts over a websocket; a
//! per-connection dual leaky bucket gates admission, a single sequential
//! worker processes admitted items in strict order, and a snapshot +
//! incremental-push + gap-fill protocol keeps every client's copy of the
//! history consistent across disconnects. State is volatile for the life of
//! one process.

pub mod connection;
pub mod protocol;
pub mod queue;
pub mod rate_limit;
pub mod replica;
pub mod server;
pub mod settings;
pub mod trace;
pub mod worker;

pub use relayq_macros::test;
