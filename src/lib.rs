//! crabbridge: lets browser WebSocket clients speak raw IRC.
//!
//! Every inbound WebSocket gets its own outbound IRC connection. Text frames
//! are written to the server as lines and server lines come back as text
//! frames. Concurrent sessions are capped per client IP.

pub mod config;
pub mod error;
pub mod irc;
pub mod logging;
pub mod relay;
pub mod server;
pub mod session;

pub use error::{BridgeError, Endpoint};
