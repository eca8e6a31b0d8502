//! IRC side of the bridge: dialing the server and the stream it yields.
//!
//! Lines are never parsed here; the bridge moves them as opaque payloads.

pub mod dialer;
pub mod stream;

pub use dialer::{IrcDialer, IrcTarget};
pub use stream::IrcStream;
