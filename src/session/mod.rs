//! Transport sessions and the expect engine.
//!
//! A `Session` is one live interactive channel (serial, telnet, ssh shell,
//! or a spawned launcher console); the expect engine resolves ordered
//! pattern lists against its output stream.

mod expect;
mod transport;

pub use expect::Alt;
pub use transport::{Session, TransportSpec};
