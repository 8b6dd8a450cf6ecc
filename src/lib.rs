//! Pure Rust implementation of the [Source RCON protocol](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol)
//! as spoken by Factorio dedicated servers.
//!
//! Two functionally identical clients are provided: an async one built
//! on tokio in [client] and a plain blocking one in [blocking]. Both
//! authenticate on connect, pipeline batches of commands over a single
//! connection and correlate responses by packet id, so out-of-order
//! replies are handled transparently.
pub mod blocking;
pub mod client;
pub mod error;
pub mod packet;
mod protocol;
