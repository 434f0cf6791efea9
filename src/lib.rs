//! Sandboxed WebAssembly plugin host.
//!
//! Plugins run on two triggers: HTTP requests routed to `/<module>[/<function>]`
//! ([`http`]), and writes to files whose directory carries an action table
//! ([`events`]). Both share the plugin core in [`plugin`] and the key/value
//! store in [`kv`].

pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod kv;
pub mod plugin;

pub use error::{Error, Result};
