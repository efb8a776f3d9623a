//! `ledmux` is the Rust crate implementing the core features of the ledmux
//! LED multiplexing daemon: an OpenRGB SDK client driving a concurrent
//! effect compositor.
//!
//! # Structure
//!
//! The crate is organized in three layers:
//!
//! * [`connection`] owns the TCP link to the OpenRGB server, republishes the
//!   enumerated device list and recovers from connection losses,
//! * [`compositor`] blends the registered effects into frames and pushes them
//!   through the connection,
//! * [`manager`] enforces the single-slot replacement policy for full-device
//!   effects on top of the compositor registry.
//!
//! # License
//!
//! This source code is released under the [MIT-License](https://opensource.org/licenses/MIT)

#![recursion_limit = "256"]

#[macro_use]
extern crate tracing;

pub mod client;
pub mod color;
pub mod compositor;
pub mod connection;
pub mod effects;
pub mod layout;
pub mod manager;
pub mod models;
pub mod protocol;
pub mod serde;
