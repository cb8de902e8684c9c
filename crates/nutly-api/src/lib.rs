//! Async client for the Network UPS Tools status server (upsd).
//!
//! upsd speaks a line-oriented text protocol on TCP port 3493. This crate
//! covers the wire side only:
//!
//! - [`Client`] owns one session: lazy connect, optional `USERNAME` /
//!   `PASSWORD` login, and strict one-command-at-a-time correlation with a
//!   bounded busy retry and a per-command timeout.
//! - The query verbs (`get`, `get_list`, `get_map`, `set_var`,
//!   `run_command`) parse replies with a small line grammar.
//! - [`Device`] handles name one UPS and fetch everything on demand.
//! - [`Client::subscribe`] streams [`ClientEvent`]s for logging and
//!   supervision.
//!
//! Interpreting UPS variables is left to callers.
//!
//! The `testing` feature adds [`testing::MockUpsd`], a scripted in-process
//! upsd for integration tests.

pub mod client;
pub mod device;
pub mod error;
pub mod grammar;
mod query;
pub mod request;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use client::{BusyPolicy, Client, ClientConfig, DEFAULT_PORT};
pub use device::Device;
pub use error::Error;
pub use request::{ClientEvent, Request, Response};
