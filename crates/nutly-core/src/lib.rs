//! UPS supervision layer between `nutly-api` and the `nutly` binary.
//!
//! - **[`UpsHost`]**: one upsd host. Connects with retry, discovers the
//!   UPS units it serves, polls them, and publishes [`UpsSnapshot`]s.
//! - **[`HostManager`]**: owns every configured host by name and runs each
//!   in its own task.
//! - **Domain model** ([`model`]): `ups.status` flags, unit identity, and
//!   interpreted snapshots (battery, voltage, load, faults).

pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HostConfig, ManagerConfig};
pub use error::CoreError;
pub use host::UpsHost;
pub use manager::HostManager;
pub use model::{StatusFlag, UpsSnapshot, UpsStatus, UpsUnit};
