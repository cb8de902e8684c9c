// ── UPS domain model ──
//
// Interpretation of raw upsd variables: status flags, unit identity, and
// the periodic snapshot a monitor publishes.

pub mod snapshot;
pub mod status;
pub mod unit;

pub use snapshot::UpsSnapshot;
pub use status::{StatusFlag, UpsStatus};
pub use unit::UpsUnit;
