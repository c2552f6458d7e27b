//! Wire types shared by the pool controller and anything talking to it.
//!
//! Topic names, the JSON documents published on them, and the attribute
//! table of the short-range provisioning service all live here so a dashboard
//! can depend on the exact same definitions as the firmware.

pub mod provisioning;
pub mod report;
pub mod topics;

pub use provisioning::{Attribute, NetworkEntry, ProvisioningStatus};
pub use report::{LinkStatus, SignalQuality, TimerCommand, TimerReport, ValveMode, WifiReport};
pub use topics::Topics;
