pub mod config;
pub mod controller;
pub mod credentials;
pub mod dispatch;
pub mod equipment;
pub mod error;
pub mod link;
pub mod logging;
pub mod platform;
pub mod provisioning;
pub mod session;
pub mod timer;
