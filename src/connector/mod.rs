pub mod bluez;
pub mod traits;

#[cfg(test)]
pub mod fake;

pub use bluez::{BluezConnector, BluezMonitor};
pub use traits::{ProfileConnector, RemotePriority};
