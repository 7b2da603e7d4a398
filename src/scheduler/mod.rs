mod policy;
pub mod service;
mod state_machine;

pub use service::{event_channel, AutoConnectHandle, AutoConnectService, EventSink};
